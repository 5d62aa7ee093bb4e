//! `usb list` - show candidate devices.

use anyhow::Result;
use serde::Serialize;

use crate::device::{self, Classification, Device};
use crate::host::HostOps;

/// One listed device with its current safety classification.
#[derive(Debug, Serialize)]
pub struct ListedDevice {
    #[serde(flatten)]
    pub device: Device,
    pub classification: Classification,
}

/// Enumerate and classify.
pub fn list_devices(host: &dyn HostOps) -> crate::error::Result<Vec<ListedDevice>> {
    Ok(host
        .enumerate()?
        .into_iter()
        .map(|device| {
            let classification = device::classify(
                &device,
                host.probe(device.path()),
                &host.is_system_disk(device.path()),
            );
            ListedDevice {
                device,
                classification,
            }
        })
        .collect())
}

/// Execute `usb list`.
pub fn cmd_usb_list(host: &dyn HostOps, json: bool) -> Result<()> {
    let listed = list_devices(host)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if listed.is_empty() {
        println!("No removable USB devices between 1 and 1024 GiB found.");
        return Ok(());
    }
    for entry in &listed {
        println!(
            "{}\t{}",
            device::format_record(&entry.device),
            entry.classification.tag()
        );
    }
    Ok(())
}
