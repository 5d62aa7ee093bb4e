//! Removable block devices: records, classification, enumeration parsing.
//!
//! [`Device`] values are produced by the host providers in [`crate::host`]
//! and never mutated afterwards. The text form used by `syntropy usb list`
//! is one tab-separated line per device and parses back to the same record.

pub mod lsblk;
pub mod safety;
pub mod windows;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::platform::Platform;

/// Smallest device considered a candidate (1 GiB).
pub const MIN_DEVICE_BYTES: u64 = 1 << 30;

/// Largest device considered a candidate (1024 GiB).
pub const MAX_DEVICE_BYTES: u64 = 1024 << 30;

/// One candidate removable block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    path: String,
    size_bytes: u64,
    model: String,
    vendor: String,
    serial: String,
    removable: bool,
    platform: Platform,
}

impl Device {
    pub(crate) fn new(
        path: impl Into<String>,
        size_bytes: u64,
        model: impl Into<String>,
        vendor: impl Into<String>,
        serial: impl Into<String>,
        removable: bool,
        platform: Platform,
    ) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            model: model.into().trim().to_string(),
            vendor: vendor.into().trim().to_string(),
            serial: serial.into().trim().to_string(),
            removable,
            platform,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn removable(&self) -> bool {
        self.removable
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Same device, re-tagged for another platform (WSL fallback path).
    pub(crate) fn retagged(self, platform: Platform) -> Self {
        Self { platform, ..self }
    }

    /// Human-readable size, e.g. "14.9 GiB".
    pub fn size_display(&self) -> String {
        let gib = self.size_bytes as f64 / (1u64 << 30) as f64;
        format!("{:.1} GiB", gib)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = [self.vendor.as_str(), self.model.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{} ({}", self.path, self.size_display())?;
        if !name.is_empty() {
            write!(f, ", {}", name)?;
        }
        write!(f, ")")
    }
}

/// True if `size_bytes` is inside the candidate window.
pub fn size_in_range(size_bytes: u64) -> bool {
    (MIN_DEVICE_BYTES..=MAX_DEVICE_BYTES).contains(&size_bytes)
}

/// What the host says about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathProbe {
    Missing,
    NotBlockDevice,
    BlockDevice,
}

/// Outcome of the system-disk checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemDiskCheck {
    /// Backs a critical mount or the boot configuration.
    System(String),
    /// Nothing ties the device to the running system.
    Clear,
    /// Host state needed to decide could not be read.
    Unknown(String),
}

impl SystemDiskCheck {
    pub fn is_system(&self) -> bool {
        matches!(self, SystemDiskCheck::System(_))
    }
}

/// Safety classification of a device record against current host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Safe,
    SystemDisk,
    Nonexistent,
    NotBlockDevice,
    TooSmall,
    TooLarge,
}

impl Classification {
    pub fn tag(self) -> &'static str {
        match self {
            Classification::Safe => "safe",
            Classification::SystemDisk => "system-disk",
            Classification::Nonexistent => "nonexistent",
            Classification::NotBlockDevice => "not-block-device",
            Classification::TooSmall => "too-small",
            Classification::TooLarge => "too-large",
        }
    }
}

/// Classify a device. Pure over the probe and system-disk results; an
/// unknown system-disk verdict classifies as a system disk.
pub fn classify(device: &Device, probe: PathProbe, system: &SystemDiskCheck) -> Classification {
    match probe {
        PathProbe::Missing => return Classification::Nonexistent,
        PathProbe::NotBlockDevice => return Classification::NotBlockDevice,
        PathProbe::BlockDevice => {}
    }
    if device.size_bytes < MIN_DEVICE_BYTES {
        return Classification::TooSmall;
    }
    if device.size_bytes > MAX_DEVICE_BYTES {
        return Classification::TooLarge;
    }
    match system {
        SystemDiskCheck::Clear => Classification::Safe,
        SystemDiskCheck::System(_) | SystemDiskCheck::Unknown(_) => Classification::SystemDisk,
    }
}

// =============================================================================
// Text record format
// =============================================================================

const RECORD_FIELDS: usize = 7;

/// Format a device as one tab-separated line.
pub fn format_record(device: &Device) -> String {
    [
        escape(&device.path),
        device.size_bytes.to_string(),
        escape(&device.model),
        escape(&device.vendor),
        escape(&device.serial),
        if device.removable { "1" } else { "0" }.to_string(),
        device.platform.tag().to_string(),
    ]
    .join("\t")
}

/// Parse a line produced by [`format_record`].
pub fn parse_record(line: &str) -> Result<Device> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() != RECORD_FIELDS {
        bail!(
            "device record has {} fields, expected {}",
            fields.len(),
            RECORD_FIELDS
        );
    }
    let size_bytes = fields[1]
        .parse::<u64>()
        .with_context(|| format!("invalid size '{}'", fields[1]))?;
    let removable = match fields[5] {
        "1" => true,
        "0" => false,
        other => bail!("invalid removable flag '{}'", other),
    };
    let platform = Platform::from_tag(fields[6])
        .with_context(|| format!("unknown platform tag '{}'", fields[6]))?;

    Ok(Device {
        path: unescape(fields[0]),
        size_bytes,
        model: unescape(fields[2]),
        vendor: unescape(fields[3]),
        serial: unescape(fields[4]),
        removable,
        platform,
    })
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
