//! Windows-side disk queries.
//!
//! Disks are listed with a PowerShell CIM query that prints one compressed
//! JSON object per line. The same listing serves native Windows hosts and
//! WSL hosts, where Windows disk index N shows up as `/dev/sd{a+N}`.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use super::{size_in_range, Device};
use crate::platform::Platform;

/// USB-attached physical disks, one JSON object per line.
pub const USB_DISK_QUERY: &str = "Get-CimInstance -ClassName Win32_DiskDrive -Filter \"InterfaceType='USB'\" | \
     ForEach-Object { $_ | Select-Object Index,Size,Model,SerialNumber,Manufacturer,MediaType | ConvertTo-Json -Compress }";

/// One row of the CIM listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WinDisk {
    pub index: u32,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

impl WinDisk {
    fn removable(&self) -> bool {
        self.media_type
            .as_deref()
            .map(|m| m.to_ascii_lowercase().contains("removable"))
            .unwrap_or(true)
    }
}

/// Parse newline-delimited JSON objects. Blank lines are skipped.
pub fn parse_disk_lines(output: &str) -> Result<Vec<WinDisk>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str::<WinDisk>(line)
                .with_context(|| format!("unparseable disk line: {}", line))
        })
        .collect()
}

/// Extract the disk number from `\\.\PhysicalDrive<N>` (any case) or a bare
/// number.
pub fn disk_number(path: &str) -> Option<u32> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"(?i)PhysicalDrive(\d+)$").expect("static regex"));
    let trimmed = path.trim();
    if let Some(caps) = re.captures(trimmed) {
        return caps[1].parse().ok();
    }
    trimmed.parse().ok()
}

/// Device path for a Windows disk number.
pub fn physical_drive_path(index: u32) -> String {
    format!(r"\\.\PhysicalDrive{}", index)
}

/// True if the path has the shape of a Windows physical drive.
pub fn is_physical_drive_path(path: &str) -> bool {
    path.to_ascii_lowercase().starts_with(r"\\.\physicaldrive") && disk_number(path).is_some()
}

/// Conventional Linux name for a Windows disk index: 0 → sda, 25 → sdz,
/// 26 → sdaa.
pub fn linux_name_for_index(index: u32) -> String {
    let mut n = index as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((b'a' + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.reverse();
    format!("sd{}", letters.into_iter().collect::<String>())
}

fn to_device(disk: &WinDisk, path: String, platform: Platform) -> Device {
    Device::new(
        path,
        disk.size.unwrap_or(0),
        disk.model.clone().unwrap_or_default(),
        disk.manufacturer.clone().unwrap_or_default(),
        disk.serial_number.clone().unwrap_or_default(),
        disk.removable(),
        platform,
    )
}

/// Devices for a native Windows host. Disk 0 is never a candidate.
pub fn native_devices(disks: &[WinDisk]) -> Vec<Device> {
    disks
        .iter()
        .filter(|d| d.index != 0)
        .filter(|d| size_in_range(d.size.unwrap_or(0)))
        .map(|d| to_device(d, physical_drive_path(d.index), Platform::NativeWindows))
        .collect()
}

/// Devices for a WSL host: each Windows index maps to `/dev/sdX`, kept
/// only if `exists` says the mapped node is present.
pub fn wsl_devices(disks: &[WinDisk], exists: impl Fn(&str) -> bool) -> Vec<Device> {
    disks
        .iter()
        .filter(|d| d.index != 0)
        .filter(|d| size_in_range(d.size.unwrap_or(0)))
        .filter_map(|d| {
            let path = format!("/dev/{}", linux_name_for_index(d.index));
            if exists(&path) {
                Some(to_device(d, path, Platform::LinuxUnderWindows))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{"Index":1,"Size":16008609792,"Model":"SanDisk Ultra Fit USB Device","SerialNumber":"4C53","Manufacturer":"(Standard disk drives)","MediaType":"Removable Media"}
{"Index":2,"Size":31914983424,"Model":"Kingston DataTraveler","SerialNumber":null,"Manufacturer":null,"MediaType":"Removable Media"}

{"Index":0,"Size":500105249280,"Model":"USB SSD","SerialNumber":"X","Manufacturer":null,"MediaType":"External hard disk media"}
"#;

    #[test]
    fn parses_line_delimited_json() {
        let disks = parse_disk_lines(LISTING).unwrap();
        assert_eq!(disks.len(), 3);
        assert_eq!(disks[1].serial_number, None);
        assert!(disks[0].removable());
        assert!(!disks[2].removable());
    }

    #[test]
    fn disk_numbers() {
        assert_eq!(disk_number(r"\\.\PhysicalDrive2"), Some(2));
        assert_eq!(disk_number(r"\\.\PHYSICALDRIVE12"), Some(12));
        assert_eq!(disk_number("3"), Some(3));
        assert_eq!(disk_number(r"\\.\PhysicalDrive"), None);
        assert_eq!(disk_number("/dev/sdb"), None);
    }

    #[test]
    fn physical_drive_shape() {
        assert!(is_physical_drive_path(r"\\.\PhysicalDrive1"));
        assert!(!is_physical_drive_path("C:"));
        assert!(!is_physical_drive_path(r"\\.\PhysicalDriveX"));
    }

    #[test]
    fn index_to_linux_name() {
        assert_eq!(linux_name_for_index(0), "sda");
        assert_eq!(linux_name_for_index(1), "sdb");
        assert_eq!(linux_name_for_index(25), "sdz");
        assert_eq!(linux_name_for_index(26), "sdaa");
    }

    #[test]
    fn wsl_mapping_skips_index_zero_and_missing_nodes() {
        let disks = parse_disk_lines(LISTING).unwrap();
        let devices = wsl_devices(&disks, |p| p == "/dev/sdb" || p == "/dev/sdc" || p == "/dev/sda");
        let paths: Vec<&str> = devices.iter().map(|d| d.path()).collect();
        assert_eq!(paths, vec!["/dev/sdb", "/dev/sdc"]);
        assert!(devices
            .iter()
            .all(|d| d.platform() == Platform::LinuxUnderWindows));

        let only_b = wsl_devices(&disks, |p| p == "/dev/sdb");
        assert_eq!(only_b.len(), 1);
    }

    #[test]
    fn native_devices_use_physical_drive_paths() {
        let disks = parse_disk_lines(LISTING).unwrap();
        let devices = native_devices(&disks);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].path(), r"\\.\PhysicalDrive1");
        assert_eq!(devices[1].vendor(), "");
    }
}
