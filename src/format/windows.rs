//! Format pipeline for native Windows hosts.
//!
//! One PowerShell script does the whole job so the disk is never left
//! half-initialized between separate invocations. The script refuses boot
//! and system disks on its own, independent of the caller's checks.

use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

use crate::device::windows::disk_number;
use crate::error::{Error, ErrorKind, Result};
use crate::node::VolumeLabel;
use crate::process::{Cmd, Runner};

/// Arguments placed before `-Command <script>` on every invocation.
pub const POWERSHELL_ARGS: &[&str] = &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass"];

/// NT path of partition `partition` on disk `disk`.
pub fn partition_path(disk: u32, partition: u32) -> String {
    format!(r"\\?\GLOBALROOT\Device\Harddisk{}\Partition{}", disk, partition)
}

/// Inverse of [`partition_path`].
pub fn parse_partition_path(path: &str) -> Option<(u32, u32)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)Harddisk(\d+)\\Partition(\d+)$").expect("static regex")
    });
    let caps = re.captures(path.trim())?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Single-quote a value for PowerShell.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build the format script for disk `disk`. Prints the new partition
/// number on success.
pub fn format_script(disk: u32, label: &VolumeLabel) -> String {
    format!(
        r#"$ErrorActionPreference = 'Stop'
$disk = Get-Disk -Number {n}
if ($disk.IsBoot -or $disk.IsSystem) {{ throw "disk {n} is a boot or system disk" }}
if ($disk.IsOffline) {{ Set-Disk -Number {n} -IsOffline $false }}
if ($disk.IsReadOnly) {{ Set-Disk -Number {n} -IsReadOnly $false }}
if ($disk.PartitionStyle -ne 'RAW') {{ Clear-Disk -Number {n} -RemoveData -RemoveOEM -Confirm:$false }}
Initialize-Disk -Number {n} -PartitionStyle MBR
$part = New-Partition -DiskNumber {n} -UseMaximumSize -IsActive
$part | Format-Volume -FileSystem FAT32 -NewFileSystemLabel {label} -Confirm:$false -Force | Out-Null
Write-Output $part.PartitionNumber"#,
        n = disk,
        label = ps_quote(label.as_str()),
    )
}

/// Run a PowerShell snippet.
pub fn powershell(script: impl AsRef<str>) -> Cmd {
    Cmd::new("powershell.exe")
        .args(POWERSHELL_ARGS)
        .arg("-Command")
        .arg(script)
}

pub struct WindowsFormatter<'a> {
    runner: &'a dyn Runner,
}

impl<'a> WindowsFormatter<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Format `device` (`\\.\PhysicalDriveN`) and return the partition path.
    pub fn format(&self, device: &str, label: &VolumeLabel) -> Result<String> {
        let disk = disk_number(device).ok_or_else(|| {
            Error::invalid_input(format!("{} is not a PhysicalDrive path", device))
        })?;
        if self.runner.locate("powershell.exe").is_none() {
            return Err(Error::new(
                ErrorKind::FormatFailed,
                "cannot format: 'powershell.exe' not found in PATH",
            ));
        }

        info!(device, disk, label = label.as_str(), "formatting disk");
        let result = powershell(format_script(disk, label))
            .error_msg(format!("formatting disk {} failed", disk))
            .run_with(self.runner)
            .map_err(|e| script_failure(device, e))?;

        let partition: u32 = result
            .stdout
            .lines()
            .rev()
            .find_map(|l| l.trim().parse().ok())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::FormatFailed,
                    format!("format of {} did not report a partition", device),
                )
                .with_detail(result.stdout_trimmed().to_string())
            })?;

        let path = partition_path(disk, partition);
        info!(device, partition = %path, "format complete");
        Ok(path)
    }
}

fn script_failure(device: &str, err: anyhow::Error) -> Error {
    let detail = format!("{:#}", err);
    let lower = detail.to_ascii_lowercase();
    if lower.contains("access is denied") || lower.contains("permissiondenied") {
        Error::new(
            ErrorKind::FormatFailed,
            format!("formatting {} requires an elevated (administrator) shell", device),
        )
        .with_detail(detail)
    } else if lower.contains("boot or system disk") {
        Error::new(
            ErrorKind::DeviceIsSystem,
            format!("refusing to format {}: boot or system disk", device),
        )
        .with_detail(detail)
    } else if lower.contains("in use") {
        Error::new(ErrorKind::DeviceInUse, format!("{} is in use", device)).with_detail(detail)
    } else {
        Error::new(ErrorKind::FormatFailed, format!("formatting {} failed", device))
            .with_detail(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::ScriptedRunner;
    use crate::process::CommandResult;

    #[test]
    fn script_targets_one_disk() {
        let script = format_script(2, &VolumeLabel::new("node's").unwrap());
        assert!(script.contains("Get-Disk -Number 2"));
        assert!(script.contains("Initialize-Disk -Number 2 -PartitionStyle MBR"));
        assert!(script.contains("-NewFileSystemLabel 'NODE''S'"));
        assert!(script.contains("IsBoot -or $disk.IsSystem"));
    }

    #[test]
    fn partition_paths() {
        let path = partition_path(3, 1);
        assert_eq!(path, r"\\?\GLOBALROOT\Device\Harddisk3\Partition1");
        assert_eq!(parse_partition_path(&path), Some((3, 1)));
        assert_eq!(parse_partition_path("/dev/sdb1"), None);
    }

    #[test]
    fn returns_reported_partition() {
        let runner = ScriptedRunner::new().on("powershell.exe", CommandResult::ok("\r\n1\r\n"));
        let path = WindowsFormatter::new(&runner)
            .format(r"\\.\PhysicalDrive2", &VolumeLabel::default())
            .unwrap();
        assert_eq!(parse_partition_path(&path), Some((2, 1)));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("powershell.exe -NoProfile -NonInteractive"));
    }

    #[test]
    fn access_denied_asks_for_elevation() {
        let runner = ScriptedRunner::new().on(
            "powershell.exe",
            CommandResult::failed(1, "Clear-Disk : Access is denied."),
        );
        let err = WindowsFormatter::new(&runner)
            .format(r"\\.\PhysicalDrive2", &VolumeLabel::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatFailed);
        assert!(err.to_string().contains("administrator"));
    }

    #[test]
    fn rejects_non_drive_path() {
        let runner = ScriptedRunner::new();
        let err = WindowsFormatter::new(&runner)
            .format("C:", &VolumeLabel::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(runner.calls().is_empty());
    }
}
