//! Native Windows provider. Every host query is a PowerShell snippet.

use std::path::Path;

use tracing::{debug, info};

use super::{HostOps, MountMode};
use crate::device::safety::windows_system_disk_check;
use crate::device::windows::{disk_number, is_physical_drive_path, native_devices, parse_disk_lines, USB_DISK_QUERY};
use crate::device::{Device, PathProbe, SystemDiskCheck};
use crate::error::{Error, ErrorKind, Result};
use crate::format::windows::{parse_partition_path, partition_path, powershell, ps_quote, WindowsFormatter};
use crate::node::VolumeLabel;
use crate::platform::Platform;
use crate::process::{Runner, SystemRunner};

pub struct WindowsHost {
    runner: Box<dyn Runner>,
}

impl WindowsHost {
    pub fn new() -> Self {
        Self::with_runner(Box::new(SystemRunner))
    }

    pub fn with_runner(runner: Box<dyn Runner>) -> Self {
        Self { runner }
    }

    fn query(&self, script: String) -> anyhow::Result<String> {
        Ok(powershell(script).run_with(self.runner.as_ref())?.stdout)
    }
}

impl Default for WindowsHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Access paths are directories with a trailing backslash.
fn access_path(mount_point: &Path) -> String {
    let mut path = mount_point.display().to_string();
    if !path.ends_with('\\') {
        path.push('\\');
    }
    path
}

impl HostOps for WindowsHost {
    fn platform(&self) -> Platform {
        Platform::NativeWindows
    }

    fn enumerate(&self) -> Result<Vec<Device>> {
        let output = self
            .query(USB_DISK_QUERY.to_string())
            .map_err(|e| Error::from_anyhow(ErrorKind::Internal, "listing USB disks failed", e))?;
        let disks = parse_disk_lines(&output)
            .map_err(|e| Error::from_anyhow(ErrorKind::Internal, "unexpected disk listing", e))?;
        Ok(native_devices(&disks))
    }

    fn probe(&self, path: &str) -> PathProbe {
        if !is_physical_drive_path(path) {
            return PathProbe::NotBlockDevice;
        }
        let Some(n) = disk_number(path) else {
            return PathProbe::NotBlockDevice;
        };
        match self.query(format!("Get-Disk -Number {} | Out-Null", n)) {
            Ok(_) => PathProbe::BlockDevice,
            Err(e) => {
                debug!(disk = n, error = %e, "disk not found");
                PathProbe::Missing
            }
        }
    }

    fn is_system_disk(&self, path: &str) -> SystemDiskCheck {
        let number = disk_number(path);
        let answer = match number {
            Some(n) if n != 0 => self
                .query(format!(
                    "$d = Get-Disk -Number {}; [bool]($d.IsBoot -or $d.IsSystem)",
                    n
                ))
                .map_err(|e| format!("{:#}", e))
                .and_then(|out| match out.trim() {
                    "True" => Ok(true),
                    "False" => Ok(false),
                    other => Err(format!("unexpected Get-Disk answer '{}'", other)),
                }),
            _ => Ok(false),
        };
        windows_system_disk_check(number, answer)
    }

    fn existing_filesystem(&self, path: &str) -> Option<String> {
        let n = disk_number(path)?;
        let script = format!(
            "Get-Partition -DiskNumber {} | Where-Object {{ ($_ | Get-Volume -ErrorAction SilentlyContinue).FileSystem }} | \
             Select-Object -First 1 -ExpandProperty PartitionNumber",
            n
        );
        let out = self.query(script).ok()?;
        let partition: u32 = out.trim().parse().ok()?;
        Some(partition_path(n, partition))
    }

    fn format(&self, path: &str, label: &VolumeLabel) -> Result<String> {
        WindowsFormatter::new(self.runner.as_ref()).format(path, label)
    }

    fn mount(&self, partition: &str, mount_point: &Path, _mode: MountMode) -> Result<()> {
        let (disk, part) = parse_partition_path(partition).ok_or_else(|| {
            Error::new(
                ErrorKind::MountFailed,
                format!("{} is not a partition path", partition),
            )
        })?;
        let script = format!(
            "Add-PartitionAccessPath -DiskNumber {} -PartitionNumber {} -AccessPath {}",
            disk,
            part,
            ps_quote(&access_path(mount_point))
        );
        self.query(script).map_err(|e| {
            Error::from_anyhow(
                ErrorKind::MountFailed,
                format!("mounting {} on {} failed", partition, mount_point.display()),
                e,
            )
        })?;
        info!(partition, mount_point = %mount_point.display(), "mounted");
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let path = ps_quote(&access_path(mount_point));
        let script = format!(
            "Get-Partition | Where-Object {{ $_.AccessPaths -contains {p} }} | \
             ForEach-Object {{ Remove-PartitionAccessPath -DiskNumber $_.DiskNumber -PartitionNumber $_.PartitionNumber -AccessPath {p} }}",
            p = path
        );
        self.query(script).map(|_| ()).map_err(|e| {
            Error::from_anyhow(
                ErrorKind::MountFailed,
                format!("unmounting {} failed", mount_point.display()),
                e,
            )
        })
    }
}
