//! Format pipeline for Linux-family hosts.
//!
//! Steps, aborting on the first hard error:
//! 1. Unmount every mounted partition of the device (soft-fail)
//! 2. Wipe signatures, zap GPT/MBR, zero both ends, re-read the table
//! 3. Create an msdos partition table
//! 4. Create one primary FAT32 partition from 1 MiB to the end, boot flag on
//! 5. Wait for the kernel to expose the partition node
//! 6. mkfs.fat -F 32 with the requested label
//!
//! Every destructive call goes through `sudo`.

use std::time::Duration;

use tracing::{info, warn};

use super::{partition_candidates, wait_for_partition, PARTITION_SETTLE_TIMEOUT, WIPE_BYTES};
use crate::device::lsblk;
use crate::error::{Error, ErrorKind, Result};
use crate::node::VolumeLabel;
use crate::process::{self, Cmd, Runner};

/// Tools the pipeline invokes.
pub const FORMAT_TOOLS: &[&str] = &[
    "sudo", "lsblk", "umount", "wipefs", "sgdisk", "dd", "parted", "partprobe", "mkfs.fat",
];

pub struct LinuxFormatter<'a> {
    runner: &'a dyn Runner,
    settle_timeout: Duration,
}

impl<'a> LinuxFormatter<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self {
            runner,
            settle_timeout: PARTITION_SETTLE_TIMEOUT,
        }
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Format `device` and return the new partition path.
    pub fn format(&self, device: &str, label: &VolumeLabel) -> Result<String> {
        process::require_tools(self.runner, FORMAT_TOOLS).map_err(|e| {
            Error::new(ErrorKind::FormatFailed, "cannot format: required tool missing")
                .with_detail(e.to_string())
        })?;

        info!(device, label = label.as_str(), "formatting device");

        self.unmount_partitions(device);
        self.wipe(device)?;

        self.hard(
            Cmd::new("parted")
                .args(["-s", device, "mklabel", "msdos"])
                .sudo(),
            device,
            "creating msdos partition table",
        )?;

        self.hard(
            Cmd::new("parted")
                .args(["-s", "-a", "optimal", device, "mkpart", "primary", "fat32", "1MiB", "100%"])
                .sudo(),
            device,
            "creating FAT32 partition",
        )?;
        self.hard(
            Cmd::new("parted")
                .args(["-s", device, "set", "1", "boot", "on"])
                .sudo(),
            device,
            "setting boot flag",
        )?;
        self.reread_partitions(device);

        let candidates = partition_candidates(device);
        let partition = wait_for_partition(&candidates, self.settle_timeout).ok_or_else(|| {
            Error::new(
                ErrorKind::FormatFailed,
                format!("partition of {} did not appear", device),
            )
            .with_detail(format!(
                "waited {:?} for {}",
                self.settle_timeout,
                candidates.join(" or ")
            ))
        })?;

        self.hard(
            Cmd::new("mkfs.fat")
                .args(["-F", "32", "-n", label.as_str(), &partition])
                .sudo(),
            &partition,
            "creating FAT32 filesystem",
        )?;

        info!(device, partition = %partition, "format complete");
        Ok(partition)
    }

    /// Best-effort unmount of every mounted partition of `device`.
    fn unmount_partitions(&self, device: &str) {
        let listing = Cmd::new("lsblk")
            .args(["-J", "-o", lsblk::TREE_COLUMNS, device])
            .allow_fail()
            .run_with(self.runner);
        let nodes = match listing.map(|r| lsblk::parse_tree(&r.stdout)) {
            Ok(Ok(nodes)) => nodes,
            _ => {
                warn!(device, "could not list partitions; skipping unmount");
                return;
            }
        };
        for (name, mount_point) in lsblk::mounted(&nodes) {
            let result = Cmd::new("umount").arg(mount_point).sudo().run_with(self.runner);
            match result {
                Ok(_) => info!(partition = name, mount_point, "unmounted"),
                Err(e) => warn!(partition = name, mount_point, error = %e, "unmount failed"),
            }
        }
    }

    fn wipe(&self, device: &str) -> Result<()> {
        self.hard(
            Cmd::new("wipefs").args(["-a", device]).sudo(),
            device,
            "erasing filesystem signatures",
        )?;
        self.hard(
            Cmd::new("sgdisk").args(["--zap-all", device]).sudo(),
            device,
            "zapping GPT and MBR structures",
        )?;

        let count = (WIPE_BYTES >> 20).to_string();
        self.hard(
            Cmd::new("dd")
                .args([
                    "if=/dev/zero".to_string(),
                    format!("of={}", device),
                    "bs=1M".to_string(),
                    format!("count={}", count),
                    "conv=fsync".to_string(),
                    "status=none".to_string(),
                ])
                .sudo(),
            device,
            "zeroing start of device",
        )?;

        match self.device_size(device) {
            Some(size) if size > WIPE_BYTES => {
                self.hard(
                    Cmd::new("dd")
                        .args([
                            "if=/dev/zero".to_string(),
                            format!("of={}", device),
                            "bs=1M".to_string(),
                            format!("count={}", count),
                            "oflag=seek_bytes".to_string(),
                            format!("seek={}", size - WIPE_BYTES),
                            "conv=fsync".to_string(),
                            "status=none".to_string(),
                        ])
                        .sudo(),
                    device,
                    "zeroing end of device",
                )?;
            }
            _ => warn!(device, "device size unknown; skipping tail wipe"),
        }

        self.reread_partitions(device);
        Ok(())
    }

    fn device_size(&self, device: &str) -> Option<u64> {
        Cmd::new("lsblk")
            .args(["-b", "-d", "-n", "-o", "SIZE", device])
            .run_with(self.runner)
            .ok()
            .and_then(|r| r.stdout_trimmed().parse().ok())
    }

    fn reread_partitions(&self, device: &str) {
        if let Err(e) = Cmd::new("partprobe").arg(device).sudo().run_with(self.runner) {
            warn!(device, error = %e, "partprobe failed");
        }
    }

    fn hard(&self, cmd: Cmd, target: &str, step: &str) -> Result<()> {
        let tool = cmd.program().to_string();
        cmd.run_with(self.runner)
            .map(|_| ())
            .map_err(|e| format_failure(&tool, target, step, e))
    }
}

/// Map a failed format step to an error. A "busy" device is reported as
/// in use rather than as a generic format failure.
fn format_failure(tool: &str, target: &str, step: &str, err: anyhow::Error) -> Error {
    let detail = format!("{:#}", err);
    let kind = if detail.to_ascii_lowercase().contains("busy") {
        ErrorKind::DeviceInUse
    } else {
        ErrorKind::FormatFailed
    };
    Error::new(kind, format!("{} failed on {} ({})", tool, target, step)).with_detail(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::ScriptedRunner;
    use crate::process::CommandResult;
    use std::fs;

    const SIZE: &str = "16008609792\n";

    fn fake_device(dir: &tempfile::TempDir) -> String {
        let device = dir.path().join("sdb").to_string_lossy().into_owned();
        fs::write(&device, b"").unwrap();
        fs::write(format!("{}1", device), b"").unwrap();
        device
    }

    #[test]
    fn runs_pipeline_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let device = fake_device(&temp);
        let tree = r#"{"blockdevices":[{"name":"sdb","fstype":null,"mountpoint":null,"children":[{"name":"sdb1","fstype":"vfat","mountpoint":"/media/u/OLD"}]}]}"#;
        let runner = ScriptedRunner::new()
            .on("lsblk -J", CommandResult::ok(tree))
            .on("lsblk -b -d", CommandResult::ok(SIZE));

        let label = VolumeLabel::new("syntropy-node").unwrap();
        let partition = LinuxFormatter::new(&runner).format(&device, &label).unwrap();
        assert_eq!(partition, format!("{}1", device));

        let calls = runner.calls();
        let expected = vec![
            format!("lsblk -J -o NAME,FSTYPE,MOUNTPOINT {}", device),
            "sudo umount /media/u/OLD".to_string(),
            format!("sudo wipefs -a {}", device),
            format!("sudo sgdisk --zap-all {}", device),
            format!("sudo dd if=/dev/zero of={} bs=1M count=10 conv=fsync status=none", device),
            format!("lsblk -b -d -n -o SIZE {}", device),
            format!(
                "sudo dd if=/dev/zero of={} bs=1M count=10 oflag=seek_bytes seek=15998124032 conv=fsync status=none",
                device
            ),
            format!("sudo partprobe {}", device),
            format!("sudo parted -s {} mklabel msdos", device),
            format!("sudo parted -s -a optimal {} mkpart primary fat32 1MiB 100%", device),
            format!("sudo parted -s {} set 1 boot on", device),
            format!("sudo partprobe {}", device),
            format!("sudo mkfs.fat -F 32 -n SYNTROPY-NO {}1", device),
        ];
        assert_eq!(calls, expected);
    }

    #[test]
    fn aborts_on_first_hard_error() {
        let temp = tempfile::tempdir().unwrap();
        let device = fake_device(&temp);
        let runner = ScriptedRunner::new()
            .on("lsblk -J", CommandResult::ok(r#"{"blockdevices":[]}"#))
            .on("sudo parted -s", CommandResult::failed(1, "Error: Partition table unreadable"));

        let err = LinuxFormatter::new(&runner)
            .format(&device, &VolumeLabel::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatFailed);
        assert!(err.to_string().contains("parted failed"));
        assert!(!runner.calls().iter().any(|c| c.contains("mkfs.fat")));
    }

    #[test]
    fn busy_device_is_in_use() {
        let temp = tempfile::tempdir().unwrap();
        let device = fake_device(&temp);
        let runner = ScriptedRunner::new().on(
            "sudo wipefs",
            CommandResult::failed(1, "wipefs: error: /dev/sdb: probing initialization failed: Device or resource busy"),
        );
        let err = LinuxFormatter::new(&runner)
            .format(&device, &VolumeLabel::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceInUse);
    }

    #[test]
    fn missing_tool_is_named() {
        let runner = ScriptedRunner::new().without("mkfs.fat");
        let err = LinuxFormatter::new(&runner)
            .format("/dev/sdb", &VolumeLabel::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatFailed);
        assert!(err.to_string().contains("mkfs.fat"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_partition_node_times_out() {
        let temp = tempfile::tempdir().unwrap();
        let device = temp.path().join("sdq").to_string_lossy().into_owned();
        let runner = ScriptedRunner::new().on("lsblk -b -d", CommandResult::ok(SIZE));
        let err = LinuxFormatter::new(&runner)
            .with_settle_timeout(Duration::from_millis(150))
            .format(&device, &VolumeLabel::default())
            .unwrap_err();
        assert!(err.to_string().contains("did not appear"));
    }
}
