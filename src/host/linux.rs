//! Linux-family provider (native Linux and Linux under Windows).

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{HostOps, MountMode};
use crate::device::lsblk::{self, TreeNode};
use crate::device::safety::linux_system_disk_check;
use crate::device::windows::{parse_disk_lines, wsl_devices, USB_DISK_QUERY};
use crate::device::{Device, PathProbe, SystemDiskCheck};
use crate::error::{Error, ErrorKind, Result};
use crate::format::linux::LinuxFormatter;
use crate::format::windows::powershell;
use crate::node::VolumeLabel;
use crate::platform::Platform;
use crate::process::{self, Cmd, Runner, SystemRunner};

const UNMOUNT_ATTEMPTS: u32 = 3;
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct LinuxHost {
    platform: Platform,
    runner: Box<dyn Runner>,
    fstab_path: PathBuf,
    disk_links: PathBuf,
    probe_fn: fn(&str) -> PathProbe,
}

impl LinuxHost {
    pub fn new(platform: Platform) -> Self {
        Self::with_runner(platform, Box::new(SystemRunner))
    }

    pub fn with_runner(platform: Platform, runner: Box<dyn Runner>) -> Self {
        Self {
            platform,
            runner,
            fstab_path: PathBuf::from("/etc/fstab"),
            disk_links: PathBuf::from("/dev/disk"),
            probe_fn: probe_path,
        }
    }

    /// Read fstab from `path` instead of `/etc/fstab`.
    pub fn with_fstab(mut self, path: impl Into<PathBuf>) -> Self {
        self.fstab_path = path.into();
        self
    }

    /// Resolve `UUID=`/`LABEL=`/`PARTUUID=` and `/dev/disk/...` specs through
    /// `dir` instead of `/dev/disk`.
    pub fn with_disk_links(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_links = dir.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_probe(mut self, probe: fn(&str) -> PathProbe) -> Self {
        self.probe_fn = probe;
        self
    }

    fn tree(&self, path: &str) -> std::result::Result<Vec<TreeNode>, String> {
        let result = Cmd::new("lsblk")
            .args(["-J", "-o", lsblk::TREE_COLUMNS, path])
            .run_with(self.runner.as_ref())
            .map_err(|e| format!("cannot list partitions of {}: {:#}", path, e))?;
        lsblk::parse_tree(&result.stdout).map_err(|e| format!("{:#}", e))
    }

    fn resolve_spec(&self, spec: &str) -> Option<String> {
        if spec.starts_with('/') {
            let path = match spec.strip_prefix("/dev/disk/") {
                Some(rest) => self.disk_links.join(rest),
                None => PathBuf::from(spec),
            };
            return fs::canonicalize(path)
                .ok()
                .map(|p| p.to_string_lossy().into_owned());
        }
        let (key, value) = spec.split_once('=')?;
        let dir = match key {
            "UUID" => "by-uuid",
            "LABEL" => "by-label",
            "PARTUUID" => "by-partuuid",
            _ => return None,
        };
        let value = value.trim_matches('"');
        fs::canonicalize(self.disk_links.join(dir).join(value))
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn lsblk_devices(&self) -> Result<Vec<Device>> {
        let result = Cmd::new("lsblk")
            .args(["-J", "-b", "-d", "-o", lsblk::LIST_COLUMNS])
            .run_with(self.runner.as_ref())
            .map_err(|e| Error::from_anyhow(ErrorKind::Internal, "listing block devices failed", e))?;
        let rows = lsblk::parse_disks(&result.stdout)
            .map_err(|e| Error::from_anyhow(ErrorKind::Internal, "unexpected lsblk output", e))?;
        Ok(lsblk::candidates(&rows, self.platform)
            .into_iter()
            .filter(|d| (self.probe_fn)(d.path()) == PathProbe::BlockDevice)
            .collect())
    }

    /// Windows-side USB query mapped to `/dev/sdX`. Empty on any failure.
    fn windows_side_devices(&self) -> Vec<Device> {
        let output = match powershell(USB_DISK_QUERY).run_with(self.runner.as_ref()) {
            Ok(r) => r.stdout,
            Err(e) => {
                debug!(error = %e, "windows-side disk query unavailable");
                return Vec::new();
            }
        };
        match parse_disk_lines(&output) {
            Ok(disks) => wsl_devices(&disks, |p| (self.probe_fn)(p) == PathProbe::BlockDevice),
            Err(e) => {
                warn!(error = %e, "ignoring unparseable windows-side disk listing");
                Vec::new()
            }
        }
    }

    fn lazy_unmount(&self, mount_point: &Path) -> Result<()> {
        Cmd::new("umount")
            .args(["-f", "-l"])
            .arg_path(mount_point)
            .sudo()
            .run_with(self.runner.as_ref())
            .map(|_| ())
            .map_err(|e| {
                Error::from_anyhow(
                    ErrorKind::MountFailed,
                    format!("unmounting {} failed", mount_point.display()),
                    e,
                )
            })
    }
}

impl HostOps for LinuxHost {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn enumerate(&self) -> Result<Vec<Device>> {
        if self.platform == Platform::LinuxUnderWindows {
            let devices = self.windows_side_devices();
            if !devices.is_empty() {
                return Ok(devices);
            }
            debug!("no windows-side USB disks; falling back to lsblk");
            return Ok(self
                .lsblk_devices()?
                .into_iter()
                .map(|d| d.retagged(Platform::LinuxUnderWindows))
                .collect());
        }
        self.lsblk_devices()
    }

    fn probe(&self, path: &str) -> PathProbe {
        (self.probe_fn)(path)
    }

    fn is_system_disk(&self, path: &str) -> SystemDiskCheck {
        let fstab = fs::read_to_string(&self.fstab_path).ok();
        let tree = self.tree(path);
        linux_system_disk_check(
            self.platform,
            path,
            fstab.as_deref(),
            tree.as_deref().map_err(Clone::clone),
            |spec| self.resolve_spec(spec),
        )
    }

    fn existing_filesystem(&self, path: &str) -> Option<String> {
        let nodes = self.tree(path).ok()?;
        lsblk::existing_filesystem(&nodes).map(|n| format!("/dev/{}", n.name))
    }

    fn format(&self, path: &str, label: &VolumeLabel) -> Result<String> {
        LinuxFormatter::new(self.runner.as_ref()).format(path, label)
    }

    fn mount(&self, partition: &str, mount_point: &Path, mode: MountMode) -> Result<()> {
        process::require_tools(self.runner.as_ref(), &["sudo", "mount"]).map_err(|e| {
            Error::new(ErrorKind::MountFailed, "cannot mount: required tool missing")
                .with_detail(e.to_string())
        })?;

        let cmd = match mode {
            MountMode::Inspect => Cmd::new("mount").args(["-o", "ro"]),
            MountMode::Payload => {
                let cmd = Cmd::new("mount").args(["-t", "vfat"]);
                match owner_ids() {
                    Some((uid, gid)) => cmd
                        .arg("-o")
                        .arg(format!("uid={},gid={},umask=0022", uid, gid)),
                    None => cmd,
                }
            }
        };
        cmd.arg(partition)
            .arg_path(mount_point)
            .sudo()
            .run_with(self.runner.as_ref())
            .map_err(|e| {
                Error::from_anyhow(
                    ErrorKind::MountFailed,
                    format!("mounting {} on {} failed", partition, mount_point.display()),
                    e,
                )
            })?;
        info!(partition, mount_point = %mount_point.display(), ?mode, "mounted");
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        for attempt in 1..=UNMOUNT_ATTEMPTS {
            match Cmd::new("umount")
                .arg_path(mount_point)
                .sudo()
                .run_with(self.runner.as_ref())
            {
                Ok(_) => {
                    debug!(mount_point = %mount_point.display(), attempt, "unmounted");
                    return Ok(());
                }
                Err(e) => {
                    debug!(mount_point = %mount_point.display(), attempt, error = %e, "unmount failed");
                    if attempt < UNMOUNT_ATTEMPTS {
                        thread::sleep(UNMOUNT_RETRY_DELAY);
                    }
                }
            }
        }
        warn!(mount_point = %mount_point.display(), "falling back to lazy unmount");
        self.lazy_unmount(mount_point)
    }
}

fn probe_path(path: &str) -> PathProbe {
    match fs::metadata(path) {
        Err(_) => PathProbe::Missing,
        Ok(meta) if is_block(&meta) => PathProbe::BlockDevice,
        Ok(_) => PathProbe::NotBlockDevice,
    }
}

#[cfg(unix)]
fn is_block(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_block_device()
}

#[cfg(not(unix))]
fn is_block(_: &fs::Metadata) -> bool {
    false
}

/// Owner of files on the mounted FAT filesystem.
#[cfg(unix)]
fn owner_ids() -> Option<(u32, u32)> {
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    unsafe { Some((libc::getuid(), libc::getgid())) }
}

#[cfg(not(unix))]
fn owner_ids() -> Option<(u32, u32)> {
    None
}
