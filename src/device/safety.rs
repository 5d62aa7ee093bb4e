//! Safe-to-wipe decisions.
//!
//! The checks here are pure over host state captured by the caller (fstab
//! text, lsblk tree, probe results) so the rules can be exercised without a
//! real host. [`validate`] composes them with a [`HostOps`] provider.

use super::lsblk::{self, TreeNode};
use super::{PathProbe, SystemDiskCheck};
use crate::error::{Error, ErrorKind, Result};
use crate::host::HostOps;
use crate::platform::Platform;

/// Caller-side overrides for the safety checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyPolicy {
    /// Accept devices whose system-disk status could not be determined.
    pub force: bool,
    /// The caller runs with administrator rights.
    pub admin: bool,
}

impl SafetyPolicy {
    /// Refuse anything that is not clearly safe.
    pub fn strict() -> Self {
        Self::default()
    }

    /// A system disk is only ever accepted with force *and* admin rights.
    pub fn allows_system_disk(&self) -> bool {
        self.force && self.admin
    }
}

/// True if `candidate` names `disk` or one of its partitions
/// (`/dev/sdb`, `/dev/sdb1`, `/dev/nvme0n1p2`).
pub fn is_same_or_partition(disk: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(disk) {
        Some("") => true,
        Some(rest) => {
            let digits = rest.strip_prefix('p').unwrap_or(rest);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Active fstab lines as `(spec, mount point)`.
fn fstab_lines(fstab: &str) -> impl Iterator<Item = (&str, &str)> {
    fstab.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut fields = line.split_whitespace();
        Some((fields.next()?, fields.next()?))
    })
}

/// Device path named by an fstab spec. Tag specs (`UUID=` ...) and path
/// specs both go through `resolve`; a `/dev/` path that cannot be resolved
/// is taken as written.
fn spec_device(spec: &str, resolve: &impl Fn(&str) -> Option<String>) -> Option<String> {
    if spec.starts_with('/') || spec.contains('=') {
        resolve(spec).or_else(|| spec.starts_with("/dev/").then(|| spec.to_string()))
    } else {
        None
    }
}

/// Find an fstab entry backed by `disk`. `resolve` maps `UUID=`, `LABEL=`
/// and `PARTUUID=` specs, and symlinked paths such as
/// `/dev/disk/by-uuid/...`, to canonical device paths.
pub fn fstab_entry(
    fstab: &str,
    disk: &str,
    resolve: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    fstab_lines(fstab).find_map(|(spec, mount)| {
        let device = spec_device(spec, &resolve)?;
        is_same_or_partition(disk, &device)
            .then(|| format!("{} is listed in fstab for {}", device, mount))
    })
}

/// Find an fstab entry naming a node of the device tree, which covers
/// `/dev/mapper/<name>` volumes stacked on the disk's partitions.
pub fn fstab_holder(
    fstab: &str,
    nodes: &[TreeNode],
    resolve: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    fstab_lines(fstab).find_map(|(spec, mount)| {
        let device = spec_device(spec, &resolve);
        let names = [
            spec.strip_prefix("/dev/mapper/"),
            device.as_deref().and_then(|d| d.strip_prefix("/dev/")),
        ];
        nodes
            .iter()
            .find(|n| names.contains(&Some(n.name.as_str())))
            .map(|n| format!("{} ({}) is listed in fstab for {}", spec, n.name, mount))
    })
}

/// System-disk rules for Linux-family hosts, applied in order:
/// fstab, critical mounts, then the WSL-only primary-disk and swap rules.
///
/// `fstab` is None if the file could not be read; `tree` carries the lsblk
/// tree of the device or the reason it could not be listed.
pub fn linux_system_disk_check(
    platform: Platform,
    disk: &str,
    fstab: Option<&str>,
    tree: std::result::Result<&[TreeNode], String>,
    resolve: impl Fn(&str) -> Option<String>,
) -> SystemDiskCheck {
    if platform == Platform::NativeLinux {
        match fstab {
            Some(fstab) => {
                if let Some(reason) = fstab_entry(fstab, disk, &resolve) {
                    return SystemDiskCheck::System(reason);
                }
            }
            None => return SystemDiskCheck::Unknown("cannot read /etc/fstab".to_string()),
        }
    }

    if platform == Platform::LinuxUnderWindows && disk.trim_end_matches('/') == "/dev/sda" {
        return SystemDiskCheck::System("sda is the primary disk under WSL".to_string());
    }

    let nodes = match tree {
        Ok(nodes) => nodes,
        Err(reason) => return SystemDiskCheck::Unknown(reason),
    };

    if platform == Platform::NativeLinux {
        if let Some(reason) = fstab.and_then(|f| fstab_holder(f, nodes, &resolve)) {
            return SystemDiskCheck::System(reason);
        }
    }

    if let Some(mount) = lsblk::critical_mount(nodes) {
        return SystemDiskCheck::System(format!("{} backs {}", disk, mount));
    }

    if platform == Platform::LinuxUnderWindows {
        if let Some(part) = lsblk::swap_partition(nodes) {
            return SystemDiskCheck::System(format!("{} holds swap", part));
        }
    }

    SystemDiskCheck::Clear
}

/// System-disk rule for native Windows: disk 0 is always the system disk.
/// `boot_or_system` is the host's own IsBoot/IsSystem answer, if available.
pub fn windows_system_disk_check(
    disk_number: Option<u32>,
    boot_or_system: std::result::Result<bool, String>,
) -> SystemDiskCheck {
    match disk_number {
        None => SystemDiskCheck::Unknown("not a PhysicalDrive path".to_string()),
        Some(0) => SystemDiskCheck::System("PhysicalDrive0 is the system disk".to_string()),
        Some(n) => match boot_or_system {
            Ok(true) => SystemDiskCheck::System(format!("disk {} is a boot or system disk", n)),
            Ok(false) => SystemDiskCheck::Clear,
            Err(reason) => SystemDiskCheck::Unknown(reason),
        },
    }
}

/// Validate that `path` may be wiped.
///
/// Checks existence, block-device type, then the system-disk rules. An
/// unknown verdict is accepted only with `policy.force`; a system disk only
/// with `policy.allows_system_disk()`.
pub fn validate(host: &dyn HostOps, path: &str, policy: SafetyPolicy) -> Result<()> {
    match host.probe(path) {
        PathProbe::Missing => {
            return Err(Error::new(
                ErrorKind::DeviceNotFound,
                format!("device {} does not exist", path),
            ))
        }
        PathProbe::NotBlockDevice => {
            return Err(Error::invalid_input(format!(
                "{} is not a block device",
                path
            )))
        }
        PathProbe::BlockDevice => {}
    }

    match host.is_system_disk(path) {
        SystemDiskCheck::Clear => Ok(()),
        SystemDiskCheck::System(reason) => {
            if policy.allows_system_disk() {
                tracing::warn!(device = path, %reason, "system disk accepted by explicit override");
                Ok(())
            } else {
                Err(Error::new(
                    ErrorKind::DeviceIsSystem,
                    format!("refusing to use {}: classified as a system disk", path),
                )
                .with_detail(reason))
            }
        }
        SystemDiskCheck::Unknown(reason) => {
            if policy.force {
                tracing::warn!(device = path, %reason, "system-disk status unknown; continuing (--force)");
                Ok(())
            } else {
                Err(Error::new(
                    ErrorKind::DeviceIsSystem,
                    format!(
                        "cannot confirm {} is not a system disk (use --force to override)",
                        path
                    ),
                )
                .with_detail(reason))
            }
        }
    }
}
