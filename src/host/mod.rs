//! Platform providers for the device subsystem.
//!
//! Each provider implements the whole capability set the orchestrator
//! needs: enumerate, probe, system-disk check, format, mount and unmount.
//! The orchestrator is written against [`HostOps`] and never against a
//! concrete platform.

mod linux;
mod windows;

pub use linux::LinuxHost;
pub use windows::WindowsHost;

use std::path::Path;

use crate::device::{Device, PathProbe, SystemDiskCheck};
use crate::error::Result;
use crate::node::VolumeLabel;
use crate::platform::Platform;

/// How a partition is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// Read-only, filesystem type detected by the host. Confirms that an
    /// existing filesystem can be attached before the device is wiped.
    Inspect,
    /// Read-write FAT32 payload volume, owned by the invoking user.
    Payload,
}

/// Device operations of one host platform.
pub trait HostOps {
    fn platform(&self) -> Platform;

    /// Candidate removable devices. Never mutates devices and never
    /// requires elevation.
    fn enumerate(&self) -> Result<Vec<Device>>;

    /// Existence and block-device check for a path.
    fn probe(&self, path: &str) -> PathProbe;

    /// System-disk rules for the platform.
    fn is_system_disk(&self, path: &str) -> SystemDiskCheck;

    /// Partition (or whole device) holding an existing filesystem, if any.
    /// Swap and volume-manager members do not count.
    fn existing_filesystem(&self, path: &str) -> Option<String>;

    /// Wipe `path` and create one bootable FAT32 partition labelled
    /// `label`. Returns the partition to mount.
    fn format(&self, path: &str, label: &VolumeLabel) -> Result<String>;

    /// Mount `partition` on the existing directory `mount_point`.
    fn mount(&self, partition: &str, mount_point: &Path, mode: MountMode) -> Result<()>;

    /// Detach whatever is mounted on `mount_point`.
    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// Provider for `platform` backed by real host tools.
pub fn for_platform(platform: Platform) -> Box<dyn HostOps> {
    match platform {
        Platform::NativeLinux | Platform::LinuxUnderWindows => {
            Box::new(LinuxHost::new(platform))
        }
        Platform::NativeWindows => Box::new(WindowsHost::new()),
    }
}
