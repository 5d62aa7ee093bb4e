//! Scoped mount points.
//!
//! A [`MountHandle`] owns `<work_dir>/mount` for as long as it lives. Release
//! is idempotent and runs on drop, so every path out of a stage detaches the
//! filesystem. The directory is removed with `remove_dir`, never recursively:
//! if the unmount failed, the device contents stay untouched.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::create_dir_mode;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::host::{HostOps, MountMode};

/// Mount point directory name under the work directory.
pub const MOUNT_DIR_NAME: &str = "mount";

pub struct MountHandle<'a> {
    host: &'a dyn HostOps,
    partition: String,
    mount_point: PathBuf,
    released: bool,
}

impl MountHandle<'_> {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Unmount and remove the mount directory. Errors are logged, not returned.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.host.unmount(&self.mount_point) {
            warn!(mount_point = %self.mount_point.display(), error = %e, "unmount failed during release");
        }
        if let Err(e) = fs::remove_dir(&self.mount_point) {
            warn!(mount_point = %self.mount_point.display(), error = %e, "could not remove mount point");
        }
        debug!(partition = %self.partition, "mount released");
    }
}

impl Drop for MountHandle<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Mount `partition` on `<work_dir>/mount` in `mode`.
///
/// A mount point left behind by an interrupted run is unmounted and
/// removed first. If it cannot be emptied, mounting fails.
pub fn mount<'a>(
    host: &'a dyn HostOps,
    partition: &str,
    work_dir: &Path,
    mode: MountMode,
) -> Result<MountHandle<'a>> {
    let mount_point = work_dir.join(MOUNT_DIR_NAME);
    if mount_point.exists() {
        reclaim(host, &mount_point)?;
    }

    create_dir_mode(&mount_point, 0o755).kind(
        ErrorKind::MountFailed,
        format!("cannot create mount point {}", mount_point.display()),
    )?;

    if let Err(e) = host.mount(partition, &mount_point, mode) {
        let _ = fs::remove_dir(&mount_point);
        return Err(e);
    }

    Ok(MountHandle {
        host,
        partition: partition.to_string(),
        mount_point,
        released: false,
    })
}

fn reclaim(host: &dyn HostOps, mount_point: &Path) -> Result<()> {
    debug!(mount_point = %mount_point.display(), "reclaiming stale mount point");
    if let Err(e) = host.unmount(mount_point) {
        debug!(error = %e, "stale mount point was not mounted");
    }
    fs::remove_dir(mount_point).map_err(|e| {
        Error::new(
            ErrorKind::MountFailed,
            format!(
                "stale mount point {} is busy or not empty",
                mount_point.display()
            ),
        )
        .with_detail(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, PathProbe, SystemDiskCheck};
    use crate::node::VolumeLabel;
    use crate::platform::Platform;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingHost {
        calls: RefCell<Vec<String>>,
        fail_mount: bool,
    }

    impl HostOps for RecordingHost {
        fn platform(&self) -> Platform {
            Platform::NativeLinux
        }
        fn enumerate(&self) -> Result<Vec<Device>> {
            Ok(Vec::new())
        }
        fn probe(&self, _: &str) -> PathProbe {
            PathProbe::BlockDevice
        }
        fn is_system_disk(&self, _: &str) -> SystemDiskCheck {
            SystemDiskCheck::Clear
        }
        fn existing_filesystem(&self, _: &str) -> Option<String> {
            None
        }
        fn format(&self, path: &str, _: &VolumeLabel) -> Result<String> {
            Ok(format!("{}1", path))
        }
        fn mount(&self, partition: &str, mount_point: &Path, _: MountMode) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("mount {} {}", partition, mount_point.display()));
            if self.fail_mount {
                Err(Error::new(ErrorKind::MountFailed, "mount refused"))
            } else {
                Ok(())
            }
        }
        fn unmount(&self, mount_point: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("unmount {}", mount_point.display()));
            Ok(())
        }
    }

    #[test]
    fn release_is_idempotent_and_removes_dir() {
        let temp = tempfile::tempdir().unwrap();
        let host = RecordingHost::default();
        let mut handle = mount(&host, "/dev/sdb1", temp.path(), MountMode::Payload).unwrap();
        let mp = handle.mount_point().to_path_buf();
        assert!(mp.is_dir());

        handle.release();
        handle.release();
        drop(handle);

        assert!(!mp.exists());
        let unmounts = host
            .calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("unmount"))
            .count();
        assert_eq!(unmounts, 1);
    }

    #[test]
    fn drop_releases() {
        let temp = tempfile::tempdir().unwrap();
        let host = RecordingHost::default();
        {
            let _handle = mount(&host, "/dev/sdb1", temp.path(), MountMode::Payload).unwrap();
        }
        assert!(!temp.path().join(MOUNT_DIR_NAME).exists());
        assert_eq!(host.calls.borrow().len(), 2);
    }

    #[test]
    fn failed_mount_leaves_no_directory() {
        let temp = tempfile::tempdir().unwrap();
        let host = RecordingHost {
            fail_mount: true,
            ..Default::default()
        };
        let err = mount(&host, "/dev/sdb1", temp.path(), MountMode::Payload).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MountFailed);
        assert!(!temp.path().join(MOUNT_DIR_NAME).exists());
    }

    #[test]
    fn stale_empty_mount_point_is_reclaimed() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join(MOUNT_DIR_NAME)).unwrap();
        let host = RecordingHost::default();
        let handle = mount(&host, "/dev/sdb1", temp.path(), MountMode::Payload).unwrap();
        assert!(host.calls.borrow()[0].starts_with("unmount"));
        drop(handle);
    }

    #[test]
    fn stale_non_empty_mount_point_is_refused() {
        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join(MOUNT_DIR_NAME);
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join("user-data"), "keep me").unwrap();
        let host = RecordingHost::default();
        let err = mount(&host, "/dev/sdb1", temp.path(), MountMode::Payload).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MountFailed);
        assert!(stale.join("user-data").exists());
    }
}
