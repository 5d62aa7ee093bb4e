//! File helpers that apply Unix permission bits.
//!
//! On non-Unix hosts the mode arguments are ignored.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Write `content`, creating missing parents.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write `content` and then chmod to `mode`. Key material uses 0o600, every
/// other payload file 0o644.
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    set_mode(path, mode)
}

/// Create `path` with mode 0o600 and write `content`. The file is never
/// readable by group or other, even transiently, and an existing file is
/// an error. The parent directory must exist.
pub fn write_private_file<C: AsRef<[u8]>>(path: &Path, content: C) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_ref())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    set_mode(path, 0o600)
}

/// Create a directory tree and set the mode of its leaf.
pub fn create_dir_mode(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path.display()))?;
    set_mode(path, mode)
}

/// Set Unix permission bits.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode {:o} on {}", mode, path.display()))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Unix permission bits of `path`, if the platform has them.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn mode_of(_path: &Path) -> Option<u32> {
    None
}

/// Set Unix permission bits where the filesystem supports them. FAT
/// filesystems reject chmod; that is logged and ignored.
pub fn set_mode_best_effort(path: &Path, mode: u32) {
    if let Err(e) = set_mode(path, mode) {
        tracing::debug!(path = %path.display(), error = %e, "filesystem ignores permission bits");
    }
}

/// Write a file and set its mode where the filesystem supports it.
pub fn write_file_mode_best_effort<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> Result<()> {
    let path = path.as_ref();
    write_file_with_dirs(path, content)?;
    set_mode_best_effort(path, mode);
    Ok(())
}
