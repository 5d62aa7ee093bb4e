//! Installer image cache.
//!
//! Acquiring the OS installer image is separate from the provisioning
//! pipeline: a missing or corrupt image never fails a run. This module only
//! finds an image already in the cache directory and checks it against an
//! optional SHA-256. Downloading is behind [`ImageSource`]; no network
//! source ships with the crate.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// An image present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercase hex, set once verified.
    pub sha256: Option<String>,
}

/// Something that can place an image into the cache directory.
pub trait ImageSource {
    /// File name the image is stored under.
    fn file_name(&self) -> &str;

    /// Expected SHA-256 (lowercase hex), if published.
    fn sha256(&self) -> Option<&str> {
        None
    }

    /// Write the image to `dest`.
    fn fetch(&self, dest: &Path) -> Result<()>;
}

/// Installer images under one directory.
#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Find `file_name` in the cache. Empty files count as absent.
    pub fn find(&self, file_name: &str) -> Option<CachedImage> {
        let path = self.dir.join(file_name);
        let meta = path.metadata().ok()?;
        if !meta.is_file() || meta.len() == 0 {
            debug!(path = %path.display(), "no usable cached image");
            return None;
        }
        Some(CachedImage {
            path,
            size_bytes: meta.len(),
            sha256: None,
        })
    }

    /// Find `file_name` and, if `expected` is given, verify its checksum.
    pub fn verified(&self, file_name: &str, expected: Option<&str>) -> Result<CachedImage> {
        let mut image = self
            .find(file_name)
            .with_context(|| format!("{} is not in {}", file_name, self.dir.display()))?;
        if let Some(expected) = expected {
            verify_sha256(&image.path, expected)?;
            image.sha256 = Some(expected.to_lowercase());
        }
        Ok(image)
    }

    /// Return the cached image, fetching it from `source` if absent. A fetched
    /// image that fails verification is removed.
    pub fn ensure(&self, source: &dyn ImageSource) -> Result<CachedImage> {
        let name = source.file_name();
        if self.find(name).is_some() {
            return self.verified(name, source.sha256());
        }

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let dest = self.dir.join(name);
        info!(image = name, "fetching installer image");
        source.fetch(&dest)?;

        match self.verified(name, source.sha256()) {
            Ok(image) => Ok(image),
            Err(e) => {
                let _ = std::fs::remove_file(&dest);
                Err(e)
            }
        }
    }
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} for checksum", path.display()))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail with expected vs actual if the checksum differs.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual != expected.trim().to_lowercase() {
        bail!(
            "Checksum mismatch for {}\n  expected: {}\n  actual:   {}",
            path.display(),
            expected.trim(),
            actual
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    // sha256("hello\n")
    const HELLO: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    struct StaticSource {
        body: &'static str,
        sha256: Option<&'static str>,
        fetched: Cell<u32>,
    }

    impl ImageSource for StaticSource {
        fn file_name(&self) -> &str {
            "installer.iso"
        }
        fn sha256(&self) -> Option<&str> {
            self.sha256
        }
        fn fetch(&self, dest: &Path) -> Result<()> {
            self.fetched.set(self.fetched.get() + 1);
            std::fs::write(dest, self.body)?;
            Ok(())
        }
    }

    #[test]
    fn find_ignores_empty_files() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("empty.iso"), "").unwrap();
        std::fs::write(temp.path().join("real.iso"), "hello\n").unwrap();
        let cache = ImageCache::new(temp.path());
        assert!(cache.find("empty.iso").is_none());
        assert!(cache.find("missing.iso").is_none());
        assert_eq!(cache.find("real.iso").unwrap().size_bytes, 6);
    }

    #[test]
    fn checksum_is_case_insensitive() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("real.iso"), "hello\n").unwrap();
        let cache = ImageCache::new(temp.path());
        let image = cache.verified("real.iso", Some(&HELLO.to_uppercase())).unwrap();
        assert_eq!(image.sha256.as_deref(), Some(HELLO));
    }

    #[test]
    fn mismatch_reports_both_digests() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("real.iso"), "tampered\n").unwrap();
        let err = verify_sha256(&temp.path().join("real.iso"), HELLO).unwrap_err();
        assert!(err.to_string().contains(HELLO));
    }

    #[test]
    fn ensure_fetches_once() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(temp.path().join("cache"));
        let source = StaticSource {
            body: "hello\n",
            sha256: Some(HELLO),
            fetched: Cell::new(0),
        };
        cache.ensure(&source).unwrap();
        cache.ensure(&source).unwrap();
        assert_eq!(source.fetched.get(), 1);
    }

    #[test]
    fn bad_fetch_is_removed() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(temp.path());
        let source = StaticSource {
            body: "tampered\n",
            sha256: Some(HELLO),
            fetched: Cell::new(0),
        };
        assert!(cache.ensure(&source).is_err());
        assert!(!temp.path().join("installer.iso").exists());
    }
}
