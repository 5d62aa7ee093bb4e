//! Host-side key storage and the on-device node key.
//!
//! Host layout, one directory per node so each `(purpose, node_name)` pair
//! maps to exactly one file set:
//!
//! ```text
//! <key_dir>/<node_name>/owner.key        0600
//! <key_dir>/<node_name>/owner.key.pub    0644
//! <key_dir>/<node_name>/owner.meta       0644
//! <key_dir>/<node_name>/community.*
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{KeyAlgorithm, KeyGenerator, KeyPair, KeyPurpose, PrivateKey};
use crate::common::{
    create_dir_mode, set_mode, set_mode_best_effort, write_file_mode,
    write_file_mode_best_effort, write_file_with_dirs, write_private_file,
};
use crate::error::{Error, ErrorKind, Result, ResultExt};

/// JSON sidecar written next to every host-side key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMeta {
    pub algorithm: KeyAlgorithm,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
    pub purpose: KeyPurpose,
}

fn public_path(private_path: &Path) -> PathBuf {
    let mut name = private_path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

fn meta_path(private_path: &Path) -> PathBuf {
    private_path.with_extension("meta")
}

/// Expand a leading `~` to the operator home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let path = path.trim();
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn keygen_err(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::KeygenFailed, message)
}

/// Read a key pair from `private_path` and its `.pub` sibling.
fn read_pair(private_path: &Path, purpose: KeyPurpose, created_at: DateTime<Utc>) -> Result<KeyPair> {
    let public_file = public_path(private_path);
    let public = fs::read_to_string(&public_file).kind(
        ErrorKind::KeygenFailed,
        format!("cannot read public key {}", public_file.display()),
    )?;
    let private = fs::read_to_string(private_path).kind(
        ErrorKind::KeygenFailed,
        format!("cannot read private key {}", private_path.display()),
    )?;
    let algorithm = KeyAlgorithm::from_public_line(&public).ok_or_else(|| {
        keygen_err(format!(
            "{} is not a supported OpenSSH public key",
            public_file.display()
        ))
    })?;
    Ok(KeyPair::from_material(
        purpose,
        algorithm,
        &public,
        PrivateKey::new(private),
        created_at,
    ))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Persistent owner/community keys under a key directory.
pub struct IdentityStore<'a> {
    key_dir: PathBuf,
    generator: &'a dyn KeyGenerator,
}

impl<'a> IdentityStore<'a> {
    pub fn new(key_dir: impl Into<PathBuf>, generator: &'a dyn KeyGenerator) -> Self {
        Self {
            key_dir: key_dir.into(),
            generator,
        }
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Private key path for `(purpose, node_name)`.
    pub fn key_path(&self, purpose: KeyPurpose, node_name: &str) -> PathBuf {
        self.key_dir
            .join(node_name)
            .join(format!("{}.key", purpose.file_stem(node_name)))
    }

    /// Load from `path_hint` when it is non-empty; otherwise reuse the stored
    /// pair for `(purpose, node_name)` or generate it.
    pub fn generate_or_load(
        &self,
        path_hint: &str,
        node_name: &str,
        purpose: KeyPurpose,
    ) -> Result<KeyPair> {
        if !path_hint.trim().is_empty() {
            return self.load(&expand_home(path_hint), purpose);
        }
        let path = self.key_path(purpose, node_name);
        if path.exists() {
            info!(purpose = purpose.tag(), path = %path.display(), "reusing stored key");
            return self.load(&path, purpose);
        }
        self.generate(purpose, node_name)
    }

    /// Load an existing pair. The fingerprint is recomputed from the public
    /// key; a disagreeing sidecar is reported and ignored.
    pub fn load(&self, private_path: &Path, purpose: KeyPurpose) -> Result<KeyPair> {
        if !private_path.exists() {
            return Err(keygen_err(format!(
                "key {} does not exist",
                private_path.display()
            )));
        }
        let meta = read_meta(&meta_path(private_path));
        let created_at = meta
            .as_ref()
            .map(|m| m.created_at)
            .or_else(|| modified_at(private_path))
            .unwrap_or_else(Utc::now);
        let pair = read_pair(private_path, purpose, created_at)?;
        if let Some(meta) = meta {
            if meta.fingerprint != pair.fingerprint {
                warn!(
                    path = %private_path.display(),
                    "stored fingerprint does not match public key; using recomputed value"
                );
            }
        }
        Ok(pair)
    }

    /// Generate a new pair. Refuses to replace an existing one.
    pub fn generate(&self, purpose: KeyPurpose, node_name: &str) -> Result<KeyPair> {
        let path = self.key_path(purpose, node_name);
        if path.exists() || public_path(&path).exists() {
            return Err(keygen_err(format!(
                "key {} already exists; rotate it to replace it",
                path.display()
            )));
        }
        let dir = path
            .parent()
            .ok_or_else(|| keygen_err(format!("{} has no parent directory", path.display())))?;
        create_dir_mode(dir, 0o700).kind(
            ErrorKind::KeygenFailed,
            format!("cannot create key directory {}", dir.display()),
        )?;

        let algorithm = purpose.default_algorithm();
        self.generator
            .generate(algorithm, &purpose.comment(node_name), &path)?;
        set_mode(&path, 0o600).kind(ErrorKind::KeygenFailed, "cannot restrict private key")?;
        set_mode(&public_path(&path), 0o644)
            .kind(ErrorKind::KeygenFailed, "cannot set public key mode")?;

        let pair = read_pair(&path, purpose, Utc::now())?;
        write_meta(&path, &pair)?;
        info!(
            purpose = purpose.tag(),
            fingerprint = %pair.fingerprint,
            path = %path.display(),
            "generated key pair"
        );
        Ok(pair)
    }

    /// Move the stored pair aside as `<file>.<timestamp>.bak` and generate a
    /// replacement.
    pub fn rotate(&self, purpose: KeyPurpose, node_name: &str) -> Result<KeyPair> {
        let path = self.key_path(purpose, node_name);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        for file in [path.clone(), public_path(&path), meta_path(&path)] {
            if file.exists() {
                let mut backup = file.as_os_str().to_owned();
                backup.push(format!(".{}.bak", stamp));
                fs::rename(&file, &backup).kind(
                    ErrorKind::KeygenFailed,
                    format!("cannot back up {}", file.display()),
                )?;
                info!(from = %file.display(), "rotated key file");
            }
        }
        self.generate(purpose, node_name)
    }
}

fn read_meta(path: &Path) -> Option<KeyMeta> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable key metadata");
            None
        }
    }
}

fn write_meta(private_path: &Path, pair: &KeyPair) -> Result<()> {
    let meta = KeyMeta {
        algorithm: pair.algorithm,
        created_at: pair.created_at,
        fingerprint: pair.fingerprint.clone(),
        purpose: pair.purpose,
    };
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|e| keygen_err("cannot encode key metadata").with_detail(e.to_string()))?;
    let path = meta_path(private_path);
    write_file_mode(&path, json + "\n", 0o644).kind(
        ErrorKind::KeygenFailed,
        format!("cannot write {}", path.display()),
    )
}

/// Generate the node's RSA-4096 key directly on the device at
/// `<keys_dir>/<node_name>.key`, plus a `.fingerprint` file.
///
/// Permission bits are applied where the filesystem keeps them.
pub fn generate_node_key(
    generator: &dyn KeyGenerator,
    keys_dir: &Path,
    node_name: &str,
) -> Result<KeyPair> {
    fs::create_dir_all(keys_dir).kind(
        ErrorKind::KeygenFailed,
        format!("cannot create {}", keys_dir.display()),
    )?;
    set_mode_best_effort(keys_dir, 0o750);

    let purpose = KeyPurpose::Node;
    let path = keys_dir.join(format!("{}.key", purpose.file_stem(node_name)));
    if path.exists() {
        return Err(keygen_err(format!("node key {} already exists", path.display())));
    }

    generator.generate(purpose.default_algorithm(), &purpose.comment(node_name), &path)?;
    set_mode_best_effort(&path, 0o600);
    set_mode_best_effort(&public_path(&path), 0o644);

    let pair = read_pair(&path, purpose, Utc::now())?;
    let fingerprint_file = keys_dir.join(format!("{}.fingerprint", node_name));
    write_file_mode_best_effort(&fingerprint_file, format!("{}\n", pair.fingerprint), 0o644)
        .kind(
            ErrorKind::KeygenFailed,
            format!("cannot write {}", fingerprint_file.display()),
        )?;
    info!(node = node_name, fingerprint = %pair.fingerprint, "generated node key");
    Ok(pair)
}

/// Write a pair produced elsewhere into the store layout. Used when
/// importing keys; refuses to overwrite.
pub fn store_pair(store: &IdentityStore<'_>, node_name: &str, pair: &KeyPair) -> Result<PathBuf> {
    let path = store.key_path(pair.purpose, node_name);
    if path.exists() {
        return Err(keygen_err(format!("key {} already exists", path.display())));
    }
    let dir = path
        .parent()
        .ok_or_else(|| keygen_err(format!("{} has no parent directory", path.display())))?;
    create_dir_mode(dir, 0o700).kind(
        ErrorKind::KeygenFailed,
        format!("cannot create key directory {}", dir.display()),
    )?;
    write_private_file(&path, pair.private_material.expose_secret()).kind(
        ErrorKind::KeygenFailed,
        format!("cannot write {}", path.display()),
    )?;
    write_file_with_dirs(public_path(&path), format!("{}\n", pair.public_material))
        .kind(ErrorKind::KeygenFailed, "cannot write public key")?;
    set_mode(&public_path(&path), 0o644).kind(ErrorKind::KeygenFailed, "cannot set public key mode")?;
    write_meta(&path, pair)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::mode_of;
    use std::cell::Cell;

    /// Writes deterministic fake OpenSSH files.
    #[derive(Default)]
    struct FakeKeygen {
        calls: Cell<u32>,
    }

    impl KeyGenerator for FakeKeygen {
        fn generate(&self, algorithm: KeyAlgorithm, comment: &str, private_path: &Path) -> Result<()> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            let kind = match algorithm {
                KeyAlgorithm::Ed25519 => "ssh-ed25519",
                KeyAlgorithm::Rsa4096 => "ssh-rsa",
            };
            fs::write(private_path, format!("PRIVATE {}", n)).unwrap();
            fs::write(public_path(private_path), format!("{} AAAA{} {}\n", kind, n, comment)).unwrap();
            Ok(())
        }
    }

    #[test]
    fn generate_then_reuse() {
        let temp = tempfile::tempdir().unwrap();
        let keygen = FakeKeygen::default();
        let store = IdentityStore::new(temp.path(), &keygen);

        let first = store.generate_or_load("", "node-01", KeyPurpose::Owner).unwrap();
        assert_eq!(first.algorithm, KeyAlgorithm::Ed25519);
        let path = store.key_path(KeyPurpose::Owner, "node-01");
        assert_eq!(path, temp.path().join("node-01/owner.key"));
        assert_eq!(mode_of(&path), Some(0o600));
        assert_eq!(mode_of(&public_path(&path)), Some(0o644));
        assert!(meta_path(&path).exists());

        let again = store.generate_or_load("", "node-01", KeyPurpose::Owner).unwrap();
        assert_eq!(keygen.calls.get(), 1);
        assert_eq!(again.public_material, first.public_material);
        assert_eq!(again.fingerprint, first.fingerprint);
        assert_eq!(again.created_at, first.created_at);
    }

    #[test]
    fn generate_refuses_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let keygen = FakeKeygen::default();
        let store = IdentityStore::new(temp.path(), &keygen);
        store.generate(KeyPurpose::Community, "n").unwrap();
        let err = store.generate(KeyPurpose::Community, "n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeygenFailed);
        assert!(err.to_string().contains("rotate"));
    }

    #[test]
    fn rotate_backs_up_and_regenerates() {
        let temp = tempfile::tempdir().unwrap();
        let keygen = FakeKeygen::default();
        let store = IdentityStore::new(temp.path(), &keygen);
        let old = store.generate(KeyPurpose::Owner, "n").unwrap();
        let new = store.rotate(KeyPurpose::Owner, "n").unwrap();
        assert_ne!(old.fingerprint, new.fingerprint);

        let backups: Vec<String> = fs::read_dir(temp.path().join("n"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".bak"))
            .collect();
        assert_eq!(backups.len(), 3, "{:?}", backups);
    }

    #[test]
    fn load_from_hint_recomputes_fingerprint() {
        let temp = tempfile::tempdir().unwrap();
        let key = temp.path().join("elsewhere.key");
        fs::write(&key, "PRIVATE").unwrap();
        fs::write(public_path(&key), "ssh-ed25519 AAAAexisting me@host\n").unwrap();
        fs::write(
            meta_path(&key),
            r#"{"algorithm":"ed25519","created_at":"2024-01-01T00:00:00Z","fingerprint":"bogus","purpose":"owner"}"#,
        )
        .unwrap();

        let keygen = FakeKeygen::default();
        let store = IdentityStore::new(temp.path().join("store"), &keygen);
        let pair = store
            .generate_or_load(key.to_str().unwrap(), "node-01", KeyPurpose::Owner)
            .unwrap();
        assert_eq!(keygen.calls.get(), 0);
        assert_eq!(pair.public_material, "ssh-ed25519 AAAAexisting me@host");
        assert_eq!(pair.fingerprint, super::super::fingerprint("ssh-ed25519 AAAAexisting me@host"));
        assert_eq!(pair.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn missing_hint_is_keygen_failed() {
        let temp = tempfile::tempdir().unwrap();
        let keygen = FakeKeygen::default();
        let store = IdentityStore::new(temp.path(), &keygen);
        let err = store
            .generate_or_load("/nonexistent/owner.key", "n", KeyPurpose::Owner)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeygenFailed);
    }

    #[test]
    fn store_then_load_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let keygen = FakeKeygen::default();
        let store = IdentityStore::new(temp.path(), &keygen);
        let pair = KeyPair::from_material(
            KeyPurpose::Community,
            KeyAlgorithm::Ed25519,
            "ssh-ed25519 AAAAimported c@x",
            PrivateKey::new("PRIVATE imported"),
            Utc::now(),
        );
        let path = store_pair(&store, "n", &pair).unwrap();
        let loaded = store.generate_or_load("", "n", KeyPurpose::Community).unwrap();
        assert_eq!(mode_of(&path), Some(0o600));
        assert_eq!(mode_of(path.parent().unwrap()), Some(0o700));
        assert_eq!(loaded.algorithm, pair.algorithm);
        assert_eq!(loaded.public_material, pair.public_material);
        assert_eq!(loaded.fingerprint, pair.fingerprint);
        assert_eq!(keygen.calls.get(), 0);
    }

    #[test]
    fn node_key_written_on_device_layout() {
        let temp = tempfile::tempdir().unwrap();
        let keys = temp.path().join("syntropy/keys");
        let keygen = FakeKeygen::default();
        let pair = generate_node_key(&keygen, &keys, "node-01").unwrap();
        assert_eq!(pair.algorithm, KeyAlgorithm::Rsa4096);
        assert_eq!(pair.purpose, KeyPurpose::Node);
        assert_eq!(mode_of(&keys.join("node-01.key")), Some(0o600));
        assert_eq!(mode_of(&keys), Some(0o750));
        assert_eq!(
            fs::read_to_string(keys.join("node-01.fingerprint")).unwrap().trim(),
            pair.fingerprint
        );
    }

    #[test]
    fn tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.syntropy/keys/owner.key"), home.join(".syntropy/keys/owner.key"));
        }
        assert_eq!(expand_home("/abs/owner.key"), PathBuf::from("/abs/owner.key"));
    }
}
