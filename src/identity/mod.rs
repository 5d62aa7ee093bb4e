//! Node identities: SSH key pairs and the shell fragments that install
//! them on the provisioned system.
//!
//! Fingerprints are always recomputed from public material that was just
//! read or written. Private material is wrapped in [`PrivateKey`], whose
//! `Debug` output is redacted.

mod commands;
mod keygen;
mod password;
mod store;

pub use commands::{
    install_commands, metadata_commands, startup_commands, NodeDescriptor, ADMIN_USER,
    METADATA_PATH, SERVICE_NAME,
};
pub use keygen::{KeyGenerator, SshKeygen};
pub use password::{hash_password, LOCKED_PASSWORD};
pub use store::{expand_home, generate_node_key, store_pair, IdentityStore, KeyMeta};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    Rsa4096,
    Ed25519,
}

impl KeyAlgorithm {
    /// `ssh-keygen -t` value.
    pub fn ssh_type(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa4096 => "rsa",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }

    /// `ssh-keygen -b` value, where the algorithm takes one.
    pub fn bits(self) -> Option<u32> {
        match self {
            KeyAlgorithm::Rsa4096 => Some(4096),
            KeyAlgorithm::Ed25519 => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa4096 => "rsa-4096",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }

    /// Algorithm named by an OpenSSH public key line.
    pub fn from_public_line(line: &str) -> Option<Self> {
        match line.split_whitespace().next()? {
            "ssh-ed25519" => Some(KeyAlgorithm::Ed25519),
            "ssh-rsa" => Some(KeyAlgorithm::Rsa4096),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// What a key pair is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPurpose {
    Owner,
    Community,
    Node,
}

impl KeyPurpose {
    pub fn tag(self) -> &'static str {
        match self {
            KeyPurpose::Owner => "owner",
            KeyPurpose::Community => "community",
            KeyPurpose::Node => "node",
        }
    }

    /// Owner and community keys are Ed25519; node keys are RSA-4096 for
    /// the installed system's SSH tooling.
    pub fn default_algorithm(self) -> KeyAlgorithm {
        match self {
            KeyPurpose::Node => KeyAlgorithm::Rsa4096,
            KeyPurpose::Owner | KeyPurpose::Community => KeyAlgorithm::Ed25519,
        }
    }

    /// File stem for this purpose (`owner`, `community`, `<node_name>`).
    pub fn file_stem(self, node_name: &str) -> String {
        match self {
            KeyPurpose::Node => node_name.to_string(),
            _ => self.tag().to_string(),
        }
    }

    /// Comment embedded in generated public keys.
    pub fn comment(self, node_name: &str) -> String {
        format!("syntropy-{}@{}", self.tag(), node_name)
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Private key text. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(material: impl Into<String>) -> Self {
        Self(material.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// An asymmetric key pair with its derived fingerprint.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub id: String,
    pub algorithm: KeyAlgorithm,
    pub public_material: String,
    pub private_material: PrivateKey,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub purpose: KeyPurpose,
}

impl KeyPair {
    /// Build a pair from key text. The public line is trimmed and the
    /// fingerprint derived from it.
    pub fn from_material(
        purpose: KeyPurpose,
        algorithm: KeyAlgorithm,
        public_material: &str,
        private_material: PrivateKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        let public_material = public_material.trim().to_string();
        let fingerprint = fingerprint(&public_material);
        let id = format!(
            "{}-{}",
            purpose.tag(),
            fingerprint
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .take(12)
                .collect::<String>()
        );
        Self {
            id,
            algorithm,
            public_material,
            private_material,
            fingerprint,
            created_at,
            purpose,
        }
    }
}

/// Base64 (standard alphabet, padded) SHA-256 of the trimmed public key line.
pub fn fingerprint(public_material: &str) -> String {
    STANDARD.encode(Sha256::digest(public_material.trim().as_bytes()))
}
