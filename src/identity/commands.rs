//! Shell fragments run by cloud-init on the installed node.
//!
//! Each fragment is plain POSIX sh. Values that come from the operator are
//! embedded through quoted heredocs or single-quoted strings, never
//! interpolated into live shell syntax.

use serde::Serialize;

use super::KeyPair;
use crate::node::Coordinates;

/// Account that receives the owner and community keys.
pub const ADMIN_USER: &str = "syntropy";

/// Node descriptor location on the installed system.
pub const METADATA_PATH: &str = "/opt/syntropy/metadata/node.json";

/// Unit enabled on first boot.
pub const SERVICE_NAME: &str = "syntropy-node.service";

const FINGERPRINT_PATH: &str = "/opt/syntropy/identity/fingerprints";

/// Quote `value` for sh.
pub(crate) fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Fragment that authorizes the owner and community keys for the admin
/// account and records their fingerprints.
pub fn install_commands(owner: &KeyPair, community: &KeyPair) -> String {
    let home = format!("/home/{}", ADMIN_USER);
    format!(
        r#"install -d -m 0700 -o {user} -g {user} {home}/.ssh
cat >> {home}/.ssh/authorized_keys <<'SYNTROPY_KEYS'
{owner}
{community}
SYNTROPY_KEYS
chown {user}:{user} {home}/.ssh/authorized_keys
chmod 0600 {home}/.ssh/authorized_keys
install -d -m 0755 /opt/syntropy/identity
printf '%s %s\n' owner {owner_fp} community {community_fp} > {fp_path}
chmod 0644 {fp_path}"#,
        user = ADMIN_USER,
        home = home,
        owner = owner.public_material,
        community = community.public_material,
        owner_fp = sh_quote(&owner.fingerprint),
        community_fp = sh_quote(&community.fingerprint),
        fp_path = FINGERPRINT_PATH,
    )
}

/// JSON document written to [`METADATA_PATH`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescriptor<'a> {
    pub node_name: &'a str,
    pub description: &'a str,
    pub coordinates: Option<Coordinates>,
}

/// Fragment that writes the node descriptor.
pub fn metadata_commands(
    node_name: &str,
    coordinates: Option<Coordinates>,
    description: &str,
) -> String {
    let descriptor = NodeDescriptor {
        node_name,
        description,
        coordinates,
    };
    // strings and finite floats only; serialization cannot fail
    let json = serde_json::to_string_pretty(&descriptor).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"install -d -m 0755 /opt/syntropy/metadata
cat > {path} <<'SYNTROPY_METADATA'
{json}
SYNTROPY_METADATA
chmod 0644 {path}"#,
        path = METADATA_PATH,
        json = json,
    )
}

/// Fragment that installs and enables the node service unit.
pub fn startup_commands(node_name: &str) -> String {
    format!(
        r#"cat > /etc/systemd/system/{service} <<'SYNTROPY_UNIT'
[Unit]
Description=Syntropy grid node
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
Environment=SYNTROPY_NODE_NAME={node}
Environment=SYNTROPY_METADATA={metadata}
ExecStart=/opt/syntropy/bin/syntropy-node
Restart=on-failure
RestartSec=10

[Install]
WantedBy=multi-user.target
SYNTROPY_UNIT
chmod 0644 /etc/systemd/system/{service}
systemctl daemon-reload
systemctl enable {service}"#,
        service = SERVICE_NAME,
        node = node_name,
        metadata = METADATA_PATH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{KeyAlgorithm, KeyPurpose, PrivateKey};
    use chrono::Utc;

    fn pair(purpose: KeyPurpose, public: &str) -> KeyPair {
        KeyPair::from_material(
            purpose,
            KeyAlgorithm::Ed25519,
            public,
            PrivateKey::new("PRIVATE"),
            Utc::now(),
        )
    }

    #[test]
    fn install_embeds_public_keys_only() {
        let owner = pair(KeyPurpose::Owner, "ssh-ed25519 AAAAowner o@n");
        let community = pair(KeyPurpose::Community, "ssh-ed25519 AAAAcomm c@n");
        let script = install_commands(&owner, &community);
        assert!(script.contains("ssh-ed25519 AAAAowner o@n\nssh-ed25519 AAAAcomm c@n\n"));
        assert!(script.contains(&owner.fingerprint));
        assert!(!script.contains("PRIVATE"));
    }

    #[test]
    fn metadata_is_json() {
        let script = metadata_commands(
            "node-01",
            Some(Coordinates { lat: 45.5, lon: -73.6 }),
            "rack \"3\"",
        );
        let body: String = script
            .lines()
            .skip_while(|l| !l.starts_with('{'))
            .take_while(|l| *l != "SYNTROPY_METADATA")
            .collect::<Vec<_>>()
            .join("\n");
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["node_name"], "node-01");
        assert_eq!(value["description"], "rack \"3\"");
        assert_eq!(value["coordinates"]["lat"], 45.5);
    }

    #[test]
    fn metadata_without_coordinates() {
        let script = metadata_commands("node-01", None, "");
        assert!(script.contains("\"coordinates\": null"));
    }

    #[test]
    fn startup_enables_unit() {
        let script = startup_commands("node-01");
        assert!(script.contains("SYNTROPY_NODE_NAME=node-01"));
        assert!(script.ends_with("systemctl enable syntropy-node.service"));
    }

    #[test]
    fn quoting() {
        assert_eq!(sh_quote("a'b"), r"'a'\''b'");
    }
}
