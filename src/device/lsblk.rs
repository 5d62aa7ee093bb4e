//! Parsing of `lsblk -J` output.
//!
//! Two queries are used: a disk listing for enumeration
//! (`lsblk -J -b -d -o NAME,SIZE,TYPE,RM,MODEL,SERIAL,VENDOR`) and a
//! per-device tree for the safety checks
//! (`lsblk -J -o NAME,FSTYPE,MOUNTPOINT <path>`). Older util-linux versions
//! emit numbers and booleans as strings, so every field is read leniently.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::{size_in_range, Device};
use crate::platform::Platform;

/// Columns requested for enumeration.
pub const LIST_COLUMNS: &str = "NAME,SIZE,TYPE,RM,MODEL,SERIAL,VENDOR";

/// Columns requested for the safety tree of one device.
pub const TREE_COLUMNS: &str = "NAME,FSTYPE,MOUNTPOINT";

/// One row of the enumeration listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRow {
    pub name: String,
    pub size_bytes: u64,
    pub kind: String,
    pub removable: bool,
    pub model: String,
    pub serial: String,
    pub vendor: String,
}

/// One node (disk or partition) of a device tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub name: String,
    pub fstype: Option<String>,
    pub mountpoint: Option<String>,
}

fn blockdevices(json: &str) -> Result<Vec<Value>> {
    let root: Value = serde_json::from_str(json).context("lsblk output is not valid JSON")?;
    Ok(root
        .get("blockdevices")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn opt_text(value: Option<&Value>) -> Option<String> {
    let s = text(value);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn number(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

/// Parse the enumeration listing.
pub fn parse_disks(json: &str) -> Result<Vec<DiskRow>> {
    Ok(blockdevices(json)?
        .iter()
        .map(|dev| DiskRow {
            name: text(dev.get("name")),
            size_bytes: number(dev.get("size")),
            kind: text(dev.get("type")),
            removable: flag(dev.get("rm")),
            model: text(dev.get("model")),
            serial: text(dev.get("serial")),
            vendor: text(dev.get("vendor")),
        })
        .collect())
}

/// Parse a device tree, flattening children into one list.
pub fn parse_tree(json: &str) -> Result<Vec<TreeNode>> {
    let mut nodes = Vec::new();
    for dev in blockdevices(json)? {
        flatten(&dev, &mut nodes);
    }
    Ok(nodes)
}

fn flatten(dev: &Value, out: &mut Vec<TreeNode>) {
    // util-linux >= 2.37 reports MOUNTPOINTS (array) alongside MOUNTPOINT
    let mountpoint = opt_text(dev.get("mountpoint")).or_else(|| {
        dev.get("mountpoints")
            .and_then(Value::as_array)
            .and_then(|mps| mps.iter().find_map(|mp| opt_text(Some(mp))))
    });
    out.push(TreeNode {
        name: text(dev.get("name")),
        fstype: opt_text(dev.get("fstype")),
        mountpoint,
    });
    if let Some(children) = dev.get("children").and_then(Value::as_array) {
        for child in children {
            flatten(child, out);
        }
    }
}

/// Names conventionally used by a host's primary disk.
pub fn is_system_disk_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(sda|hda|vda|xvda|nvme0n1|mmcblk0)$").expect("static regex")
        })
        .is_match(name)
}

/// Filter the listing down to candidate devices.
///
/// Keeps whole disks whose size is within the candidate window, dropping
/// fixed disks that carry a conventional system-disk name.
pub fn candidates(rows: &[DiskRow], platform: Platform) -> Vec<Device> {
    rows.iter()
        .filter(|row| row.kind == "disk")
        .filter(|row| row.removable || !is_system_disk_name(&row.name))
        .filter(|row| size_in_range(row.size_bytes))
        .map(|row| {
            Device::new(
                format!("/dev/{}", row.name),
                row.size_bytes,
                &row.model,
                &row.vendor,
                &row.serial,
                row.removable,
                platform,
            )
        })
        .collect()
}

/// Mount points whose backing device makes a disk a system disk.
pub const CRITICAL_MOUNTS: &[&str] = &["/", "/boot", "/boot/efi", "/usr", "/var", "/home", "/opt"];

/// First critical mount point found in a device tree.
pub fn critical_mount(nodes: &[TreeNode]) -> Option<&str> {
    nodes
        .iter()
        .filter_map(|n| n.mountpoint.as_deref())
        .find(|mp| CRITICAL_MOUNTS.contains(mp))
}

/// First swap partition found in a device tree.
pub fn swap_partition(nodes: &[TreeNode]) -> Option<&str> {
    nodes
        .iter()
        .find(|n| {
            n.fstype.as_deref() == Some("swap") || n.mountpoint.as_deref() == Some("[SWAP]")
        })
        .map(|n| n.name.as_str())
}

/// Mounted partitions (name, mount point) in a device tree.
pub fn mounted(nodes: &[TreeNode]) -> Vec<(&str, &str)> {
    nodes
        .iter()
        .filter_map(|n| {
            n.mountpoint
                .as_deref()
                .filter(|mp| mp.starts_with('/'))
                .map(|mp| (n.name.as_str(), mp))
        })
        .collect()
}

/// Signatures that mark a container or member device rather than a
/// filesystem that `mount` can attach.
pub const NON_MOUNTABLE_FSTYPES: &[&str] = &[
    "swap",
    "crypto_LUKS",
    "LVM2_member",
    "linux_raid_member",
    "zfs_member",
];

/// First node carrying a mountable filesystem of any type, preferring
/// partitions over the whole disk.
pub fn existing_filesystem(nodes: &[TreeNode]) -> Option<&TreeNode> {
    let mountable = |n: &&TreeNode| {
        n.fstype
            .as_deref()
            .map(|t| !NON_MOUNTABLE_FSTYPES.contains(&t))
            .unwrap_or(false)
    };
    nodes
        .iter()
        .skip(1)
        .find(mountable)
        .or_else(|| nodes.first().filter(mountable))
}
