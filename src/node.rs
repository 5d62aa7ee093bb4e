//! Node configuration supplied by the operator.
//!
//! Everything here is validated before any device is touched.

use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};

/// Longest accepted node name (DNS label limit).
pub const MAX_NODE_NAME_LEN: usize = 63;

/// FAT32 volume labels hold at most 11 characters.
pub const MAX_LABEL_LEN: usize = 11;

/// Label used when the operator does not supply one.
pub const DEFAULT_LABEL: &str = "SYNTROPY";

/// Characters FAT rejects in volume labels.
const FAT_LABEL_FORBIDDEN: &str = "\"*+,./:;<=>?[\\]|";

/// Syntax check for node names: letters, digits and hyphens, at most 63
/// characters. Presence is checked separately by [`NodeConfig::new`].
pub fn is_valid_node_name(name: &str) -> bool {
    name.len() <= MAX_NODE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Parse `"lat,lon"`. Empty input means "no coordinates".
    pub fn parse(input: &str) -> Result<Option<Self>> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        let invalid = || {
            Error::invalid_input(format!(
                "invalid coordinates '{}': expected 'lat,lon' with lat in [-90,90] and lon in [-180,180]",
                input
            ))
        };
        let (lat, lon) = input.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lon: f64 = lon.trim().parse().map_err(|_| invalid())?;
        if !lat.is_finite() || !lon.is_finite() {
            return Err(invalid());
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(invalid());
        }
        Ok(Some(Self { lat, lon }))
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

/// FAT32 volume label: uppercase, at most 11 characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLabel(String);

impl VolumeLabel {
    /// Normalize an operator label. Empty input selects [`DEFAULT_LABEL`].
    pub fn new(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self(DEFAULT_LABEL.to_string()));
        }
        if let Some(bad) = input
            .chars()
            .find(|c| FAT_LABEL_FORBIDDEN.contains(*c) || c.is_control() || !c.is_ascii())
        {
            return Err(Error::invalid_input(format!(
                "volume label '{}' contains '{}', which FAT does not allow",
                input, bad
            )));
        }
        let label: String = input.to_uppercase().chars().take(MAX_LABEL_LEN).collect();
        Ok(Self(label.trim_end().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VolumeLabel {
    fn default() -> Self {
        Self(DEFAULT_LABEL.to_string())
    }
}

impl fmt::Display for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated node identity and layout options.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_name: String,
    pub node_description: String,
    pub coordinates: Option<Coordinates>,
    /// Empty = generate a new owner key; otherwise path to an existing one.
    pub owner_key_source: String,
    pub label: VolumeLabel,
}

impl NodeConfig {
    pub fn new(
        node_name: &str,
        node_description: &str,
        coordinates: &str,
        owner_key_source: &str,
        label: &str,
    ) -> Result<Self> {
        let node_name = node_name.trim();
        if node_name.is_empty() {
            return Err(Error::invalid_input("node name is required"));
        }
        if !is_valid_node_name(node_name) {
            return Err(Error::invalid_input(format!(
                "invalid node name '{}': use letters, digits and hyphens, at most {} characters",
                node_name, MAX_NODE_NAME_LEN
            )));
        }

        Ok(Self {
            node_name: node_name.to_string(),
            node_description: node_description.trim().to_string(),
            coordinates: Coordinates::parse(coordinates)?,
            owner_key_source: owner_key_source.trim().to_string(),
            label: VolumeLabel::new(label)?,
        })
    }

    /// Coordinates as the operator would type them, or "" if unset.
    pub fn coordinates_text(&self) -> String {
        self.coordinates.map(|c| c.to_string()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn node_name_length_boundaries() {
        assert!(is_valid_node_name(""));
        assert!(is_valid_node_name(&"a".repeat(63)));
        assert!(!is_valid_node_name(&"a".repeat(64)));
    }

    #[test]
    fn node_name_charset() {
        assert!(is_valid_node_name("node-01"));
        assert!(!is_valid_node_name("node_01"));
        assert!(!is_valid_node_name("node.local"));
        assert!(!is_valid_node_name("nöde"));
    }

    #[test]
    fn coordinates_boundaries() {
        assert_eq!(Coordinates::parse("").unwrap(), None);
        assert_eq!(
            Coordinates::parse("0,0").unwrap(),
            Some(Coordinates { lat: 0.0, lon: 0.0 })
        );
        assert!(Coordinates::parse(" -33.86 , 151.2 ").unwrap().is_some());
        assert!(Coordinates::parse("90,180").unwrap().is_some());
        for bad in ["91,0", "a,b", "200,0", "0,181", "12", "NaN,0", "1,2,3"] {
            let err = Coordinates::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{}", bad);
        }
    }

    #[test]
    fn label_is_uppercased_and_truncated() {
        assert_eq!(VolumeLabel::new("syntropy-node").unwrap().as_str(), "SYNTROPY-NO");
        assert_eq!(VolumeLabel::new("usb").unwrap().as_str(), "USB");
        assert_eq!(VolumeLabel::new("").unwrap().as_str(), DEFAULT_LABEL);
        assert!(VolumeLabel::new("a/b").is_err());
    }

    #[test]
    fn config_requires_name() {
        let err = NodeConfig::new("", "", "", "", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn config_rejects_bad_coordinates_before_anything_else() {
        let err = NodeConfig::new("node-01", "", "200,0", "", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn config_happy_path() {
        let cfg = NodeConfig::new("node-01", " lab rack 3 ", "45.5,-73.6", "", "grid").unwrap();
        assert_eq!(cfg.node_description, "lab rack 3");
        assert_eq!(cfg.coordinates_text(), "45.5,-73.6");
        assert_eq!(cfg.label.as_str(), "GRID");
    }
}
