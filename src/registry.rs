//! Telemetry type schema registry.
//!
//! Maps each one-byte telemetry type to the payload shape the reassembly state
//! machine and the typed accessors enforce: a length (exact for fixed-length types,
//! an upper bound for variable-length ones) and the notification tag subscribers use
//! to route completed packets.
//!
//! The registry is immutable once built. [`TypeSchemaRegistry::standard`] returns the
//! process-wide table of the flight network; ground tools that need extra types
//! build their own from YAML and pass it through a [`PacketContext`](crate::PacketContext).
//!
//! ```rust
//! use gondola::registry::{TypeSchemaRegistry, packet_type};
//!
//! let registry = TypeSchemaRegistry::standard();
//! let entry = registry.lookup(packet_type::HOUSEKEEPING).unwrap();
//! assert!(!entry.variable_length);
//! assert!(registry.check_length(packet_type::HOUSEKEEPING, entry.max_length).is_ok());
//! assert!(registry.check_length(packet_type::HOUSEKEEPING, 2).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::{PacketError, Result};

/// Type codes of the standard telemetry categories.
pub mod packet_type {
    pub const ERROR: u8 = 0x01;
    pub const COMMAND_ACK: u8 = 0x02;
    pub const TEXT_MESSAGE: u8 = 0x03;
    pub const CONTROL_STATUS: u8 = 0x10;
    pub const ASPECT_STATUS: u8 = 0x20;
    pub const ASPECT_IMAGE: u8 = 0x21;
    pub const DETECTOR_STATUS: u8 = 0x30;
    pub const DETECTOR_EVENTS: u8 = 0x31;
    pub const HOUSEKEEPING: u8 = 0x40;
    pub const FDR_STATUS: u8 = 0x50;
}

// (type, name, length, variable, notification tag)
const STANDARD_TYPES: &[(u8, &str, usize, bool, u32)] = &[
    (packet_type::ERROR, "ERROR", 20, true, 100),
    (packet_type::COMMAND_ACK, "COMMAND_ACK", 8, false, 101),
    (packet_type::TEXT_MESSAGE, "TEXT_MESSAGE", 256, true, 102),
    (packet_type::CONTROL_STATUS, "CONTROL_STATUS", 24, false, 200),
    (packet_type::ASPECT_STATUS, "ASPECT_STATUS", 24, false, 300),
    (packet_type::ASPECT_IMAGE, "ASPECT_IMAGE", 1024, true, 301),
    (packet_type::DETECTOR_STATUS, "DETECTOR_STATUS", 24, false, 400),
    (packet_type::DETECTOR_EVENTS, "DETECTOR_EVENTS", 1024, true, 401),
    (packet_type::HOUSEKEEPING, "HOUSEKEEPING", 34, false, 500),
    (packet_type::FDR_STATUS, "FDR_STATUS", 16, false, 600),
];

static STANDARD: LazyLock<TypeSchemaRegistry> = LazyLock::new(|| {
    let entries = STANDARD_TYPES.iter().map(|&(packet_type, name, length, variable, tag)| {
        TypeSchemaEntry {
            packet_type,
            name: name.to_string(),
            max_length: length,
            variable_length: variable,
            notification_tag: tag,
        }
    });
    let entries: HashMap<u8, TypeSchemaEntry> = entries.map(|e| (e.packet_type, e)).collect();
    let max_payload_len = entries.values().map(|e| e.max_length).max().unwrap_or(0);
    TypeSchemaRegistry { entries, max_payload_len }
});

/// Payload shape of one telemetry type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchemaEntry {
    /// One-byte type code carried in the header
    pub packet_type: u8,
    /// Human-readable category name
    pub name: String,
    /// Exact payload length, or the upper bound when `variable_length` is set
    #[serde(alias = "length")]
    pub max_length: usize,
    /// Whether any length up to `max_length` is accepted
    #[serde(default)]
    pub variable_length: bool,
    /// Tag used to route completed packets to subscribers
    #[serde(default)]
    pub notification_tag: u32,
}

impl TypeSchemaEntry {
    pub fn fixed(packet_type: u8, name: impl Into<String>, length: usize, tag: u32) -> Self {
        Self {
            packet_type,
            name: name.into(),
            max_length: length,
            variable_length: false,
            notification_tag: tag,
        }
    }

    pub fn variable(packet_type: u8, name: impl Into<String>, max_length: usize, tag: u32) -> Self {
        Self {
            packet_type,
            name: name.into(),
            max_length,
            variable_length: true,
            notification_tag: tag,
        }
    }

    /// Whether a payload of `len` bytes is acceptable for this type.
    pub fn accepts(&self, len: usize) -> bool {
        if self.variable_length { len <= self.max_length } else { len == self.max_length }
    }

    pub fn check_length(&self, len: usize) -> Result<()> {
        if self.accepts(len) {
            Ok(())
        } else {
            Err(PacketError::Length { declared: len, limit: self.max_length })
        }
    }
}

/// Immutable table of telemetry type schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSchemaRegistry {
    entries: HashMap<u8, TypeSchemaEntry>,
    max_payload_len: usize,
}

impl TypeSchemaRegistry {
    /// Build a registry, rejecting duplicate or malformed entries.
    pub fn new(entries: impl IntoIterator<Item = TypeSchemaEntry>) -> Result<Self> {
        let mut map = HashMap::new();
        for entry in entries {
            Self::validate_entry(&entry)?;
            let packet_type = entry.packet_type;
            if map.insert(packet_type, entry).is_some() {
                return Err(PacketError::config_error(
                    "Schema registry",
                    format!("Telemetry type {:#04x} registered twice", packet_type),
                ));
            }
        }
        let max_payload_len = map.values().map(|e| e.max_length).max().unwrap_or(0);
        debug!("Built schema registry with {} types (max payload {})", map.len(), max_payload_len);
        Ok(Self { entries: map, max_payload_len })
    }

    /// The flight network's standard table (shared, read-only).
    pub fn standard() -> &'static TypeSchemaRegistry {
        &STANDARD
    }

    /// Load a table from a YAML sequence of entries.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let entries: Vec<TypeSchemaEntry> = serde_yaml_ng::from_str(yaml)
            .map_err(|e| PacketError::config_error("Schema registry YAML", e.to_string()))?;
        Self::new(entries)
    }

    /// A copy of this registry with `entries` added or replacing existing types.
    pub fn with_overrides(&self, entries: impl IntoIterator<Item = TypeSchemaEntry>) -> Result<Self> {
        let mut merged = self.entries.clone();
        for entry in entries {
            Self::validate_entry(&entry)?;
            merged.insert(entry.packet_type, entry);
        }
        Self::new(merged.into_values())
    }

    fn validate_entry(entry: &TypeSchemaEntry) -> Result<()> {
        if entry.name.is_empty() {
            return Err(PacketError::config_error(
                "Schema registry",
                format!("Telemetry type {:#04x} has an empty name", entry.packet_type),
            ));
        }
        if entry.max_length > u16::MAX as usize {
            return Err(PacketError::config_error(
                "Schema registry",
                format!(
                    "Telemetry type '{}' length {} exceeds the 16-bit length field",
                    entry.name, entry.max_length
                ),
            ));
        }
        Ok(())
    }

    /// Get the schema of a type (O(1) lookup).
    pub fn lookup(&self, packet_type: u8) -> Option<&TypeSchemaEntry> {
        self.entries.get(&packet_type)
    }

    /// Like [`lookup`](Self::lookup) but reports `UnknownType`.
    pub fn entry(&self, packet_type: u8) -> Result<&TypeSchemaEntry> {
        self.lookup(packet_type).ok_or(PacketError::UnknownType { packet_type })
    }

    pub fn contains(&self, packet_type: u8) -> bool {
        self.entries.contains_key(&packet_type)
    }

    /// Validate a payload length against the schema of `packet_type`.
    pub fn check_length(&self, packet_type: u8, len: usize) -> Result<()> {
        self.entry(packet_type)?.check_length(len)
    }

    /// Largest payload any registered type may carry.
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending type order.
    pub fn entries(&self) -> Vec<&TypeSchemaEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| e.packet_type);
        entries
    }
}

impl Default for TypeSchemaRegistry {
    fn default() -> Self {
        Self::standard().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn standard_table_is_consistent() {
        let registry = TypeSchemaRegistry::standard();
        assert_eq!(registry.len(), STANDARD_TYPES.len());
        assert_eq!(registry.max_payload_len(), 1024);

        // Rebuilding through the validating constructor must succeed
        let rebuilt = TypeSchemaRegistry::new(registry.entries().into_iter().cloned()).unwrap();
        assert_eq!(&rebuilt, registry);

        let mut tags: Vec<u32> = registry.entries().iter().map(|e| e.notification_tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), registry.len());
    }

    #[test]
    fn unknown_types_are_reported() {
        let registry = TypeSchemaRegistry::standard();
        assert!(registry.lookup(0xEE).is_none());
        assert!(matches!(registry.entry(0xEE), Err(PacketError::UnknownType { packet_type: 0xEE })));
        assert!(matches!(
            registry.check_length(0xEE, 0),
            Err(PacketError::UnknownType { .. })
        ));
    }

    #[test]
    fn duplicates_and_oversized_entries_are_rejected() {
        let duplicate = TypeSchemaRegistry::new([
            TypeSchemaEntry::fixed(0x60, "GPS", 12, 1),
            TypeSchemaEntry::fixed(0x60, "GPS_AGAIN", 12, 2),
        ]);
        assert!(matches!(duplicate, Err(PacketError::Config { .. })));

        let oversized = TypeSchemaRegistry::new([TypeSchemaEntry::variable(0x61, "BIG", 70_000, 1)]);
        assert!(matches!(oversized, Err(PacketError::Config { .. })));

        let unnamed = TypeSchemaRegistry::new([TypeSchemaEntry::fixed(0x62, "", 4, 1)]);
        assert!(matches!(unnamed, Err(PacketError::Config { .. })));
    }

    #[test]
    fn yaml_tables_load_and_override() {
        let yaml = r#"
- packet_type: 96
  name: GPS_STATUS
  length: 32
  notification_tag: 700
- packet_type: 97
  name: GPS_NMEA
  max_length: 200
  variable_length: true
"#;
        let registry = TypeSchemaRegistry::from_yaml(yaml).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(96).unwrap().max_length, 32);
        assert!(!registry.lookup(96).unwrap().variable_length);
        assert_eq!(registry.lookup(97).unwrap().notification_tag, 0);

        let merged = TypeSchemaRegistry::standard()
            .with_overrides(registry.entries().into_iter().cloned())
            .unwrap();
        assert_eq!(merged.len(), STANDARD_TYPES.len() + 2);
        assert!(merged.contains(packet_type::HOUSEKEEPING));

        assert!(matches!(
            TypeSchemaRegistry::from_yaml("not: [a, list"),
            Err(PacketError::Config { .. })
        ));
    }

    proptest! {
        #[test]
        fn fixed_types_accept_exactly_their_length(length in 0usize..2048, probe in 0usize..4096) {
            let entry = TypeSchemaEntry::fixed(0x70, "FIXED", length, 0);
            prop_assert_eq!(entry.accepts(probe), probe == length);
        }

        #[test]
        fn variable_types_accept_up_to_their_bound(max in 0usize..2048, probe in 0usize..4096) {
            let entry = TypeSchemaEntry::variable(0x71, "VARIABLE", max, 0);
            prop_assert_eq!(entry.accepts(probe), probe <= max);
            if probe > max {
                let rejected = matches!(
                    entry.check_length(probe),
                    Err(PacketError::Length { declared, limit }) if declared == probe && limit == max
                );
                prop_assert!(rejected);
            }
        }
    }
}
