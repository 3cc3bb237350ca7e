//! Link configuration.
//!
//! A node's packet settings are kept in a small YAML document so the same binary
//! can run as any node of the flight network or as the ground station:
//!
//! ```yaml
//! source_id: 0x03
//! checksum: ccitt-false
//! command_max_payload: 128
//! clock_correction_ns: -1500000
//! channel_capacity: 512
//! telemetry_types:
//!   - packet_type: 0x60
//!     name: SPECTROMETER
//!     length: 512
//!     variable_length: true
//!     notification_tag: 700
//! ```
//!
//! Every key is optional. `telemetry_types` entries are merged over the standard
//! table, replacing entries with the same type code.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checksum::ChecksumAlgorithm;
use crate::command::{DEFAULT_MAX_COMMAND_PAYLOAD, MAX_COMMAND_PAYLOAD_LIMIT};
use crate::context::SystemClock;
use crate::driver::DEFAULT_CHANNEL_CAPACITY;
use crate::registry::{TypeSchemaEntry, TypeSchemaRegistry};
use crate::{PacketContext, PacketError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Id stamped into the header of every telemetry packet this node creates
    pub source_id: u8,
    pub checksum: ChecksumAlgorithm,
    /// Exclusive bound on command payload lengths
    pub command_max_payload: usize,
    /// Offset added to the system clock for telemetry timestamps
    pub clock_correction_ns: i64,
    /// Packets buffered per link for slow subscribers
    pub channel_capacity: usize,
    /// Additional or replacement telemetry types
    pub telemetry_types: Vec<TypeSchemaEntry>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            source_id: 0,
            checksum: ChecksumAlgorithm::default(),
            command_max_payload: DEFAULT_MAX_COMMAND_PAYLOAD,
            clock_correction_ns: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            telemetry_types: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| PacketError::config_error("Link configuration", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| PacketError::io_error(path, e))?;
        let config = Self::from_yaml(&yaml)?;
        info!("Loaded link configuration from {} (source {:#04x})", path.display(), config.source_id);
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self)
            .map_err(|e| PacketError::config_error("Link configuration", e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_COMMAND_PAYLOAD_LIMIT).contains(&self.command_max_payload) {
            return Err(PacketError::config_error(
                "command_max_payload",
                format!(
                    "{} is outside 1..={} (the length field is one byte)",
                    self.command_max_payload, MAX_COMMAND_PAYLOAD_LIMIT
                ),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(PacketError::config_error("channel_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// The standard registry with `telemetry_types` merged in.
    pub fn registry(&self) -> Result<TypeSchemaRegistry> {
        if self.telemetry_types.is_empty() {
            return Ok(TypeSchemaRegistry::standard().clone());
        }
        debug!("Merging {} configured telemetry types", self.telemetry_types.len());
        TypeSchemaRegistry::standard().with_overrides(self.telemetry_types.iter().cloned())
    }

    /// Build the packet context described by this configuration.
    pub fn into_context(&self) -> Result<Arc<PacketContext>> {
        self.validate()?;
        let ctx = PacketContext::new(self.source_id)
            .with_checksum(self.checksum)
            .with_clock(Arc::new(SystemClock::with_correction(self.clock_correction_ns)))
            .with_registry(Arc::new(self.registry()?))
            .with_command_max_payload(self.command_max_payload);
        Ok(Arc::new(ctx))
    }
}
