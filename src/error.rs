//! Error types for packet framing and link operations.
//!
//! Every fallible operation in the crate returns [`PacketError`]. The variants fall
//! into two families that callers are expected to treat differently:
//!
//! - **Framing errors** (`NoSync`, `Length`, `Checksum`, `UnknownType` while scanning)
//!   come from noise on the link. They are always recoverable: the packet that
//!   reported them has already reset itself and the scanner keeps hunting for the
//!   next sync word.
//! - **Misuse errors** (`NotReady`, `BufferFull`, `EndOfPacket`, `TypeMismatch`, ...)
//!   indicate a programming or schema inconsistency on the local side. They are
//!   never raised by malformed input alone.
//!
//! Ambient layers (transport, configuration, async link) add `Transport`, `Timeout`,
//! `Io` and `Config`.
//!
//! ```rust
//! use gondola::PacketError;
//!
//! let error = PacketError::Checksum { expected: 0x1234, computed: 0x4321 };
//! assert!(error.is_framing());
//! assert!(error.is_recoverable());
//! assert_eq!(error.code(), 0x0003);
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for packet operations.
pub type Result<T, E = PacketError> = std::result::Result<T, E>;

/// Main error type for packet operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PacketError {
    #[error("Sync word mismatch: byte {found:#04x} at sync position {position}")]
    NoSync { position: usize, found: u8 },

    #[error("Invalid payload length {declared} (limit {limit})")]
    Length { declared: usize, limit: usize },

    #[error("Checksum mismatch: stored {expected:#06x}, computed {computed:#06x}")]
    Checksum { expected: u16, computed: u16 },

    #[error("Unknown telemetry type {packet_type:#04x}")]
    UnknownType { packet_type: u8 },

    #[error("Packet type mismatch: expected {expected:#04x}, found {found:#04x}")]
    TypeMismatch { expected: u8, found: u8 },

    #[error("Packet not ready for {operation}")]
    NotReady { operation: &'static str },

    #[error("Buffer full: {requested} bytes requested, {available} available")]
    BufferFull { requested: usize, available: usize },

    #[error("End of packet: {requested} bytes requested, {remaining} remaining")]
    EndOfPacket { requested: usize, remaining: usize },

    #[error("Malformed payload in {context}: {details}")]
    Payload { context: String, details: String },

    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },
}

impl PacketError {
    /// Returns whether this error was caused by malformed bytes on the link.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            PacketError::NoSync { .. }
                | PacketError::Length { .. }
                | PacketError::Checksum { .. }
                | PacketError::UnknownType { .. }
        )
    }

    /// Returns whether the operation can simply be resumed or retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PacketError::NoSync { .. } => true,
            PacketError::Length { .. } => true,
            PacketError::Checksum { .. } => true,
            PacketError::UnknownType { .. } => true,
            PacketError::Transport { .. } => true,
            PacketError::Timeout { .. } => true,
            PacketError::TypeMismatch { .. } => false,
            PacketError::NotReady { .. } => false,
            PacketError::BufferFull { .. } => false,
            PacketError::EndOfPacket { .. } => false,
            PacketError::Payload { .. } => false,
            PacketError::Io { .. } => false,
            PacketError::Config { .. } => false,
        }
    }

    /// Stable numeric code carried by `ERROR` telemetry packets.
    pub fn code(&self) -> u16 {
        match self {
            PacketError::NoSync { .. } => 0x0001,
            PacketError::Length { .. } => 0x0002,
            PacketError::Checksum { .. } => 0x0003,
            PacketError::UnknownType { .. } => 0x0004,
            PacketError::TypeMismatch { .. } => 0x0010,
            PacketError::NotReady { .. } => 0x0011,
            PacketError::BufferFull { .. } => 0x0012,
            PacketError::EndOfPacket { .. } => 0x0013,
            PacketError::Payload { .. } => 0x0014,
            PacketError::Transport { .. } => 0x0020,
            PacketError::Timeout { .. } => 0x0021,
            PacketError::Io { .. } => 0x0022,
            PacketError::Config { .. } => 0x0030,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PacketError::NoSync { .. } | PacketError::Checksum { .. } => vec![
                "Keep feeding bytes, the scanner resynchronizes on the next sync word",
                "Check line noise and baud rate if the error count keeps rising",
            ],
            PacketError::Length { .. } => vec![
                "Verify the peer uses the same maximum payload size",
                "Keep feeding bytes, the packet has been reset",
            ],
            PacketError::UnknownType { .. } => vec![
                "Check that both ends load the same telemetry type table",
                "Register the type in the schema registry configuration",
            ],
            PacketError::TypeMismatch { .. } => vec![
                "Use the payload accessor that matches the packet type",
                "Check the packet type before decoding",
            ],
            PacketError::NotReady { .. } => vec![
                "Create the packet before setting fields",
                "Wait for reassembly to complete before reading",
            ],
            PacketError::BufferFull { .. } => vec![
                "Split the data across several packets",
                "Check the configured maximum payload size",
            ],
            PacketError::EndOfPacket { .. } => vec![
                "Check the word count before reading",
                "Verify the peer sends the expected payload layout",
            ],
            PacketError::Payload { .. } => vec![
                "Verify the payload layout matches the telemetry type",
                "Check the schema registry entry for this type",
            ],
            PacketError::Transport { .. } => vec![
                "Check the link is connected",
                "Retry the operation",
            ],
            PacketError::Timeout { .. } => vec![
                "Increase the transport timeout",
                "Reset the partially built packet before retrying",
            ],
            PacketError::Io { .. } => vec!["Check the file exists and is readable"],
            PacketError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented configuration keys",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        PacketError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PacketError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for file errors with path context.
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PacketError::Io { path: path.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        PacketError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for payload layout errors.
    pub fn payload_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        PacketError::Payload { context: context.into(), details: details.into() }
    }
}

impl From<std::io::Error> for PacketError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                PacketError::Timeout { duration: Duration::ZERO }
            }
            _ => PacketError::transport_failed_with_source("I/O failure", Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_carry_their_context(
                position in 0usize..2,
                found in any::<u8>(),
                declared in 0usize..0x10000,
                limit in 1usize..0x10000,
                packet_type in any::<u8>(),
            ) {
                let sync = PacketError::NoSync { position, found };
                let expected_found = format!("{:#04x}", found);
                prop_assert!(sync.to_string().contains(&expected_found));

                let length = PacketError::Length { declared, limit };
                let msg = length.to_string();
                prop_assert!(msg.contains(&declared.to_string()));
                prop_assert!(msg.contains(&limit.to_string()));

                let unknown = PacketError::UnknownType { packet_type };
                let expected_type = format!("{:#04x}", packet_type);
                prop_assert!(unknown.to_string().contains(&expected_type));
            }

            #[test]
            fn framing_errors_are_always_recoverable(
                expected in any::<u16>(),
                computed in any::<u16>(),
            ) {
                let errors = [
                    PacketError::NoSync { position: 1, found: 0 },
                    PacketError::Length { declared: 300, limit: 128 },
                    PacketError::Checksum { expected, computed },
                    PacketError::UnknownType { packet_type: 0xEE },
                ];
                for error in &errors {
                    prop_assert!(error.is_framing());
                    prop_assert!(error.is_recoverable());
                }
            }
        }
    }

    #[test]
    fn misuse_errors_are_not_framing() {
        let misuse = [
            PacketError::NotReady { operation: "get_word" },
            PacketError::BufferFull { requested: 2, available: 1 },
            PacketError::EndOfPacket { requested: 2, remaining: 0 },
            PacketError::TypeMismatch { expected: 0x10, found: 0x20 },
        ];
        for error in &misuse {
            assert!(!error.is_framing());
            assert!(!error.is_recoverable());
            assert!(!error.recovery_suggestions().is_empty());
        }
    }

    #[test]
    fn codes_are_unique() {
        let all = [
            PacketError::NoSync { position: 0, found: 0 },
            PacketError::Length { declared: 0, limit: 0 },
            PacketError::Checksum { expected: 0, computed: 0 },
            PacketError::UnknownType { packet_type: 0 },
            PacketError::TypeMismatch { expected: 0, found: 0 },
            PacketError::NotReady { operation: "test" },
            PacketError::BufferFull { requested: 0, available: 0 },
            PacketError::EndOfPacket { requested: 0, remaining: 0 },
            PacketError::payload_error("test", "test"),
            PacketError::transport_failed("test"),
            PacketError::Timeout { duration: Duration::ZERO },
            PacketError::io_error("/tmp/x", std::io::Error::other("test")),
            PacketError::config_error("test", "test"),
        ];
        let mut codes: Vec<u16> = all.iter().map(PacketError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<PacketError>();

        let error = PacketError::transport_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err: PacketError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, PacketError::Timeout { .. }));

        let err: PacketError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        match err {
            PacketError::Transport { source: Some(source), .. } => {
                assert_eq!(source.to_string(), "gone");
            }
            other => panic!("Expected Transport error, got {other:?}"),
        }
    }
}
