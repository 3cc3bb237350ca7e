//! Command and telemetry packet layer for a balloon-borne instrument network.
//!
//! Gondola frames, validates and decodes the two packet kinds exchanged between
//! the flight computers and the ground station:
//!
//! - **Command packets** go up the link: an 8-byte header and a payload of 16-bit
//!   words addressed to one flight computer.
//! - **Telemetry packets** come down: a 16-byte header with type, source and a
//!   timestamp, followed by a payload whose shape is fixed by the type.
//!
//! Both are rebuilt byte by byte from an unreliable stream with
//! [`Reassemble`], which resynchronizes on the sync word after line noise and
//! rejects packets with a bad length, unknown type or failed checksum.
//!
//! # Features
//!
//! - **Strict framing**: every header field is checked as soon as it arrives
//! - **Typed payloads**: one struct per telemetry category, see [`telemetry::payloads`]
//! - **Configurable tables**: telemetry types and checksum algorithm come from a
//!   [`PacketContext`], optionally loaded from YAML with [`LinkConfig`]
//! - **Async links**: stream telemetry from a socket or replay a capture file
//!   through [`LinkConnection`]
//!
//! ## Example (capture replay)
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use gondola::Gondola;
//! use gondola::telemetry::payloads::Housekeeping;
//!
//! #[tokio::main]
//! async fn main() -> gondola::Result<()> {
//!     let connection = Gondola::open("flight-0612.bin").await?;
//!     let mut housekeeping = Box::pin(connection.subscribe::<Housekeeping>());
//!
//!     while let Some(frame) = housekeeping.next().await {
//!         println!("heaters: {:#06x}", frame.heater_mask);
//!     }
//!     println!("{:?}", connection.finished().await);
//!     Ok(())
//! }
//! ```

// Core packet layer
pub mod buffer;
pub mod checksum;
pub mod codec;
pub mod command;
pub mod context;
mod error;
pub mod framing;
pub mod registry;
pub mod telemetry;
pub mod transport;
pub mod types;

// Configuration
pub mod config;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Async link layer
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;

// Core exports
pub use error::*;
pub use types::*;

pub use checksum::{ChecksumAlgorithm, ChecksumEngine};
pub use command::CommandPacket;
pub use context::{FixedClock, PacketContext, SystemClock, TimeSource, Timestamp};
pub use framing::{PacketState, Progress, Reassemble};
pub use registry::{TypeSchemaEntry, TypeSchemaRegistry, packet_type};
pub use telemetry::{TelemetryHeader, TelemetryPacket};

// Main API exports
pub use config::LinkConfig;
pub use connection::LinkConnection;
pub use provider::Provider;

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncRead;

/// Unified entry point for telemetry links.
///
/// # Examples
///
/// ## Live downlink
/// ```rust,no_run
/// use gondola::{Gondola, PacketContext};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> gondola::Result<()> {
///     let stream = tokio::fs::File::open("/dev/ttyUSB0").await?;
///     let connection = Gondola::connect(stream, Arc::new(PacketContext::new(0x00)));
///     // Use connection...
///     Ok(())
/// }
/// ```
///
/// ## Capture replay with a configuration file
/// ```rust,no_run
/// use gondola::{Gondola, LinkConfig};
///
/// #[tokio::main]
/// async fn main() -> gondola::Result<()> {
///     let config = LinkConfig::from_file("ground.yaml")?;
///     let connection = Gondola::open_with_config("flight-0612.bin", &config).await?;
///     // Use connection...
///     Ok(())
/// }
/// ```
pub struct Gondola;

impl Gondola {
    /// Replay a capture file with the default ground station context.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Io`] if the file cannot be read.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<LinkConnection> {
        LinkConnection::open_capture(path, Arc::new(PacketContext::new(0x00))).await
    }

    /// Replay a capture file using the context and channel capacity of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Config`] for an invalid configuration and
    /// [`PacketError::Io`] if the file cannot be read.
    pub async fn open_with_config<P: AsRef<Path>>(path: P, config: &LinkConfig) -> Result<LinkConnection> {
        let ctx = config.into_context()?;
        let provider = providers::CaptureProvider::open(path, Arc::clone(&ctx)).await?;
        Ok(LinkConnection::from_provider(provider, ctx, config.channel_capacity))
    }

    /// Read telemetry from a live byte stream (serial device, socket, pipe).
    pub fn connect<R>(reader: R, ctx: Arc<PacketContext>) -> LinkConnection
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        LinkConnection::from_reader(reader, ctx)
    }

    /// Read telemetry from a live byte stream using `config`.
    pub fn connect_with_config<R>(reader: R, config: &LinkConfig) -> Result<LinkConnection>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let ctx = config.into_context()?;
        let provider = providers::StreamProvider::new(reader, Arc::clone(&ctx));
        Ok(LinkConnection::from_provider(provider, ctx, config.channel_capacity))
    }
}
