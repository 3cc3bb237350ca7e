//! Provider trait for telemetry sources

use crate::Result;
use crate::types::ReceivedPacket;

/// Trait for telemetry packet sources
///
/// Providers abstract over where bytes come from (a live serial or network
/// stream, a recorded capture file) and own the reassembly state for that
/// source. The driver task owns one provider and pulls packets from it.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Get the next checksum-validated telemetry packet
    ///
    /// Returns:
    /// - `Ok(Some(packet))` - New packet available
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Read failure; `PacketError::Timeout` means the link was quiet
    ///
    /// Framing errors are recovered from internally and only counted.
    async fn next_packet(&mut self) -> Result<Option<ReceivedPacket>>;

    /// Framing errors recovered from so far
    fn framing_errors(&self) -> u32;

    /// Short description of the source for logs
    fn describe(&self) -> String;
}
