//! Data types shared between the packet layer and the async link layer.
//!
//! - [`ReceivedPacket`] is an immutable snapshot of one completed telemetry packet.
//!   The bytes live behind an `Arc<[u8]>` so every subscriber of a link shares the
//!   same allocation.
//! - [`LinkStats`] summarizes what a link reader has seen so far.

mod received;
mod stats;

pub use received::ReceivedPacket;
pub use stats::LinkStats;
