//! Connections to telemetry sources.

pub mod link;


pub use link::LinkConnection;
