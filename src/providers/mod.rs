//! Concrete telemetry providers.

pub mod capture;
pub mod stream;

pub use capture::CaptureProvider;
pub use stream::StreamProvider;
