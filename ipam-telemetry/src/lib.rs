//! # IPAM Telemetry
//!
//! Crate for logging and metrics of the address management engine.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
