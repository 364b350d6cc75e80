//! # Kestrel Telemetry
//!
//! Logging and metrics for the simulation kernel.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
