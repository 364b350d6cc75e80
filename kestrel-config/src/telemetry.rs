//! Observability configuration.
//!
//! Parameters for system instrumentation:
//! - Log filtering
//! - Prometheus metrics

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Default tracing filter; `RUST_LOG` takes precedence.
    #[validate(custom(function = validation::validate_log_filter))]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Record Prometheus metrics and print them at the end of a run.
    #[serde(default)]
    pub enable_metrics: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: false,
        }
    }
}
