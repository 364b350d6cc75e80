//! # Kestrel Configuration System
//!
//! Layered configuration for the simulation kernel and its tooling.
//!
//! ## Features
//! - **Unified Configuration**: one `KestrelConfig` for kernel, checkpoint and telemetry
//! - **Validation**: time bases, bounds and paths are checked on load
//! - **Environment Awareness**: `KESTREL_*` variables override any file

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod checkpoint;
mod error;
mod simulation;
mod telemetry;
mod validation;

pub use checkpoint::CheckpointConfig;
pub use error::ConfigError;
pub use simulation::SimulationConfig;
pub use telemetry::TelemetryConfig;
pub use validation::validate_time_base;

const DEFAULT_FILE: &str = "config/kestrel.yaml";
const ENV_PREFIX: &str = "KESTREL_";

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct KestrelConfig {
    /// Kernel parameters (time bases, run length, partitions).
    #[validate(nested)]
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Checkpoint output.
    #[validate(nested)]
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Logging and metrics.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl KestrelConfig {
    /// Load configuration from the default file and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/kestrel.yaml`, if present
    /// 3. `KESTREL_*` environment variables, nested with `__`
    ///    (e.g. `KESTREL_SIMULATION__PARTITIONS=4`)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Self::defaults();
        if Path::new(DEFAULT_FILE).exists() {
            figment = figment.merge(Yaml::file(DEFAULT_FILE));
        }
        Self::finish(figment)
    }

    /// Load configuration from a specific file layered over the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::finish(Self::defaults().merge(Yaml::file(path)))
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(KestrelConfig::default()))
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
