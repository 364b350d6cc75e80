//! Simulation kernel configuration.
//!
//! Time bases, run length and how the model is split across threads.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Simulation kernel parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Length of one core tick; every delay is rounded to whole ticks.
    #[validate(custom(function = validation::validate_time_base))]
    #[serde(default = "default_core_time_base")]
    pub core_time_base: String,

    /// Simulated time at which the run stops, as a duration.
    #[validate(custom(function = validation::validate_time_base))]
    #[serde(default = "default_stop_at")]
    pub stop_at: String,

    /// Break simultaneous-event ties by link tag.
    #[serde(default = "default_true")]
    pub enforce_link_order: bool,

    /// Number of partitions, one thread each.
    #[validate(range(min = 1, max = 256))]
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Latency of the demo link pair.
    #[validate(custom(function = validation::validate_time_base))]
    #[serde(default = "default_link_latency")]
    pub link_latency: String,
}

fn default_core_time_base() -> String {
    "1ps".into()
}

fn default_stop_at() -> String {
    "1us".into()
}

fn default_true() -> bool {
    true
}

fn default_partitions() -> u32 {
    1
}

fn default_link_latency() -> String {
    "10ns".into()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            core_time_base: default_core_time_base(),
            stop_at: default_stop_at(),
            enforce_link_order: default_true(),
            partitions: default_partitions(),
            link_latency: default_link_latency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn valid_default_simulation_config() {
        SimulationConfig::default()
            .validate()
            .expect("Default config should be valid");
    }

    #[test]
    fn partitions_are_bounded() {
        let mut config = SimulationConfig::default();
        config.partitions = 0;
        assert!(config.validate().is_err());
        config.partitions = 257;
        assert!(config.validate().is_err());
        config.partitions = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn time_bases_are_checked() {
        let mut config = SimulationConfig::default();
        config.stop_at = "soon".into();
        let errors = config.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("stop_at"));
    }
}
