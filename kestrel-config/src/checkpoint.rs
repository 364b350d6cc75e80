//! Checkpoint and restart configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct CheckpointConfig {
    /// Where checkpoint images are written.
    #[validate(custom(function = validation::validate_checkpoint_path))]
    #[serde(default = "default_path")]
    pub path: String,

    /// Simulated time of the checkpoint, as a duration. No checkpoint when unset.
    #[validate(custom(function = validation::validate_time_base))]
    #[serde(default)]
    pub at: Option<String>,
}

fn default_path() -> String {
    "checkpoint.kcp".into()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            at: None,
        }
    }
}
