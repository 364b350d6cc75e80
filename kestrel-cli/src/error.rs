use kestrel_config::ConfigError;
use kestrel_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Simulation error: {0}")]
    Core(#[from] CoreError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{0}")]
    Unsupported(String),
}

pub type CliResult<T> = Result<T, CliError>;
