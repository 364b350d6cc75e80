use kestrel_serialization::SerializationError;
use thiserror::Error;

use crate::event::LinkId;
use crate::time::TimeError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Time base error: {0}")]
    TimeBase(#[from] TimeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Unknown link tag {0}")]
    UnknownLink(LinkId),

    #[error("Link tag {0} is already registered")]
    DuplicateLink(LinkId),

    #[error("Partition synchronization error: {0}")]
    Sync(String),

    #[error("Run aborted: another partition failed")]
    Aborted,

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
