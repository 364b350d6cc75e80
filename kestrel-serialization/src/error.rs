//! Error conditions raised while traversing an object graph.

use thiserror::Error;

use crate::serializer::SerializerMode;

/// Recoverable serialization failures.
///
/// None of these abort the process: an overrun means the caller should abandon
/// the checkpoint operation in progress, the others mean the input bytes are
/// corrupted or came from an incompatible build.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("serialization overran buffer of size {max_size} (needed {requested} bytes)")]
    BufferOverrun { max_size: usize, requested: usize },

    #[error("class id {0} is not a valid serializable id")]
    UnknownClassId(u32),

    #[error("identity token {token:#x} was already unpacked as a type other than {expected}")]
    PointerTypeMismatch { token: u64, expected: &'static str },

    #[error("invalid UTF-8 in serialized string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u32 },

    #[error("operation requires {expected:?} mode but the serializer is in {actual:?} mode")]
    ModeMismatch {
        expected: SerializerMode,
        actual: SerializerMode,
    },
}

pub type SerResult<T> = Result<T, SerializationError>;
