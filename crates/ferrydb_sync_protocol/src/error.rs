//! Error types for the sync protocol.

use ferrydb_core::CoreError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding remote sync responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The response envelope does not have the expected shape.
    #[error("malformed response envelope: {message}")]
    MalformedEnvelope {
        /// Description of the problem.
        message: String,
    },

    /// A sync metadata field is missing or has the wrong type.
    #[error("missing sync metadata field {field}")]
    MissingMetadata {
        /// Name of the metadata field.
        field: &'static str,
    },

    /// The record part of an item could not be decoded.
    #[error(transparent)]
    Record(#[from] CoreError),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a malformed envelope error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
        }
    }
}
