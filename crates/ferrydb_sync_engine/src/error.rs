//! Error types for the sync engine.

use ferrydb_core::AuthMode;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether another auth mode may succeed.
        retryable: bool,
    },

    /// The remote service rejected the auth mode of the request.
    #[error("unauthorized with auth mode {auth_mode}")]
    Unauthorized {
        /// The rejected mode.
        auth_mode: AuthMode,
    },

    /// The remote operation is disabled for this model.
    #[error("operation disabled for {model}")]
    OperationDisabled {
        /// Model name.
        model: String,
    },

    /// Every auth-mode candidate failed.
    #[error("auth modes exhausted for {model} after {attempts} attempts")]
    AuthModesExhausted {
        /// Model name.
        model: String,
        /// Attempts made.
        attempts: usize,
        /// Error of the last attempt, if any attempt was made.
        #[source]
        last_error: Option<Box<SyncError>>,
    },

    /// Response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ferrydb_sync_protocol::ProtocolError),

    /// Local storage error during sync.
    #[error("storage error: {0}")]
    Core(#[from] ferrydb_core::CoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the next auth-mode candidate should be tried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Unauthorized { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the failure, directly or as the last attempt of an
    /// exhausted fetch, was an authorization rejection.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SyncError::Unauthorized { .. } => true,
            SyncError::AuthModesExhausted {
                last_error: Some(last),
                ..
            } => last.is_unauthorized(),
            _ => false,
        }
    }
}
