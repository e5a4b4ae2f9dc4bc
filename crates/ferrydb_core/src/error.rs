//! Error types for FerryDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in FerryDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The local storage connection is not available.
    #[error("local storage connection is missing")]
    ConnectionMissing,

    /// A model table does not exist in local storage.
    #[error("table not found: {model}")]
    TableNotFound {
        /// Name of the model whose table is missing.
        model: String,
    },

    /// A column already exists on a model table.
    #[error("column {column} already exists on {model}")]
    ColumnExists {
        /// Name of the model.
        model: String,
        /// Name of the column.
        column: String,
    },

    /// A record could not be decoded against its model schema.
    #[error("cannot decode {model} record: {message}")]
    Decode {
        /// Name of the model the record belongs to.
        model: String,
        /// Description of the decode failure.
        message: String,
    },

    /// A migration edge was declared between invalid versions.
    #[error("invalid migration edge {from} -> {to}: {reason}")]
    InvalidMigrationEdge {
        /// Source version of the edge.
        from: String,
        /// Target version of the edge.
        to: String,
        /// Why the edge was rejected.
        reason: String,
    },

    /// Migration failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Storage adapter error.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a decode error for a model.
    pub fn decode(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid migration edge error.
    pub fn invalid_migration_edge(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMigrationEdge {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if this error means the local store cannot be reached.
    ///
    /// Such errors are preconditions, never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::ConnectionMissing)
    }
}
