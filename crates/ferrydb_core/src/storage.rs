//! Local storage adapter.
//!
//! The storage engine itself lives outside this crate. FerryDB talks to it
//! through two narrow traits:
//!
//! - [`StorageAdapter`] - the shared connection (reads and transaction start)
//! - [`StorageTransaction`] - structural statements and record writes that
//!   become visible together on [`StorageTransaction::commit`]
//!
//! # Invariants
//!
//! - Nothing written through a transaction is visible before commit
//! - A rolled back (or dropped) transaction leaves the store unchanged
//! - Record versions only ever grow; deletes keep the deleting version

use crate::error::CoreResult;
use crate::schema::{ModelField, ModelSchema, Record};
use std::fmt;

/// A structural change to local storage.
///
/// The rendering in [`fmt::Display`] is the SQL form; adapters for other
/// engines interpret the variant directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatement {
    /// Adds a column to a model table.
    AddColumn {
        /// Model (table) name.
        model: String,
        /// Column name.
        column: String,
        /// SQL column type.
        sql_type: &'static str,
    },
}

impl SchemaStatement {
    /// Creates an add-column statement for a field of a schema.
    pub fn add_column(schema: &ModelSchema, field: &ModelField) -> Self {
        SchemaStatement::AddColumn {
            model: schema.name().to_string(),
            column: field.sql_name().to_string(),
            sql_type: field.sql_type(),
        }
    }

    /// Returns the model the statement targets.
    pub fn model(&self) -> &str {
        match self {
            SchemaStatement::AddColumn { model, .. } => model,
        }
    }
}

impl fmt::Display for SchemaStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaStatement::AddColumn {
                model,
                column,
                sql_type,
            } => write!(f, "ALTER TABLE \"{model}\" ADD \"{column}\" {sql_type}"),
        }
    }
}

/// Connection to the local store.
///
/// Implementations must be `Send + Sync`: one adapter is shared by every
/// model's writer lane and by the migration planner.
pub trait StorageAdapter: Send + Sync {
    /// Returns true while the underlying connection is open.
    fn is_connected(&self) -> bool;

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ConnectionMissing`] if the connection is
    /// gone.
    fn begin_transaction(&self) -> CoreResult<Box<dyn StorageTransaction + '_>>;

    /// Returns the sync version of a stored record, including deleted ones.
    fn current_version(&self, model_name: &str, id: &str) -> CoreResult<Option<u64>>;

    /// Returns the schema version recorded by the last migration, if any.
    fn schema_version(&self) -> CoreResult<Option<String>>;

    /// Returns when a model last completed a sync, in Unix milliseconds.
    fn last_sync(&self, model_name: &str) -> CoreResult<Option<i64>>;
}

/// A unit of writes against the local store.
pub trait StorageTransaction {
    /// Executes a structural statement.
    fn execute(&mut self, statement: &SchemaStatement) -> CoreResult<()>;

    /// Inserts or replaces a record at the given sync version.
    fn upsert(&mut self, record: &Record, version: u64) -> CoreResult<()>;

    /// Deletes a record, keeping `version` as its tombstone version.
    fn delete(&mut self, model_name: &str, id: &str, version: u64) -> CoreResult<()>;

    /// Records the schema version the store now conforms to.
    fn set_schema_version(&mut self, version: &str) -> CoreResult<()>;

    /// Records when a model last completed a sync, in Unix milliseconds.
    fn set_last_sync(&mut self, model_name: &str, synced_at: i64) -> CoreResult<()>;

    /// Makes every write of this transaction visible.
    fn commit(self: Box<Self>) -> CoreResult<()>;

    /// Discards every write of this transaction.
    fn rollback(self: Box<Self>);
}

/// Closure-style transactions over any [`StorageAdapter`].
pub trait StorageAdapterExt: StorageAdapter {
    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut dyn StorageTransaction) -> CoreResult<T>,
    {
        let mut txn = self.begin_transaction()?;
        match f(&mut *txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }
}

impl<S: StorageAdapter + ?Sized> StorageAdapterExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn add_column_renders_sql() {
        let schema = ModelSchema::new("Post");
        let field = ModelField::new("title", FieldType::String);
        let statement = SchemaStatement::add_column(&schema, &field);

        assert_eq!(statement.model(), "Post");
        assert_eq!(statement.to_string(), "ALTER TABLE \"Post\" ADD \"title\" TEXT");
    }

    #[test]
    fn add_column_uses_target_name() {
        let schema = ModelSchema::new("Post");
        let field = ModelField::new("likeCount", FieldType::Int).with_target_name("like_count");
        let statement = SchemaStatement::add_column(&schema, &field);

        assert_eq!(
            statement.to_string(),
            "ALTER TABLE \"Post\" ADD \"like_count\" INTEGER"
        );
    }
}
