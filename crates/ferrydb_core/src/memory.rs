//! In-memory storage adapter.

use crate::error::{CoreError, CoreResult};
use crate::schema::{ModelSchema, Record};
use crate::storage::{SchemaStatement, StorageAdapter, StorageTransaction};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A stored row, live or deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Sync version of the last write.
    pub version: u64,
    /// Whether the row is a tombstone.
    pub deleted: bool,
    /// Field values. Empty for tombstones.
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<(String, &'static str)>,
    rows: BTreeMap<String, StoredRow>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    tables: BTreeMap<String, Table>,
    schema_version: Option<String>,
    last_sync: HashMap<String, i64>,
}

/// An in-memory storage adapter.
///
/// Suitable for tests and for ephemeral stores. Transactions work on a
/// snapshot of the whole store and swap it in on commit; one transaction
/// runs at a time.
///
/// # Example
///
/// ```rust
/// use ferrydb_core::{MemoryStore, ModelSchema, StorageAdapter};
///
/// let store = MemoryStore::new();
/// store.create_table(&ModelSchema::new("Post"));
/// assert!(store.is_connected());
/// assert_eq!(store.current_version("Post", "p1").unwrap(), None);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    connected: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, connected store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            connected: AtomicBool::new(true),
            commits: AtomicU64::new(0),
        }
    }

    /// Creates a store with a table for each schema.
    #[must_use]
    pub fn with_schemas<'a>(schemas: impl IntoIterator<Item = &'a ModelSchema>) -> Self {
        let store = Self::new();
        for schema in schemas {
            store.create_table(schema);
        }
        store
    }

    /// Creates the table for a schema. Existing tables are left untouched.
    pub fn create_table(&self, schema: &ModelSchema) {
        let mut state = self.state.lock();
        state
            .tables
            .entry(schema.name().to_string())
            .or_insert_with(|| Table {
                columns: schema
                    .fields()
                    .iter()
                    .map(|f| (f.sql_name().to_string(), f.sql_type()))
                    .collect(),
                rows: BTreeMap::new(),
            });
    }

    /// Simulates losing the connection.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Returns the column names of a table.
    pub fn columns(&self, model_name: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .tables
            .get(model_name)
            .map(|t| t.columns.iter().map(|(name, _)| name.clone()).collect())
    }

    /// Returns a stored row, including tombstones.
    pub fn row(&self, model_name: &str, id: &str) -> Option<StoredRow> {
        self.state
            .lock()
            .tables
            .get(model_name)
            .and_then(|t| t.rows.get(id).cloned())
    }

    /// Returns the number of live (non-deleted) rows of a table.
    pub fn live_count(&self, model_name: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(model_name)
            .map(|t| t.rows.values().filter(|r| !r.deleted).count())
            .unwrap_or(0)
    }

    /// Returns how many transactions have committed.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> CoreResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CoreError::ConnectionMissing)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for MemoryStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn begin_transaction(&self) -> CoreResult<Box<dyn StorageTransaction + '_>> {
        self.ensure_connected()?;
        let guard = self.state.lock();
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            commits: &self.commits,
        }))
    }

    fn current_version(&self, model_name: &str, id: &str) -> CoreResult<Option<u64>> {
        self.ensure_connected()?;
        let state = self.state.lock();
        let table = state
            .tables
            .get(model_name)
            .ok_or_else(|| CoreError::TableNotFound {
                model: model_name.to_string(),
            })?;
        Ok(table.rows.get(id).map(|row| row.version))
    }

    fn schema_version(&self) -> CoreResult<Option<String>> {
        self.ensure_connected()?;
        Ok(self.state.lock().schema_version.clone())
    }

    fn last_sync(&self, model_name: &str) -> CoreResult<Option<i64>> {
        self.ensure_connected()?;
        Ok(self.state.lock().last_sync.get(model_name).copied())
    }
}

struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, StoreState>,
    staged: StoreState,
    commits: &'a AtomicU64,
}

impl MemoryTransaction<'_> {
    fn table_mut(&mut self, model_name: &str) -> CoreResult<&mut Table> {
        self.staged
            .tables
            .get_mut(model_name)
            .ok_or_else(|| CoreError::TableNotFound {
                model: model_name.to_string(),
            })
    }
}

impl StorageTransaction for MemoryTransaction<'_> {
    fn execute(&mut self, statement: &SchemaStatement) -> CoreResult<()> {
        match statement {
            SchemaStatement::AddColumn {
                model,
                column,
                sql_type,
            } => {
                let table = self.table_mut(model)?;
                if table.columns.iter().any(|(name, _)| name == column) {
                    return Err(CoreError::ColumnExists {
                        model: model.clone(),
                        column: column.clone(),
                    });
                }
                table.columns.push((column.clone(), sql_type));
                Ok(())
            }
        }
    }

    fn upsert(&mut self, record: &Record, version: u64) -> CoreResult<()> {
        let table = self.table_mut(&record.model_name)?;
        table.rows.insert(
            record.id.clone(),
            StoredRow {
                version,
                deleted: false,
                fields: record.fields.clone(),
            },
        );
        Ok(())
    }

    fn delete(&mut self, model_name: &str, id: &str, version: u64) -> CoreResult<()> {
        let table = self.table_mut(model_name)?;
        table.rows.insert(
            id.to_string(),
            StoredRow {
                version,
                deleted: true,
                fields: Map::new(),
            },
        );
        Ok(())
    }

    fn set_schema_version(&mut self, version: &str) -> CoreResult<()> {
        self.staged.schema_version = Some(version.to_string());
        Ok(())
    }

    fn set_last_sync(&mut self, model_name: &str, synced_at: i64) -> CoreResult<()> {
        self.staged
            .last_sync
            .insert(model_name.to_string(), synced_at);
        Ok(())
    }

    fn commit(self: Box<Self>) -> CoreResult<()> {
        let MemoryTransaction {
            mut guard,
            staged,
            commits,
        } = *self;
        *guard = staged;
        commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}
