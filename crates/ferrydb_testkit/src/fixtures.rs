//! Test fixtures.
//!
//! Provides sample schemas, raw remote record builders, a notifier that
//! records what it receives and a store that fails on demand.

use ferrydb_core::{
    AuthMode, CoreError, CoreResult, FieldType, MemoryStore, ModelField, ModelRegistry,
    ModelSchema, Record, SchemaStatement, StorageAdapter, StorageTransaction,
};
use ferrydb_sync_engine::{DataStoreEvent, LifecycleNotifier};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// `Post` with `title` (required), `rating` and `status`.
pub fn post_schema() -> ModelSchema {
    ModelSchema::new("Post")
        .field(ModelField::new("title", FieldType::String).required())
        .field(ModelField::new("rating", FieldType::Int))
        .field(ModelField::new("status", FieldType::Enum))
        .allow_auth_mode(AuthMode::UserPools)
        .allow_auth_mode(AuthMode::ApiKey)
}

/// `Comment` with `content` (required) and `postId`.
pub fn comment_schema() -> ModelSchema {
    ModelSchema::new("Comment")
        .field(ModelField::new("content", FieldType::String).required())
        .field(ModelField::new("postId", FieldType::String).with_target_name("post_id"))
}

/// `Author` with `name` (required).
pub fn author_schema() -> ModelSchema {
    ModelSchema::new("Author").field(ModelField::new("name", FieldType::String).required())
}

/// A registry with `Post`, `Comment` and `Author`, all synced in full.
pub fn sample_registry() -> ModelRegistry {
    let registry = ModelRegistry::new();
    registry.register_synced(post_schema());
    registry.register_synced(comment_schema());
    registry.register_synced(author_schema());
    registry
}

/// A store with a table for each sample schema.
pub fn sample_store() -> MemoryStore {
    MemoryStore::with_schemas([&post_schema(), &comment_schema(), &author_schema()])
}

/// A raw remote `Post` item.
pub fn raw_post(id: &str, title: &str, version: u64) -> Value {
    json!({
        "id": id,
        "title": title,
        "rating": 3,
        "_version": version,
        "_lastChangedAt": 1_700_000_000_000_i64 + version as i64,
        "_deleted": false,
    })
}

/// A raw remote `Comment` item.
pub fn raw_comment(id: &str, content: &str, version: u64) -> Value {
    json!({
        "id": id,
        "content": content,
        "postId": "p1",
        "_version": version,
        "_lastChangedAt": 1_700_000_000_000_i64,
    })
}

/// A raw remote `Author` item.
pub fn raw_author(id: &str, name: &str, version: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "_version": version,
        "_lastChangedAt": 1_700_000_000_000_i64,
    })
}

/// A raw item whose sync metadata is missing.
pub fn raw_malformed(id: &str) -> Value {
    json!({"id": id, "title": "no metadata"})
}

/// A fresh random record id.
pub fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A notifier that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DataStoreEvent>>,
}

impl RecordingNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every event received, in order.
    pub fn events(&self) -> Vec<DataStoreEvent> {
        self.events.lock().clone()
    }

    /// Counts events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DataStoreEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|&e| predicate(e)).count()
    }

    /// Counts `Ready` events.
    pub fn ready_count(&self) -> usize {
        self.count(|e| matches!(e, DataStoreEvent::Ready))
    }

    /// Names of models that reported `ModelSynced`, in order.
    pub fn synced_models(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DataStoreEvent::ModelSynced { model_name } => Some(model_name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl LifecycleNotifier for RecordingNotifier {
    fn dispatch(&self, event: DataStoreEvent) {
        self.events.lock().push(event);
    }
}

/// A [`MemoryStore`] wrapper that fails writes of chosen record ids.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_ids: Mutex<HashSet<String>>,
}

impl FlakyStore {
    /// Wraps a store.
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing_ids: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every write of `id` fail.
    pub fn fail_writes_of(&self, id: impl Into<String>) {
        self.failing_ids.lock().insert(id.into());
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl StorageAdapter for FlakyStore {
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn begin_transaction(&self) -> CoreResult<Box<dyn StorageTransaction + '_>> {
        let failing_ids = self.failing_ids.lock().clone();
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin_transaction()?,
            failing_ids,
        }))
    }

    fn current_version(&self, model_name: &str, id: &str) -> CoreResult<Option<u64>> {
        self.inner.current_version(model_name, id)
    }

    fn schema_version(&self) -> CoreResult<Option<String>> {
        self.inner.schema_version()
    }

    fn last_sync(&self, model_name: &str) -> CoreResult<Option<i64>> {
        self.inner.last_sync(model_name)
    }
}

struct FlakyTransaction<'a> {
    inner: Box<dyn StorageTransaction + 'a>,
    failing_ids: HashSet<String>,
}

impl FlakyTransaction<'_> {
    fn check(&self, id: &str) -> CoreResult<()> {
        if self.failing_ids.contains(id) {
            Err(CoreError::storage(format!("injected write failure for {id}")))
        } else {
            Ok(())
        }
    }
}

impl StorageTransaction for FlakyTransaction<'_> {
    fn execute(&mut self, statement: &SchemaStatement) -> CoreResult<()> {
        self.inner.execute(statement)
    }

    fn upsert(&mut self, record: &Record, version: u64) -> CoreResult<()> {
        self.check(&record.id)?;
        self.inner.upsert(record, version)
    }

    fn delete(&mut self, model_name: &str, id: &str, version: u64) -> CoreResult<()> {
        self.check(id)?;
        self.inner.delete(model_name, id, version)
    }

    fn set_schema_version(&mut self, version: &str) -> CoreResult<()> {
        self.inner.set_schema_version(version)
    }

    fn set_last_sync(&mut self, model_name: &str, synced_at: i64) -> CoreResult<()> {
        self.inner.set_last_sync(model_name, synced_at)
    }

    fn commit(self: Box<Self>) -> CoreResult<()> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) {
        self.inner.rollback();
    }
}

static TRACING: Once = Once::new();

/// Installs a test tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test harness.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
