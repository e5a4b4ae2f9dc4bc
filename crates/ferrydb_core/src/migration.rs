//! Schema migration support.
//!
//! Local stores are upgraded by walking a linear chain of schema versions.
//! Every edge of the chain carries an [`IntermediateMigration`]: an ordered
//! list of structural statements that move the store from one version to
//! the next.
//!
//! ## Design
//!
//! Migrations in FerryDB are:
//! - **Declared in code**: edges are registered on a [`MigrationMap`] at
//!   configuration time and never change afterwards
//! - **Forward-only**: asking for a path backwards yields nothing
//! - **Step-atomic**: each edge runs in its own transaction together with
//!   the schema version bump; a failing edge leaves earlier edges committed
//! - **Best effort**: versions missing from the map produce an empty plan
//!
//! ## Usage
//!
//! ```rust
//! use ferrydb_core::{FieldType, MemoryStore, MigrationMap, ModelField, ModelSchema};
//!
//! let post = ModelSchema::new("Post")
//!     .field(ModelField::new("title", FieldType::String))
//!     .field(ModelField::new("subtitle", FieldType::String));
//!
//! let mut map = MigrationMap::new();
//! map.add_migration("v1", "v2", |m| {
//!     m.add_column("subtitle", &post);
//! })
//! .unwrap();
//!
//! let steps = map.migrations("v1", "v2");
//! assert_eq!(steps.len(), 1);
//! ```

use crate::error::{CoreError, CoreResult};
use crate::schema::ModelSchema;
use crate::storage::{SchemaStatement, StorageAdapter, StorageAdapterExt};
use tracing::{info, warn};

/// The structural changes between two adjacent schema versions.
#[derive(Debug, Clone)]
pub struct IntermediateMigration {
    from_version: String,
    to_version: String,
    statements: Vec<SchemaStatement>,
}

impl IntermediateMigration {
    /// Creates an empty migration between two versions.
    pub fn new(from_version: impl Into<String>, to_version: impl Into<String>) -> Self {
        Self {
            from_version: from_version.into(),
            to_version: to_version.into(),
            statements: Vec::new(),
        }
    }

    /// Returns the version this migration upgrades from.
    pub fn from_version(&self) -> &str {
        &self.from_version
    }

    /// Returns the version this migration upgrades to.
    pub fn to_version(&self) -> &str {
        &self.to_version
    }

    /// Returns the statements in application order.
    pub fn statements(&self) -> &[SchemaStatement] {
        &self.statements
    }

    /// Adds a column for an existing field of `schema`.
    ///
    /// A field name the schema does not know is skipped with a warning.
    pub fn add_column(&mut self, field_name: &str, schema: &ModelSchema) -> &mut Self {
        match schema.field_named(field_name) {
            Some(field) => {
                self.statements
                    .push(SchemaStatement::add_column(schema, field));
            }
            None => warn!(
                model = schema.name(),
                field = field_name,
                "migration {} -> {} references an unknown field, skipping",
                self.from_version,
                self.to_version
            ),
        }
        self
    }

    /// Adds an arbitrary structural statement.
    pub fn add_statement(&mut self, statement: SchemaStatement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    /// Applies every statement in a single transaction.
    ///
    /// The schema version is bumped to [`Self::to_version`] in the same
    /// transaction. Nothing is committed unless every statement succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionMissing`] without touching the store if
    /// the connection is gone, or the first statement error otherwise.
    pub fn apply(&self, storage: &dyn StorageAdapter) -> CoreResult<()> {
        if !storage.is_connected() {
            return Err(CoreError::ConnectionMissing);
        }

        storage.transaction(|txn| {
            for statement in &self.statements {
                txn.execute(statement)?;
            }
            txn.set_schema_version(&self.to_version)
        })
    }
}

/// Result of applying a single migration step.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Version the step upgraded from.
    pub from_version: String,
    /// Version the step upgraded to.
    pub to_version: String,
    /// Whether the step committed.
    pub success: bool,
    /// Error message if the step failed.
    pub error: Option<String>,
}

/// Result of bringing a store up to a target version.
#[derive(Debug, Clone)]
pub struct MigrationRunResult {
    /// Steps that were attempted, in order.
    pub migrations: Vec<MigrationResult>,
    /// The schema version the store is at afterwards.
    pub final_version: Option<String>,
    /// Number of steps committed.
    pub applied_count: usize,
    /// Number of steps that failed (0 or 1, the run stops on failure).
    pub failed_count: usize,
}

impl MigrationRunResult {
    /// Returns true if no step failed.
    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }
}

/// The version chain and the migrations along its edges.
#[derive(Debug, Clone, Default)]
pub struct MigrationMap {
    versions: Vec<String>,
    migrations: Vec<IntermediateMigration>,
}

impl MigrationMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the known versions in chain order.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Returns true if no migration is registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Registers the migration from `from_version` to `to_version`.
    ///
    /// The first registration seeds the chain with `from_version`. Later
    /// registrations must start at a known version and end at a new one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMigrationEdge`] for an unknown source
    /// version, a target that is already in the chain, or a self edge.
    pub fn add_migration<F>(
        &mut self,
        from_version: impl Into<String>,
        to_version: impl Into<String>,
        build: F,
    ) -> CoreResult<()>
    where
        F: FnOnce(&mut IntermediateMigration),
    {
        let from_version = from_version.into();
        let to_version = to_version.into();

        if from_version == to_version {
            return Err(CoreError::invalid_migration_edge(
                from_version,
                to_version,
                "an edge must change the version",
            ));
        }
        if !self.versions.is_empty() && !self.versions.contains(&from_version) {
            return Err(CoreError::invalid_migration_edge(
                from_version,
                to_version,
                "unknown source version",
            ));
        }
        if self.versions.contains(&to_version) {
            return Err(CoreError::invalid_migration_edge(
                from_version,
                to_version,
                "target version already registered",
            ));
        }

        if self.versions.is_empty() {
            self.versions.push(from_version.clone());
        }
        self.versions.push(to_version.clone());

        let mut migration = IntermediateMigration::new(from_version, to_version);
        build(&mut migration);
        self.migrations.push(migration);
        Ok(())
    }

    /// Returns the migrations on the path from `from_version` to
    /// `to_version`, in version order.
    ///
    /// The result is empty when the versions are equal, when either is
    /// unknown, or when `to_version` precedes `from_version`.
    pub fn migrations(&self, from_version: &str, to_version: &str) -> Vec<&IntermediateMigration> {
        if from_version == to_version {
            return Vec::new();
        }
        let (Some(start), Some(end)) = (self.position(from_version), self.position(to_version))
        else {
            return Vec::new();
        };

        (start..end)
            .filter_map(|index| {
                let from = &self.versions[index];
                let to = &self.versions[index + 1];
                self.migrations
                    .iter()
                    .find(|m| &m.from_version == from && &m.to_version == to)
            })
            .collect()
    }

    /// Brings `storage` up to `target_version`.
    ///
    /// A store with no recorded version is stamped with the target without
    /// running any step. Steps run in order; the run stops at the first
    /// failing step and reports it in the result, earlier steps stay
    /// committed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionMissing`] if the connection is gone,
    /// or a storage error if the current version cannot be read.
    pub fn apply_pending(
        &self,
        storage: &dyn StorageAdapter,
        target_version: &str,
    ) -> CoreResult<MigrationRunResult> {
        if !storage.is_connected() {
            return Err(CoreError::ConnectionMissing);
        }

        let Some(current) = storage.schema_version()? else {
            storage.transaction(|txn| txn.set_schema_version(target_version))?;
            info!(version = target_version, "stamped fresh store with schema version");
            return Ok(MigrationRunResult {
                migrations: Vec::new(),
                final_version: Some(target_version.to_string()),
                applied_count: 0,
                failed_count: 0,
            });
        };

        let steps = self.migrations(&current, target_version);
        if steps.is_empty() && current != target_version {
            warn!(
                from = %current,
                to = target_version,
                "no migration path between schema versions"
            );
        }

        let mut results = Vec::with_capacity(steps.len());
        let mut final_version = current;
        let mut applied_count = 0;
        let mut failed_count = 0;

        for step in steps {
            match step.apply(storage) {
                Ok(()) => {
                    info!(
                        from = step.from_version(),
                        to = step.to_version(),
                        statements = step.statements().len(),
                        "applied schema migration"
                    );
                    applied_count += 1;
                    final_version = step.to_version.clone();
                    results.push(MigrationResult {
                        from_version: step.from_version.clone(),
                        to_version: step.to_version.clone(),
                        success: true,
                        error: None,
                    });
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(
                        from = step.from_version(),
                        to = step.to_version(),
                        error = %err,
                        "schema migration failed"
                    );
                    failed_count += 1;
                    results.push(MigrationResult {
                        from_version: step.from_version.clone(),
                        to_version: step.to_version.clone(),
                        success: false,
                        error: Some(err.to_string()),
                    });
                    break;
                }
            }
        }

        Ok(MigrationRunResult {
            migrations: results,
            final_version: Some(final_version),
            applied_count,
            failed_count,
        })
    }

    fn position(&self, version: &str) -> Option<usize> {
        self.versions.iter().position(|v| v == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::schema::{FieldType, ModelField};
    use crate::storage::StorageAdapterExt;
    use proptest::prelude::*;

    fn post_schema() -> ModelSchema {
        ModelSchema::new("Post")
            .field(ModelField::new("title", FieldType::String))
            .field(ModelField::new("subtitle", FieldType::String))
    }

    fn post_map() -> MigrationMap {
        let post = post_schema();
        let mut map = MigrationMap::new();
        map.add_migration("v1", "v2", |m| {
            m.add_column("title", &post);
        })
        .unwrap();
        map.add_migration("v2", "v3", |m| {
            m.add_column("subtitle", &post);
        })
        .unwrap();
        map
    }

    /// A store whose Post table predates both columns.
    fn v1_store() -> MemoryStore {
        let store = MemoryStore::with_schemas([&ModelSchema::new("Post")]);
        store.transaction(|txn| txn.set_schema_version("v1")).unwrap();
        store
    }

    #[test]
    fn path_is_in_version_order() {
        let map = post_map();
        let steps = map.migrations("v1", "v3");

        let edges: Vec<_> = steps
            .iter()
            .map(|m| (m.from_version(), m.to_version()))
            .collect();
        assert_eq!(edges, vec![("v1", "v2"), ("v2", "v3")]);
        assert_eq!(
            steps[0].statements()[0].to_string(),
            "ALTER TABLE \"Post\" ADD \"title\" TEXT"
        );
        assert_eq!(
            steps[1].statements()[0].to_string(),
            "ALTER TABLE \"Post\" ADD \"subtitle\" TEXT"
        );
    }

    #[test]
    fn empty_plans() {
        let map = post_map();
        assert!(map.migrations("v2", "v2").is_empty());
        assert!(map.migrations("v0", "v3").is_empty());
        assert!(map.migrations("v1", "v9").is_empty());
        assert!(map.migrations("v3", "v1").is_empty());
        assert!(MigrationMap::new().migrations("v1", "v2").is_empty());
    }

    #[test]
    fn unknown_source_version_rejected() {
        let mut map = post_map();
        let err = map.add_migration("v7", "v8", |_| {}).unwrap_err();
        assert!(matches!(err, CoreError::InvalidMigrationEdge { .. }));
        assert_eq!(map.versions(), &["v1", "v2", "v3"]);
    }

    #[test]
    fn cycles_and_self_edges_rejected() {
        let mut map = post_map();
        assert!(map.add_migration("v3", "v1", |_| {}).is_err());
        assert!(map.add_migration("v3", "v3", |_| {}).is_err());
    }

    #[test]
    fn unknown_field_is_skipped() {
        let post = post_schema();
        let mut map = MigrationMap::new();
        map.add_migration("v1", "v2", |m| {
            m.add_column("nope", &post).add_column("title", &post);
        })
        .unwrap();

        assert_eq!(map.migrations("v1", "v2")[0].statements().len(), 1);
    }

    #[test]
    fn each_step_is_one_transaction() {
        let store = v1_store();
        let before = store.commit_count();

        let result = post_map().apply_pending(&store, "v3").unwrap();

        assert!(result.is_success());
        assert_eq!(result.applied_count, 2);
        assert_eq!(store.commit_count() - before, 2);
        assert_eq!(store.schema_version().unwrap().as_deref(), Some("v3"));
        assert_eq!(
            store.columns("Post").unwrap(),
            vec!["id".to_string(), "title".to_string(), "subtitle".to_string()]
        );
    }

    #[test]
    fn failing_step_keeps_earlier_steps() {
        let post = post_schema().field(ModelField::new("extra", FieldType::Int));
        let mut map = post_map();
        // Adds `title` a second time, which the store rejects.
        map.add_migration("v3", "v4", |m| {
            m.add_column("extra", &post).add_column("title", &post);
        })
        .unwrap();
        let store = v1_store();

        let result = map.apply_pending(&store, "v4").unwrap();

        assert_eq!(result.applied_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.final_version.as_deref(), Some("v3"));
        assert_eq!(store.schema_version().unwrap().as_deref(), Some("v3"));
        // The step was all-or-nothing: the valid first statement did not land.
        assert_eq!(store.columns("Post").unwrap().len(), 3);
    }

    #[test]
    fn fresh_store_is_stamped() {
        let store = MemoryStore::with_schemas([&post_schema()]);
        let result = post_map().apply_pending(&store, "v3").unwrap();

        assert_eq!(result.applied_count, 0);
        assert_eq!(store.schema_version().unwrap().as_deref(), Some("v3"));
    }

    #[test]
    fn missing_connection_is_fatal() {
        let store = v1_store();
        store.disconnect();

        let err = post_map().apply_pending(&store, "v3").unwrap_err();
        assert!(matches!(err, CoreError::ConnectionMissing));

        let step = IntermediateMigration::new("v1", "v2");
        assert!(matches!(step.apply(&store), Err(CoreError::ConnectionMissing)));
    }

    #[test]
    fn unknown_current_version_leaves_store_alone() {
        let store = MemoryStore::with_schemas([&ModelSchema::new("Post")]);
        store.transaction(|txn| txn.set_schema_version("legacy")).unwrap();

        let result = post_map().apply_pending(&store, "v3").unwrap();
        assert_eq!(result.applied_count, 0);
        assert_eq!(result.final_version.as_deref(), Some("legacy"));
    }

    fn chain(len: usize) -> MigrationMap {
        let mut map = MigrationMap::new();
        for i in 0..len {
            map.add_migration(format!("v{i}"), format!("v{}", i + 1), |_| {})
                .unwrap();
        }
        map
    }

    proptest! {
        #[test]
        fn unknown_versions_give_empty_plan(from in "[a-z]{1,6}", to in "[a-z]{1,6}") {
            // Generated labels never start with `v` followed by a digit.
            let map = chain(5);
            prop_assert!(map.migrations(&from, &to).is_empty());
            prop_assert!(map.migrations(&from, "v3").is_empty());
            prop_assert!(map.migrations("v1", &to).is_empty());
        }

        #[test]
        fn path_length_matches_distance(len in 1usize..12, a in 0usize..12, b in 0usize..12) {
            let map = chain(len);
            let (a, b) = (a.min(len), b.min(len));
            let steps = map.migrations(&format!("v{a}"), &format!("v{b}"));
            let expected = b.saturating_sub(a);
            prop_assert_eq!(steps.len(), expected);
            for (offset, step) in steps.iter().enumerate() {
                let from = format!("v{}", a + offset);
                prop_assert_eq!(step.from_version(), from.as_str());
            }
        }
    }
}
