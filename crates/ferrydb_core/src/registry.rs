//! Schema registry.

use crate::predicate::QueryPredicate;
use crate::schema::ModelSchema;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of the model schemas that take part in sync.
pub trait SchemaRegistry: Send + Sync {
    /// Lists the schemas of every syncable model, in registration order.
    fn syncable_model_schemas(&self) -> Vec<Arc<ModelSchema>>;

    /// Returns the sync filter configured for a model, if any.
    ///
    /// Models without a filter are not synced at startup.
    fn filter_predicate(&self, model_name: &str) -> Option<QueryPredicate>;
}

/// In-memory schema registry.
///
/// Registration order is preserved. Registering the same model name twice
/// keeps both entries so that consumers can detect the duplicate.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    schemas: RwLock<Vec<Arc<ModelSchema>>>,
    sync_expressions: RwLock<HashMap<String, QueryPredicate>>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema without a sync filter.
    pub fn register(&self, schema: ModelSchema) -> Arc<ModelSchema> {
        let schema = Arc::new(schema);
        self.schemas.write().push(Arc::clone(&schema));
        schema
    }

    /// Registers a schema that syncs every remote record.
    pub fn register_synced(&self, schema: ModelSchema) -> Arc<ModelSchema> {
        let name = schema.name().to_string();
        let schema = self.register(schema);
        self.set_sync_expression(name, QueryPredicate::All);
        schema
    }

    /// Sets the sync filter for a model.
    pub fn set_sync_expression(&self, model_name: impl Into<String>, predicate: QueryPredicate) {
        self.sync_expressions
            .write()
            .insert(model_name.into(), predicate);
    }

    /// Looks up the first schema registered under `name`.
    pub fn schema(&self, name: &str) -> Option<Arc<ModelSchema>> {
        self.schemas
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Returns the number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Returns true if no schema is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

impl SchemaRegistry for ModelRegistry {
    fn syncable_model_schemas(&self) -> Vec<Arc<ModelSchema>> {
        self.schemas.read().clone()
    }

    fn filter_predicate(&self, model_name: &str) -> Option<QueryPredicate> {
        self.sync_expressions.read().get(model_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_order_preserved() {
        let registry = ModelRegistry::new();
        registry.register(ModelSchema::new("Post"));
        registry.register(ModelSchema::new("Comment"));

        let names: Vec<_> = registry
            .syncable_model_schemas()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["Post", "Comment"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn filter_predicates() {
        let registry = ModelRegistry::new();
        registry.register(ModelSchema::new("Draft"));
        registry.register_synced(ModelSchema::new("Post"));

        assert!(registry.filter_predicate("Draft").is_none());
        assert_eq!(registry.filter_predicate("Post"), Some(QueryPredicate::All));
        assert!(registry.schema("Post").is_some());
        assert!(registry.schema("Missing").is_none());
    }
}
