//! # FerryDB Core
//!
//! Local data model and storage seam for FerryDB.
//!
//! This crate provides:
//! - Model schemas and record decoding
//! - Query predicates used as sync filters
//! - The schema registry consulted at startup
//! - The storage adapter traits and an in-memory adapter
//! - Linear schema migrations
//!
//! ## Key Invariants
//!
//! - Every migration step runs in exactly one transaction
//! - The schema version is bumped in the same transaction as its step
//! - Record versions are never lowered by a write

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod migration;
mod predicate;
mod registry;
mod schema;
mod storage;

pub use error::{CoreError, CoreResult};
pub use memory::{MemoryStore, StoredRow};
pub use migration::{IntermediateMigration, MigrationMap, MigrationResult, MigrationRunResult};
pub use predicate::{GroupKind, QueryOperator, QueryPredicate};
pub use registry::{ModelRegistry, SchemaRegistry};
pub use schema::{AuthMode, FieldType, ModelField, ModelSchema, Record, ID_FIELD};
pub use storage::{SchemaStatement, StorageAdapter, StorageAdapterExt, StorageTransaction};
