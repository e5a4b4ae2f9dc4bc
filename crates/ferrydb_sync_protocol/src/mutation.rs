//! Remote records with sync metadata, and the mutation events they become.

use crate::error::{ProtocolError, ProtocolResult};
use ferrydb_core::{ModelSchema, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key of the record version in a raw remote item.
pub const VERSION_KEY: &str = "_version";
/// Key of the soft-delete flag in a raw remote item.
pub const DELETED_KEY: &str = "_deleted";
/// Key of the last-changed timestamp in a raw remote item.
pub const LAST_CHANGED_AT_KEY: &str = "_lastChangedAt";

/// Sync bookkeeping attached to every remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Record id.
    pub id: String,
    /// Monotonically increasing version.
    pub version: u64,
    /// Whether the record is soft-deleted.
    pub deleted: bool,
    /// Last change time in Unix milliseconds.
    pub last_changed_at: i64,
}

/// A remote record together with its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSyncResult {
    /// The decoded record.
    pub model: Record,
    /// Its sync metadata.
    pub sync_metadata: SyncMetadata,
}

impl MutationSyncResult {
    /// Decodes one raw remote item against `schema`.
    ///
    /// The item is a JSON object carrying the record fields plus the
    /// `_version`, `_lastChangedAt` and optional `_deleted` keys.
    ///
    /// # Errors
    ///
    /// Fails if the item is not an object, if a metadata key is missing or
    /// mistyped, or if the record does not match the schema.
    pub fn from_raw(schema: &ModelSchema, raw: &Value) -> ProtocolResult<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| ProtocolError::malformed("item is not an object"))?;

        let version = object
            .get(VERSION_KEY)
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingMetadata { field: VERSION_KEY })?;
        let last_changed_at = object
            .get(LAST_CHANGED_AT_KEY)
            .and_then(Value::as_i64)
            .ok_or(ProtocolError::MissingMetadata {
                field: LAST_CHANGED_AT_KEY,
            })?;
        let deleted = match object.get(DELETED_KEY) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(ProtocolError::MissingMetadata { field: DELETED_KEY }),
        };

        let fields: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), VERSION_KEY | DELETED_KEY | LAST_CHANGED_AT_KEY))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let model = schema.decode_record(&Value::Object(fields))?;

        Ok(Self {
            sync_metadata: SyncMetadata {
                id: model.id.clone(),
                version,
                deleted,
                last_changed_at,
            },
            model,
        })
    }

    /// Returns the model name.
    pub fn model_name(&self) -> &str {
        &self.model.model_name
    }

    /// Returns the record id.
    pub fn id(&self) -> &str {
        &self.model.id
    }

    /// Returns the record version.
    pub fn version(&self) -> u64 {
        self.sync_metadata.version
    }

    /// Returns true if the record is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.sync_metadata.deleted
    }
}

/// The kind of change a mutation event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationType {
    /// First write of a record.
    Create,
    /// Write over an existing record.
    Update,
    /// Soft delete.
    Delete,
}

/// A change applied to local storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Model name.
    pub model_name: String,
    /// Record id.
    pub model_id: String,
    /// Version that was written.
    pub version: u64,
    /// Kind of change.
    pub mutation_type: MutationType,
    /// Record fields after the change. Empty for deletes.
    pub json: Map<String, Value>,
}

impl MutationEvent {
    /// Builds the event for a reconciled remote record.
    ///
    /// `existed` tells whether the id was already known locally.
    pub fn from_sync_result(result: &MutationSyncResult, existed: bool) -> Self {
        let (mutation_type, json) = if result.is_deleted() {
            (MutationType::Delete, Map::new())
        } else if existed {
            (MutationType::Update, result.model.fields.clone())
        } else {
            (MutationType::Create, result.model.fields.clone())
        };

        Self {
            model_name: result.model_name().to_string(),
            model_id: result.id().to_string(),
            version: result.version(),
            mutation_type,
            json,
        }
    }
}

/// Why a remote record was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The local copy is at the same or a newer version.
    StaleVersion {
        /// Id of the record.
        id: String,
        /// Local version.
        local: u64,
        /// Incoming version.
        incoming: u64,
    },
    /// The raw item could not be decoded.
    Decode(String),
    /// Local storage rejected the write.
    Storage(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::StaleVersion {
                id,
                local,
                incoming,
            } => write!(f, "stale version for {id}: local {local}, incoming {incoming}"),
            DropReason::Decode(message) => write!(f, "decode failed: {message}"),
            DropReason::Storage(message) => write!(f, "storage write failed: {message}"),
        }
    }
}
