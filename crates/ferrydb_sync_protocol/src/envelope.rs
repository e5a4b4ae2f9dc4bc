//! Sync response envelopes.
//!
//! A sync query response wraps its page under a key that is only known at
//! response time (the operation name, e.g. `syncPosts`):
//!
//! ```json
//! { "syncPosts": { "items": [...], "nextToken": "abc", "startedAt": 1700000000000 } }
//! ```
//!
//! A GraphQL `data` wrapper around that object is accepted as well. The
//! envelope is decoded in two stages: [`PageEnvelope::from_value`] resolves
//! the dynamic key and extracts the raw items, then [`PageEnvelope::decode`]
//! decodes each item on its own so that a malformed item is dropped without
//! failing the page.

use crate::error::{ProtocolError, ProtocolResult};
use crate::mutation::MutationSyncResult;
use ferrydb_core::ModelSchema;
use serde_json::{Map, Value};

const DATA_KEY: &str = "data";
const ITEMS_KEY: &str = "items";
const NEXT_TOKEN_KEY: &str = "nextToken";
const STARTED_AT_KEY: &str = "startedAt";

/// A page of raw remote items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageEnvelope {
    /// Raw items, not yet decoded.
    pub items: Vec<Value>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
    /// Server time the query started at, in Unix milliseconds.
    pub started_at: Option<i64>,
}

impl PageEnvelope {
    /// Resolves the dynamic outer key of a raw response.
    ///
    /// The first key of the outer object names the page. A missing or null
    /// `items` yields an empty page.
    ///
    /// # Errors
    ///
    /// Fails if the response is not an object, has no keys, or the page
    /// under the first key is not an object.
    pub fn from_value(raw: &Value) -> ProtocolResult<Self> {
        let page = Self::resolve_page(raw)?;

        let items = match page.get(ITEMS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(ProtocolError::malformed("items is not an array")),
        };
        let next_token = page
            .get(NEXT_TOKEN_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        let started_at = page.get(STARTED_AT_KEY).and_then(Value::as_i64);

        Ok(Self {
            items,
            next_token,
            started_at,
        })
    }

    fn resolve_page(raw: &Value) -> ProtocolResult<&Map<String, Value>> {
        let outer = raw
            .as_object()
            .ok_or_else(|| ProtocolError::malformed("response is not an object"))?;
        let (key, value) = outer
            .iter()
            .next()
            .ok_or_else(|| ProtocolError::malformed("response has no keys"))?;

        let page = value
            .as_object()
            .ok_or_else(|| ProtocolError::malformed(format!("{key} is not an object")))?;

        if key == DATA_KEY && !page.contains_key(ITEMS_KEY) {
            return Self::resolve_page(value);
        }
        Ok(page)
    }

    /// Decodes every item against `schema`.
    pub fn decode(self, schema: &ModelSchema) -> SyncPage {
        let mut results = Vec::with_capacity(self.items.len());
        let mut dropped = Vec::new();

        for (index, item) in self.items.iter().enumerate() {
            match MutationSyncResult::from_raw(schema, item) {
                Ok(result) => results.push(result),
                Err(err) => dropped.push(ItemDecodeFailure {
                    index,
                    id: item.get("id").and_then(Value::as_str).map(str::to_string),
                    message: err.to_string(),
                }),
            }
        }

        SyncPage {
            results,
            dropped,
            next_token: self.next_token,
            started_at: self.started_at,
        }
    }
}

/// An item that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDecodeFailure {
    /// Position of the item in the page.
    pub index: usize,
    /// Record id, if the item carried one.
    pub id: Option<String>,
    /// Decode error.
    pub message: String,
}

/// A decoded page of remote records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncPage {
    /// Records that decoded.
    pub results: Vec<MutationSyncResult>,
    /// Items that did not.
    pub dropped: Vec<ItemDecodeFailure>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
    /// Server time the query started at, in Unix milliseconds.
    pub started_at: Option<i64>,
}

impl SyncPage {
    /// Returns the number of raw items the page carried.
    pub fn item_count(&self) -> usize {
        self.results.len() + self.dropped.len()
    }
}
