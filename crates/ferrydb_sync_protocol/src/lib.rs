//! # FerryDB Sync Protocol
//!
//! Sync query and response types for FerryDB.
//!
//! This crate provides:
//! - `AuthModeCandidates`, the single-pass list of auth modes to try
//! - `SyncQueryRequest` for one page of a model's sync query
//! - `PageEnvelope` decoding of responses with a dynamic outer key
//! - `MutationSyncResult` (record plus sync metadata) and `MutationEvent`
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod envelope;
mod error;
mod messages;
mod mutation;

pub use auth::AuthModeCandidates;
pub use envelope::{ItemDecodeFailure, PageEnvelope, SyncPage};
pub use error::{ProtocolError, ProtocolResult};
pub use ferrydb_core::AuthMode;
pub use messages::{ModelOperation, SyncQueryRequest};
pub use mutation::{
    DropReason, MutationEvent, MutationSyncResult, MutationType, SyncMetadata, DELETED_KEY,
    LAST_CHANGED_AT_KEY, VERSION_KEY,
};
