//! # FerryDB Sync Engine
//!
//! Startup sync for FerryDB.
//!
//! This crate provides:
//! - Retrying remote fetch with auth-mode fallback
//! - A serial writer that reconciles remote records into local storage
//! - One-time per-model sync queues
//! - The startup coordinator and its single readiness signal
//! - Startup orchestration (migrations first, then sync)
//!
//! ## Architecture
//!
//! Startup runs in two phases:
//! 1. Bring local storage to the current schema version
//! 2. Start one sync queue per syncable model
//!
//! Each queue fetches pages of its model's sync query and hands them to the
//! shared writer, which applies them under version comparison. Queues report
//! to the coordinator's status actor, which declares the store ready once
//! every model has reported.
//!
//! ## Key Invariants
//!
//! - Migrations complete before any fetch starts
//! - A fetch makes at most one attempt per auth-mode candidate
//! - Records of one model are applied in fetch order
//! - A record is written only if it is newer than the local copy
//! - `Ready` is dispatched exactly once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod coordinator;
mod error;
mod fetcher;
mod notifier;
mod queue;
mod startup;
mod transport;
mod writer;

pub use auth::{AuthModeResolver, DefaultAuthModeResolver, MultiAuthModeResolver};
pub use config::{
    RetryConfig, SyncConfig, DEFAULT_SYNC_INTERVAL, DEFAULT_SYNC_MAX_RECORDS,
    DEFAULT_SYNC_PAGE_SIZE,
};
pub use coordinator::{CoordinatorState, ReadinessTracker, ReportOutcome, StartupSyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use fetcher::RetryingFetcher;
pub use notifier::{BroadcastNotifier, DataStoreEvent, LifecycleNotifier};
pub use queue::{DisconnectReason, ModelSyncEvent, OnetimeSyncQueue, QueueContext};
pub use startup::{StartupSync, StartupSyncBuilder, SyncCollaborators};
pub use transport::{MockTransport, RemoteTransport, ScriptedFailure};
pub use writer::{ReconcileAndSaveQueue, ReconciliationOutcome, ReconciliationUnit};
