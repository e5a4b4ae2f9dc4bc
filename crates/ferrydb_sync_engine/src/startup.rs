//! Startup orchestration: migrate, then sync.

use crate::auth::AuthModeResolver;
use crate::config::SyncConfig;
use crate::coordinator::{CoordinatorState, StartupSyncCoordinator};
use crate::error::{SyncError, SyncResult};
use crate::notifier::LifecycleNotifier;
use crate::queue::QueueContext;
use crate::transport::RemoteTransport;
use crate::writer::ReconcileAndSaveQueue;
use ferrydb_core::{CoreError, MigrationMap, MigrationRunResult, SchemaRegistry, StorageAdapter};
use std::sync::Arc;
use tracing::{info, instrument};

/// The external collaborators startup sync runs against.
#[derive(Clone)]
pub struct SyncCollaborators {
    /// Schema registry.
    pub registry: Arc<dyn SchemaRegistry>,
    /// Remote query transport.
    pub transport: Arc<dyn RemoteTransport>,
    /// Auth-mode resolver.
    pub auth_modes: Arc<dyn AuthModeResolver>,
    /// Local storage.
    pub storage: Arc<dyn StorageAdapter>,
    /// Lifecycle notifier.
    pub notifier: Arc<dyn LifecycleNotifier>,
}

/// Configures and starts a [`StartupSync`].
pub struct StartupSyncBuilder {
    collaborators: SyncCollaborators,
    migrations: MigrationMap,
    schema_version: Option<String>,
    config: SyncConfig,
}

impl StartupSyncBuilder {
    /// Sets the migration map and the schema version to bring storage to.
    pub fn with_migrations(mut self, migrations: MigrationMap, schema_version: impl Into<String>) -> Self {
        self.migrations = migrations;
        self.schema_version = Some(schema_version.into());
        self
    }

    /// Sets the sync configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs pending migrations to completion, then starts every sync queue.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, a missing storage connection, or
    /// a failed migration step; no queue is started in that case.
    #[instrument(skip(self), fields(schema_version = ?self.schema_version))]
    pub async fn start(self) -> SyncResult<StartupSync> {
        self.config.validate()?;
        let SyncCollaborators {
            registry,
            transport,
            auth_modes,
            storage,
            notifier,
        } = self.collaborators;

        let migration = match self.schema_version {
            Some(target) => {
                let migrations = self.migrations;
                let storage = Arc::clone(&storage);
                let result = tokio::task::spawn_blocking(move || {
                    migrations.apply_pending(storage.as_ref(), &target)
                })
                .await
                .map_err(|err| SyncError::TaskFailed(err.to_string()))??;

                if let Some(failed) = result.migrations.iter().find(|m| !m.success) {
                    return Err(CoreError::migration_failed(format!(
                        "{} -> {}: {}",
                        failed.from_version,
                        failed.to_version,
                        failed.error.as_deref().unwrap_or("unknown error")
                    ))
                    .into());
                }
                info!(
                    applied = result.applied_count,
                    version = ?result.final_version,
                    "migrations complete"
                );
                Some(result)
            }
            None => None,
        };

        let context = QueueContext {
            transport,
            auth_modes,
            writer: ReconcileAndSaveQueue::new(Arc::clone(&storage)),
            storage,
            config: self.config,
        };
        let coordinator = StartupSyncCoordinator::new(registry, context, notifier);
        coordinator.start().await?;

        Ok(StartupSync {
            coordinator,
            migration,
        })
    }
}

/// A running startup sync.
pub struct StartupSync {
    coordinator: StartupSyncCoordinator,
    migration: Option<MigrationRunResult>,
}

impl StartupSync {
    /// Creates a builder over the given collaborators.
    pub fn builder(collaborators: SyncCollaborators) -> StartupSyncBuilder {
        StartupSyncBuilder {
            collaborators,
            migrations: MigrationMap::new(),
            schema_version: None,
            config: SyncConfig::default(),
        }
    }

    /// Returns the result of the migration pass, if one ran.
    pub fn migration_result(&self) -> Option<&MigrationRunResult> {
        self.migration.as_ref()
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &StartupSyncCoordinator {
        &self.coordinator
    }

    /// Returns the coordinator state.
    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    /// Waits until every model has reported.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if cancelled first.
    pub async fn wait_until_initialized(&self) -> SyncResult<()> {
        self.coordinator.wait_until_initialized().await
    }

    /// Cancels every queue.
    pub fn cancel(&self) {
        self.coordinator.cancel();
    }
}
