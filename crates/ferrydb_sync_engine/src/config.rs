//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Default page size of a sync query.
pub const DEFAULT_SYNC_PAGE_SIZE: usize = 1_000;
/// Default cap on records fetched per model during startup sync.
pub const DEFAULT_SYNC_MAX_RECORDS: usize = 10_000;
/// Default age after which a delta sync turns into a full sync.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for startup sync.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// A model whose last sync is older than this gets a full sync.
    pub sync_interval: Duration,
    /// Stop paginating once this many records were received for a model.
    pub sync_max_records: usize,
    /// Records requested per page.
    pub sync_page_size: usize,
    /// Delay between auth-mode attempts.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            sync_max_records: DEFAULT_SYNC_MAX_RECORDS,
            sync_page_size: DEFAULT_SYNC_PAGE_SIZE,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the full-sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the record cap per model.
    pub fn with_sync_max_records(mut self, max_records: usize) -> Self {
        self.sync_max_records = max_records;
        self
    }

    /// Sets the page size.
    pub fn with_sync_page_size(mut self, page_size: usize) -> Self {
        self.sync_page_size = page_size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a zero page size or record cap.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_page_size == 0 {
            return Err(SyncError::Config("sync_page_size must be positive".into()));
        }
        if self.sync_max_records == 0 {
            return Err(SyncError::Config("sync_max_records must be positive".into()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::Config(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Returns the last-sync time to put on a request, or `None` for a
    /// full sync.
    ///
    /// `now` and `last_sync` are Unix milliseconds.
    pub fn delta_since(&self, last_sync: Option<i64>, now: i64) -> Option<i64> {
        let last_sync = last_sync?;
        let interval = i64::try_from(self.sync_interval.as_millis()).unwrap_or(i64::MAX);
        let age = now.saturating_sub(last_sync);
        (age >= 0 && age < interval).then_some(last_sync)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay between auth-mode attempts.
///
/// The number of attempts is never configured here: a fetch tries each
/// auth-mode candidate once.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a configuration with the default backoff.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration that moves to the next candidate at once.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // Negative or NaN products from an unvalidated multiplier fall back
        // to the cap.
        Duration::try_from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
