//! # FerryDB Testkit
//!
//! Test utilities for FerryDB.
//!
//! This crate provides:
//! - Sample schemas and raw remote record builders
//! - A recording lifecycle notifier
//! - A store that fails writes on demand
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferrydb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_store() {
//!     init_tracing();
//!     let store = sample_store();
//!     let notifier = RecordingNotifier::new();
//!     // ... run startup sync
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
