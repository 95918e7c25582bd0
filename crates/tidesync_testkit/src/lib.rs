//! # Tidesync Testkit
//!
//! Test utilities for Tidesync.
//!
//! This crate provides:
//! - [`FakeRemote`], a scriptable remote collection
//! - [`PagingHarness`], a store, engine and collection wired together
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pages_in() {
//!     let harness = PagingHarness::start("inbox", 25);
//!     let source = harness.source(PagingConfig::new(10));
//!     source.next();
//!     wait_until(&source, |s| s.reconciled_items.len() == 10).await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
    pub use tidesync_paging::{PagingConfig, PagingStatus, ReconciliationStatus};
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;
