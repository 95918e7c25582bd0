//! # Tidesync Paging
//!
//! Cache-first paging over remote collections.
//!
//! A [`PagingDataSource`] shows what the local cache holds right away and
//! reconciles it with the remote one page at a time. Reconciliation runs as
//! a [`PagingReconciliationDefinition`] operation, so concurrent sessions
//! over the same collection share network calls and a crash mid-page is
//! resumed on the next start.
//!
//! ## Session State
//!
//! ```text
//!   visible items = reconciled prefix ++ provisional suffix
//!                   └── cursor ──┘       └── cache lookahead
//! ```
//!
//! - The reconciled prefix only grows, except on reload
//! - A reconciled page replaces up to one page of provisional items
//! - When a page fails and at least one full page is cached, that page is
//!   promoted and the next page is requested; the caller keeps scrolling
//! - A failure that lands while a cache lookup is still running waits for
//!   it, so a cached page that arrives late is promoted without the session
//!   ever reporting `Failed`
//! - With less than a page cached, the session fails and retries once
//!   connectivity returns or the retry timeout elapses
//!
//! ## Status
//!
//! | Condition                                     | [`PagingStatus`]   |
//! |-----------------------------------------------|--------------------|
//! | remote reported a short page                  | `EndOfCollection`  |
//! | failed with the cache exhausted               | `Failed`           |
//! | work in flight and fewer items than requested | `Loading`          |
//! | otherwise                                     | `HasMore`          |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod effects;
mod error;
mod queries;
mod reconcile;
mod reducer;
mod source;
mod state;

pub use config::PagingConfig;
pub use error::{PagingError, PagingResult};
pub use queries::{PagingQueries, StoredItemQueries};
pub use reconcile::{
    FetchContext, PageFetcher, PagingReconciliationDefinition, ReconcileOutcome,
    ReconcileRequest, ReconciliationActor,
};
pub use source::PagingDataSource;
pub use state::{
    CacheLookupStatus, PagingEvent, PagingState, PagingStatus, ReconciliationState,
    ReconciliationStatus,
};
