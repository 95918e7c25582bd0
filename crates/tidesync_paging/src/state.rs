//! Reconciliation session state, events and the caller-facing view.

use crate::reconcile::ReconcileOutcome;
use serde::{Deserialize, Serialize};

/// Progress of remote reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationStatus {
    /// Nothing in flight.
    Idle,
    /// A page starting at `start` is being fetched.
    Reconcile {
        /// First position of the page.
        start: u64,
    },
    /// The page starting at `start` failed and no cached fallback was left.
    Failed {
        /// First position of the failed page.
        start: u64,
    },
    /// The remote reported the end of the collection. Terminal for the
    /// session.
    EndOfCollection,
}

/// Progress of cache lookahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheLookupStatus {
    /// Nothing in flight.
    Idle,
    /// Reading cached items starting at `start`.
    Lookup {
        /// First position read.
        start: u64,
    },
    /// The cache returned a short page; no further lookahead.
    Exhausted,
}

/// Caller-facing status of a paging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PagingStatus {
    /// Fewer items are visible than requested and work is in flight.
    Loading,
    /// The cache is exhausted and reconciliation failed.
    Failed,
    /// More items can be requested.
    HasMore,
    /// Every item of the collection is visible.
    EndOfCollection,
}

/// A snapshot of what a paging session shows.
#[derive(Debug, Clone, PartialEq)]
pub struct PagingState<T> {
    /// Reconciled items followed by provisional ones.
    pub items: Vec<T>,
    /// Session status.
    pub status: PagingStatus,
}

/// The state owned by a paging session's loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationState<T> {
    /// Session generation, bumped by every reload.
    pub epoch: u64,
    /// Network-confirmed prefix. Its length is the reconciliation cursor.
    pub reconciled_items: Vec<T>,
    /// Cache-sourced suffix not confirmed yet.
    pub provisional_items: Vec<T>,
    /// Remote reconciliation progress.
    pub reconciliation: ReconciliationStatus,
    /// Cache lookahead progress.
    pub cache_lookup: CacheLookupStatus,
    /// Number of items the caller asked for so far.
    pub requested: usize,
    /// Start of a failed reconciliation waiting for an in-flight cache
    /// lookup to decide between promotion and failure. The reconciliation
    /// status stays `Reconcile` meanwhile.
    pub pending_failure: Option<u64>,
    /// Latest update mark seen in storage.
    pub db_update_head: Option<u64>,
    /// Update mark up to which changes have been spliced in.
    pub applied_update_mark: Option<u64>,
}

impl<T> Default for ReconciliationState<T> {
    fn default() -> Self {
        Self {
            epoch: 0,
            reconciled_items: Vec::new(),
            provisional_items: Vec::new(),
            reconciliation: ReconciliationStatus::Idle,
            cache_lookup: CacheLookupStatus::Idle,
            requested: 0,
            pending_failure: None,
            db_update_head: None,
            applied_update_mark: None,
        }
    }
}

impl<T: Clone> ReconciliationState<T> {
    /// Number of items shown to the caller.
    pub fn visible_len(&self) -> usize {
        self.reconciled_items.len() + self.provisional_items.len()
    }

    /// The reconciliation cursor.
    pub fn cursor(&self) -> u64 {
        self.reconciled_items.len() as u64
    }

    /// Derives the caller-facing status.
    pub fn status(&self) -> PagingStatus {
        match self.reconciliation {
            ReconciliationStatus::EndOfCollection => PagingStatus::EndOfCollection,
            ReconciliationStatus::Failed { .. } => PagingStatus::Failed,
            ReconciliationStatus::Reconcile { .. } | ReconciliationStatus::Idle => {
                let in_flight = matches!(
                    self.reconciliation,
                    ReconciliationStatus::Reconcile { .. }
                ) || matches!(self.cache_lookup, CacheLookupStatus::Lookup { .. });
                if in_flight && self.visible_len() < self.requested {
                    PagingStatus::Loading
                } else {
                    PagingStatus::HasMore
                }
            }
        }
    }

    /// Builds the caller-facing view.
    pub fn view(&self) -> PagingState<T> {
        let mut items = Vec::with_capacity(self.visible_len());
        items.extend_from_slice(&self.reconciled_items);
        items.extend_from_slice(&self.provisional_items);
        PagingState {
            items,
            status: self.status(),
        }
    }
}

/// Inputs to the reconciliation reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum PagingEvent<T> {
    /// The caller wants one more page (or a failed page retried).
    PrefetchNext,
    /// The caller wants to start over.
    Reload,
    /// Cache lookahead finished.
    CacheLoaded {
        /// Session generation the lookup ran for.
        epoch: u64,
        /// First position read.
        start: u64,
        /// Items read, contiguous from `start`.
        items: Vec<T>,
    },
    /// A page was reconciled and re-read from storage.
    Reconciled {
        /// Session generation the request ran for.
        epoch: u64,
        /// First position of the page.
        start: u64,
        /// What the remote said about the rest of the collection.
        outcome: ReconcileOutcome,
        /// The page as now stored.
        items: Vec<T>,
    },
    /// A reconciliation request failed.
    ReconcileFailed {
        /// Session generation the request ran for.
        epoch: u64,
        /// First position of the page.
        start: u64,
        /// Description of the failure.
        error: String,
    },
    /// The storage update head moved.
    UpdateHeadChanged {
        /// The new head.
        head: Option<u64>,
    },
    /// Items changed in storage since `mark`.
    ItemsUpdated {
        /// Session generation the query ran for.
        epoch: u64,
        /// Update head the query ran up to.
        mark: u64,
        /// The changed items.
        items: Vec<T>,
    },
}
