//! A scriptable in-memory remote collection.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tidesync_operation::ActorError;
use tidesync_paging::{FetchContext, PageFetcher};
use tidesync_storage::ItemId;

/// Error code returned while the remote is unreachable.
pub const UNREACHABLE_CODE: &str = "unreachable";

/// A remote collection of `total` items named `<collection>-<position>`.
///
/// Failures can be scripted per call ([`FakeRemote::fail_next`]) or
/// switched on until further notice ([`FakeRemote::set_reachable`]).
#[derive(Debug)]
pub struct FakeRemote {
    total: AtomicU64,
    reachable: AtomicBool,
    fail_next: AtomicUsize,
    calls: Mutex<Vec<FetchContext>>,
}

impl FakeRemote {
    /// Creates a reachable remote holding `total` items.
    pub fn new(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            reachable: AtomicBool::new(true),
            fail_next: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Id of the item at `position` in `collection_key`.
    pub fn item_id(collection_key: &str, position: u64) -> ItemId {
        format!("{collection_key}-{position:04}")
    }

    /// Ids of the first `count` items of `collection_key`.
    pub fn item_ids(collection_key: &str, count: u64) -> Vec<ItemId> {
        (0..count)
            .map(|position| Self::item_id(collection_key, position))
            .collect()
    }

    /// Changes the collection length.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Makes every call fail, or succeed again.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<FetchContext> {
        self.calls.lock().clone()
    }

    /// Start positions of every call received so far.
    pub fn call_starts(&self) -> Vec<u64> {
        self.calls.lock().iter().map(|call| call.start).collect()
    }

    fn take_scripted_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PageFetcher for FakeRemote {
    async fn fetch(&self, context: FetchContext) -> Result<Vec<ItemId>, ActorError> {
        self.calls.lock().push(context.clone());

        if !self.reachable.load(Ordering::SeqCst) || self.take_scripted_failure() {
            return Err(ActorError::with_code(
                UNREACHABLE_CODE,
                format!("remote unreachable fetching {}", context.start),
            ));
        }

        let total = self.total.load(Ordering::SeqCst);
        let end = (context.start + context.page_size as u64).min(total);
        Ok((context.start..end)
            .map(|position| Self::item_id(&context.collection_key, position))
            .collect())
    }
}
