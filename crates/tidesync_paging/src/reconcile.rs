//! The reconciliation operation and its actor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidesync_operation::{Actor, ActorError, OperationDefinition};
use tidesync_storage::{CollectionId, ItemId, PagingStore};
use tracing::{debug, warn};

/// Input of a reconciliation: one page of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Collection to reconcile.
    pub collection_id: CollectionId,
    /// First position of the page.
    pub start: u64,
    /// Requested page length.
    pub page_size: usize,
}

/// Output of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// The remote returned a full page.
    HasMore,
    /// The remote returned a short page.
    EndOfCollection,
}

/// Operation definition for reconciling one page.
///
/// Requests are deduplicated per `(collection, start, page_size)`, so two
/// sessions over the same collection share one network call per page.
#[derive(Debug)]
pub struct PagingReconciliationDefinition;

impl OperationDefinition for PagingReconciliationDefinition {
    const TYPE: &'static str = "paging.reconcile";
    type Input = ReconcileRequest;
    type Output = ReconcileOutcome;

    fn unique_key(input: &ReconcileRequest) -> Option<String> {
        Some(format!(
            "{}:{}:{}",
            input.collection_id, input.start, input.page_size
        ))
    }
}

/// What a [`PageFetcher`] is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    /// Name of the collection.
    pub collection_key: String,
    /// First position of the page.
    pub start: u64,
    /// Requested page length.
    pub page_size: usize,
}

/// Fetches one page of a remote collection.
///
/// Implementations store item payloads wherever the application keeps them
/// and return only the item ids, in collection order. A page shorter than
/// `page_size` marks the end of the collection.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    /// Fetches the page described by `context`.
    async fn fetch(&self, context: FetchContext) -> Result<Vec<ItemId>, ActorError>;
}

/// Actor for [`PagingReconciliationDefinition`].
///
/// Calls the fetcher and writes the returned ids at their positions with a
/// fresh sync mark. On a short page, cached rows past the end are removed in
/// the same write.
pub struct ReconciliationActor {
    store: Arc<dyn PagingStore>,
    fetcher: Arc<dyn PageFetcher>,
}

impl ReconciliationActor {
    /// Creates an actor writing into `store`.
    pub fn new(store: Arc<dyn PagingStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { store, fetcher }
    }
}

#[async_trait]
impl Actor<PagingReconciliationDefinition> for ReconciliationActor {
    async fn perform(&self, request: ReconcileRequest) -> Result<ReconcileOutcome, ActorError> {
        let collection_key = self
            .store
            .collection_key(request.collection_id)
            .map_err(|e| ActorError::with_code("storage", e.to_string()))?;

        let mut ids = self
            .fetcher
            .fetch(FetchContext {
                collection_key,
                start: request.start,
                page_size: request.page_size,
            })
            .await?;

        if ids.len() > request.page_size {
            warn!(
                collection_id = request.collection_id,
                returned = ids.len(),
                page_size = request.page_size,
                "fetcher returned an oversized page"
            );
            ids.truncate(request.page_size);
        }
        let end_of_collection = ids.len() < request.page_size;

        self.store
            .write_page(request.collection_id, request.start, &ids, end_of_collection)
            .map_err(|e| ActorError::with_code("storage", e.to_string()))?;

        debug!(
            collection_id = request.collection_id,
            start = request.start,
            count = ids.len(),
            end_of_collection,
            "page reconciled"
        );
        Ok(if end_of_collection {
            ReconcileOutcome::EndOfCollection
        } else {
            ReconcileOutcome::HasMore
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_storage::MemoryStore;

    struct Numbers {
        total: u64,
    }

    #[async_trait]
    impl PageFetcher for Numbers {
        async fn fetch(&self, context: FetchContext) -> Result<Vec<ItemId>, ActorError> {
            let end = (context.start + context.page_size as u64).min(self.total);
            Ok((context.start..end).map(|n| format!("{}-{n}", context.collection_key)).collect())
        }
    }

    fn actor(store: &Arc<MemoryStore>, total: u64) -> ReconciliationActor {
        ReconciliationActor::new(
            Arc::clone(store) as Arc<dyn PagingStore>,
            Arc::new(Numbers { total }),
        )
    }

    #[tokio::test]
    async fn writes_page_and_reports_more() {
        let store = Arc::new(MemoryStore::new());
        let inbox = store.collection_id("inbox").unwrap();
        let outcome = actor(&store, 25)
            .perform(ReconcileRequest {
                collection_id: inbox,
                start: 0,
                page_size: 10,
            })
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::HasMore);
        let page = store.paging_items(inbox, 0, 10).unwrap();
        assert_eq!(page.len(), 10);
        assert_eq!(page[3].item_id, "inbox-3");
    }

    #[tokio::test]
    async fn short_page_ends_collection_and_truncates_cache() {
        let store = Arc::new(MemoryStore::new());
        let inbox = store.collection_id("inbox").unwrap();
        let stale: Vec<ItemId> = (0..15).map(|n| format!("old-{n}")).collect();
        store.write_page(inbox, 0, &stale, false).unwrap();

        let outcome = actor(&store, 5)
            .perform(ReconcileRequest {
                collection_id: inbox,
                start: 0,
                page_size: 10,
            })
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::EndOfCollection);
        let items = store.paging_items(inbox, 0, 100).unwrap();
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|item| item.item_id.starts_with("inbox-")));
    }

    #[tokio::test]
    async fn unknown_collection_fails() {
        let store = Arc::new(MemoryStore::new());
        let result = actor(&store, 5)
            .perform(ReconcileRequest {
                collection_id: 42,
                start: 0,
                page_size: 10,
            })
            .await;
        assert!(matches!(result, Err(ActorError::Failed { .. })));
    }

    #[test]
    fn unique_key_covers_page_identity() {
        let key = |start| {
            PagingReconciliationDefinition::unique_key(&ReconcileRequest {
                collection_id: 1,
                start,
                page_size: 10,
            })
        };
        assert_eq!(key(0), key(0));
        assert_ne!(key(0), key(10));
    }
}
