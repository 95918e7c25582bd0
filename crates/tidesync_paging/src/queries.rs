//! Cache queries a paging session runs against storage.

use std::ops::Range;
use std::sync::Arc;
use tidesync_storage::{ChangeReceiver, CollectionId, PagingItem, PagingStore, StorageResult};

/// Reads a collection's cached items.
///
/// A session calls [`PagingQueries::load_page`] for cache lookahead and to
/// re-read pages after reconciliation. The update methods are optional; when
/// [`PagingQueries::update_changes`] returns a receiver the session follows
/// the update head and splices changed items in place.
pub trait PagingQueries: Send + Sync + 'static {
    /// Item type shown to callers.
    type Item: Clone + Send + Sync + 'static;

    /// Up to `count` contiguous cached items starting at `start`.
    fn load_page(
        &self,
        collection_id: CollectionId,
        start: u64,
        count: usize,
    ) -> StorageResult<Vec<Self::Item>>;

    /// Identity of an item, stable across updates.
    fn identity(item: &Self::Item) -> &str;

    /// Latest update mark of the collection.
    fn update_head(&self, collection_id: CollectionId) -> StorageResult<Option<u64>> {
        let _ = collection_id;
        Ok(None)
    }

    /// Items in `positions` updated after `mark`.
    fn updated_since(
        &self,
        collection_id: CollectionId,
        mark: u64,
        positions: Range<u64>,
    ) -> StorageResult<Vec<Self::Item>> {
        let _ = (collection_id, mark, positions);
        Ok(Vec::new())
    }

    /// Notifies when the update head may have moved. `None` disables update
    /// tracking.
    fn update_changes(&self) -> Option<ChangeReceiver> {
        None
    }
}

/// [`PagingQueries`] over the paging rows themselves.
///
/// Items are the stored [`PagingItem`]s; the update mark is their
/// `last_in_sync`.
#[derive(Clone)]
pub struct StoredItemQueries {
    store: Arc<dyn PagingStore>,
}

impl StoredItemQueries {
    /// Creates queries reading from `store`.
    pub fn new(store: Arc<dyn PagingStore>) -> Self {
        Self { store }
    }
}

impl PagingQueries for StoredItemQueries {
    type Item = PagingItem;

    fn load_page(
        &self,
        collection_id: CollectionId,
        start: u64,
        count: usize,
    ) -> StorageResult<Vec<PagingItem>> {
        self.store.paging_items(collection_id, start, count)
    }

    fn identity(item: &PagingItem) -> &str {
        &item.item_id
    }

    fn update_head(&self, collection_id: CollectionId) -> StorageResult<Option<u64>> {
        self.store.latest_sync_mark(collection_id)
    }

    fn updated_since(
        &self,
        collection_id: CollectionId,
        mark: u64,
        positions: Range<u64>,
    ) -> StorageResult<Vec<PagingItem>> {
        self.store.items_updated_since(collection_id, mark, positions)
    }

    fn update_changes(&self) -> Option<ChangeReceiver> {
        Some(self.store.paging_changes())
    }
}
