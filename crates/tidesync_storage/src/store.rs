//! Storage collaborator traits.

use crate::error::StorageResult;
use crate::model::{
    CollectionId, ItemId, OperationId, OperationKey, OperationRecord, OperationStatus,
    PagingItem, PendingOperation, Upserted,
};
use crate::notify::ChangeReceiver;
use std::ops::Range;

/// Transactional access to the operation table.
///
/// # Invariants
///
/// - At most one row exists per [`OperationKey`]
/// - Every write sets `last_updated` to a value greater than any value
///   previously handed out by the store
/// - Each method is atomic with respect to every other method
pub trait OperationStore: Send + Sync {
    /// Inserts or reuses the row for `key`.
    ///
    /// - No row: inserts an `Idle` row with `input`.
    /// - `Idle` or `Started` row: leaves it untouched.
    /// - `Success`, `Failure` or `Suspended` row: resets it to `Idle`,
    ///   overwrites the input, clears the output and bumps `last_updated`.
    fn upsert_operation(&self, key: &OperationKey, input: Vec<u8>) -> StorageResult<Upserted>;

    /// Returns the row with the given id.
    fn operation(&self, id: OperationId) -> StorageResult<Option<OperationRecord>>;

    /// Returns the row for a deduplication key.
    fn operation_by_key(&self, key: &OperationKey) -> StorageResult<Option<OperationRecord>>;

    /// Lists idle rows of one client and type, oldest write first.
    fn idle_operations(
        &self,
        client_type: &str,
        op_type: &str,
    ) -> StorageResult<Vec<PendingOperation>>;

    /// Moves a row from `Idle` to `Started`.
    ///
    /// Succeeds only if the row is still idle and its `last_updated` equals
    /// `expected`; returns the started row, or `None` if someone else got
    /// there first.
    fn start_operation(
        &self,
        id: OperationId,
        expected: u64,
    ) -> StorageResult<Option<OperationRecord>>;

    /// Records the result of a started row.
    ///
    /// Applies only if `last_updated` still equals `expected`. Returns
    /// whether the write was applied.
    fn finish_operation(
        &self,
        id: OperationId,
        expected: u64,
        status: OperationStatus,
        output: Option<Vec<u8>>,
    ) -> StorageResult<bool>;

    /// Moves every `Suspended` row of a client back to `Idle`.
    ///
    /// Returns the number of rows resumed.
    fn resume_suspended(&self, client_type: &str) -> StorageResult<usize>;

    /// Moves every `Started` row of a client back to `Idle`.
    ///
    /// Used on startup to re-surface work interrupted by a previous process.
    fn reset_started(&self, client_type: &str) -> StorageResult<usize>;

    /// Notifies after every committed write to the operation table.
    fn operation_changes(&self) -> ChangeReceiver;
}

/// Transactional access to paging collections.
///
/// # Invariants
///
/// - Positions of a collection are addressed by `(collection_id, position)`
/// - A page write is atomic: readers see either none or all of it
pub trait PagingStore: Send + Sync {
    /// Returns the id of a named collection, creating it if needed.
    fn collection_id(&self, collection_key: &str) -> StorageResult<CollectionId>;

    /// Returns the id of a named collection without creating it.
    fn find_collection(&self, collection_key: &str) -> StorageResult<Option<CollectionId>>;

    /// Returns the name of a collection.
    fn collection_key(&self, collection_id: CollectionId) -> StorageResult<String>;

    /// Point lookup by position.
    fn paging_item(
        &self,
        collection_id: CollectionId,
        position: u64,
    ) -> StorageResult<Option<PagingItem>>;

    /// Range lookup: up to `count` contiguous rows starting at `start`.
    ///
    /// Stops at the first missing position.
    fn paging_items(
        &self,
        collection_id: CollectionId,
        start: u64,
        count: usize,
    ) -> StorageResult<Vec<PagingItem>>;

    /// Writes `item_ids` at positions `start..`, stamping them with a fresh
    /// sync mark. With `end_of_collection`, rows positioned after the page
    /// are deleted in the same transaction.
    ///
    /// Returns the sync mark written.
    fn write_page(
        &self,
        collection_id: CollectionId,
        start: u64,
        item_ids: &[ItemId],
        end_of_collection: bool,
    ) -> StorageResult<u64>;

    /// Stamps every row referencing one of `item_ids` with a fresh sync mark.
    ///
    /// Returns the sync mark written.
    fn touch_items(&self, collection_id: CollectionId, item_ids: &[ItemId]) -> StorageResult<u64>;

    /// Returns the newest sync mark in a collection.
    fn latest_sync_mark(&self, collection_id: CollectionId) -> StorageResult<Option<u64>>;

    /// Returns rows in `positions` whose sync mark is newer than `mark`.
    fn items_updated_since(
        &self,
        collection_id: CollectionId,
        mark: u64,
        positions: Range<u64>,
    ) -> StorageResult<Vec<PagingItem>>;

    /// Deletes every row of a collection.
    fn clear_collection(&self, collection_id: CollectionId) -> StorageResult<()>;

    /// Notifies after every committed write to the paging tables.
    fn paging_changes(&self) -> ChangeReceiver;
}
