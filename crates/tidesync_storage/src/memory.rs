//! In-memory transactional store.

use crate::error::{StorageError, StorageResult};
use crate::model::{
    CollectionId, ItemId, OperationId, OperationKey, OperationRecord, OperationStatus,
    PagingItem, PendingOperation, UpsertKind, Upserted,
};
use crate::notify::ChangeReceiver;
use crate::snapshot::StoreSnapshot;
use crate::store::{OperationStore, PagingStore};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use tokio::sync::watch;
use tracing::debug;

/// The tables behind a [`MemoryStore`].
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) clock: u64,
    pub(crate) next_operation_id: OperationId,
    pub(crate) operations: BTreeMap<OperationId, OperationRecord>,
    pub(crate) operation_keys: HashMap<OperationKey, OperationId>,
    pub(crate) next_collection_id: CollectionId,
    pub(crate) collections: BTreeMap<String, CollectionId>,
    pub(crate) items: BTreeMap<(CollectionId, u64), PagingItem>,
}

impl Tables {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// An in-memory store implementing both [`OperationStore`] and
/// [`PagingStore`].
///
/// Every trait method runs under one write (or read) lock, which makes it a
/// transaction. Change notifications are sent after the lock is released.
///
/// The store can be saved to and reopened from a snapshot file so queued
/// operations and cached pages survive a restart.
///
/// # Example
///
/// ```rust
/// use tidesync_storage::{MemoryStore, PagingStore};
///
/// let store = MemoryStore::new();
/// let inbox = store.collection_id("inbox").unwrap();
/// store.write_page(inbox, 0, &["a".into(), "b".into()], false).unwrap();
///
/// let page = store.paging_items(inbox, 0, 10).unwrap();
/// assert_eq!(page.len(), 2);
/// assert_eq!(page[1].item_id, "b");
/// ```
pub struct MemoryStore {
    tables: RwLock<Tables>,
    operation_tx: watch::Sender<u64>,
    paging_tx: watch::Sender<u64>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("clock", &tables.clock)
            .field("operations", &tables.operations.len())
            .field("paging_items", &tables.items.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tables(Tables::default())
    }

    pub(crate) fn with_tables(tables: Tables) -> Self {
        let clock = tables.clock;
        let (operation_tx, _) = watch::channel(clock);
        let (paging_tx, _) = watch::channel(clock);
        Self {
            tables: RwLock::new(tables),
            operation_tx,
            paging_tx,
        }
    }

    /// Opens a store from a snapshot file, or creates an empty one if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path)?;
        let snapshot = StoreSnapshot::decode(&bytes)?;
        let tables = snapshot.into_tables()?;
        debug!(
            path = %path.display(),
            operations = tables.operations.len(),
            paging_items = tables.items.len(),
            "store opened from snapshot"
        );
        Ok(Self::with_tables(tables))
    }

    /// Writes a snapshot of every table to `path`.
    ///
    /// The file is replaced atomically via a temporary sibling.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub fn save_to(&self, path: &Path) -> StorageResult<()> {
        let bytes = {
            let tables = self.tables.read();
            StoreSnapshot::from_tables(&tables).encode()?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), bytes = bytes.len(), "store snapshot saved");
        Ok(())
    }

    /// Returns every operation row, ordered by id.
    pub fn operations(&self) -> Vec<OperationRecord> {
        self.tables.read().operations.values().cloned().collect()
    }

    /// Returns the current store clock.
    pub fn clock(&self) -> u64 {
        self.tables.read().clock
    }

    fn operations_changed(&self, clock: u64) {
        self.operation_tx.send_replace(clock);
    }

    fn paging_changed(&self, clock: u64) {
        self.paging_tx.send_replace(clock);
    }

    fn ensure_collection(tables: &Tables, collection_id: CollectionId) -> StorageResult<()> {
        if tables.collections.values().any(|id| *id == collection_id) {
            Ok(())
        } else {
            Err(StorageError::CollectionNotFound(collection_id))
        }
    }
}

impl OperationStore for MemoryStore {
    fn upsert_operation(&self, key: &OperationKey, input: Vec<u8>) -> StorageResult<Upserted> {
        let (upserted, clock) = {
            let mut tables = self.tables.write();
            match tables.operation_keys.get(key).copied() {
                Some(id) => {
                    let current = tables
                        .operations
                        .get(&id)
                        .ok_or(StorageError::OperationNotFound(id))?;
                    if current.status.is_pending() {
                        let record = current.clone();
                        return Ok(Upserted {
                            record,
                            kind: UpsertKind::Existing,
                        });
                    }
                    let clock = tables.tick();
                    let record = tables
                        .operations
                        .get_mut(&id)
                        .ok_or(StorageError::OperationNotFound(id))?;
                    record.status = OperationStatus::Idle;
                    record.input = input;
                    record.output = None;
                    record.last_updated = clock;
                    let record = record.clone();
                    (
                        Upserted {
                            record,
                            kind: UpsertKind::Recycled,
                        },
                        clock,
                    )
                }
                None => {
                    let clock = tables.tick();
                    tables.next_operation_id += 1;
                    let id = tables.next_operation_id;
                    let record = OperationRecord {
                        id,
                        op_type: key.op_type.clone(),
                        unique_key: key.unique_key.clone(),
                        input,
                        status: OperationStatus::Idle,
                        output: None,
                        last_updated: clock,
                        client_type: key.client_type.clone(),
                    };
                    tables.operations.insert(id, record.clone());
                    tables.operation_keys.insert(key.clone(), id);
                    (
                        Upserted {
                            record,
                            kind: UpsertKind::Inserted,
                        },
                        clock,
                    )
                }
            }
        };
        self.operations_changed(clock);
        Ok(upserted)
    }

    fn operation(&self, id: OperationId) -> StorageResult<Option<OperationRecord>> {
        Ok(self.tables.read().operations.get(&id).cloned())
    }

    fn operation_by_key(&self, key: &OperationKey) -> StorageResult<Option<OperationRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .operation_keys
            .get(key)
            .and_then(|id| tables.operations.get(id))
            .cloned())
    }

    fn idle_operations(
        &self,
        client_type: &str,
        op_type: &str,
    ) -> StorageResult<Vec<PendingOperation>> {
        let tables = self.tables.read();
        let mut pending: Vec<_> = tables
            .operations
            .values()
            .filter(|op| {
                op.status == OperationStatus::Idle
                    && op.client_type == client_type
                    && op.op_type == op_type
            })
            .map(|op| PendingOperation {
                id: op.id,
                last_updated: op.last_updated,
            })
            .collect();
        pending.sort_by_key(|op| op.last_updated);
        Ok(pending)
    }

    fn start_operation(
        &self,
        id: OperationId,
        expected: u64,
    ) -> StorageResult<Option<OperationRecord>> {
        let (record, clock) = {
            let mut tables = self.tables.write();
            let current = tables
                .operations
                .get(&id)
                .ok_or(StorageError::OperationNotFound(id))?;
            if current.status != OperationStatus::Idle || current.last_updated != expected {
                return Ok(None);
            }
            let clock = tables.tick();
            let record = tables
                .operations
                .get_mut(&id)
                .ok_or(StorageError::OperationNotFound(id))?;
            record.status = OperationStatus::Started;
            record.last_updated = clock;
            (record.clone(), clock)
        };
        self.operations_changed(clock);
        Ok(Some(record))
    }

    fn finish_operation(
        &self,
        id: OperationId,
        expected: u64,
        status: OperationStatus,
        output: Option<Vec<u8>>,
    ) -> StorageResult<bool> {
        let clock = {
            let mut tables = self.tables.write();
            let current = tables
                .operations
                .get(&id)
                .ok_or(StorageError::OperationNotFound(id))?;
            if current.status != OperationStatus::Started || current.last_updated != expected {
                return Ok(false);
            }
            let clock = tables.tick();
            let record = tables
                .operations
                .get_mut(&id)
                .ok_or(StorageError::OperationNotFound(id))?;
            record.status = status;
            record.output = output;
            record.last_updated = clock;
            clock
        };
        self.operations_changed(clock);
        Ok(true)
    }

    fn resume_suspended(&self, client_type: &str) -> StorageResult<usize> {
        let mut tables = self.tables.write();
        let ids: Vec<_> = tables
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::Suspended && op.client_type == client_type)
            .map(|op| op.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let clock = tables.tick();
        for id in &ids {
            if let Some(record) = tables.operations.get_mut(id) {
                record.status = OperationStatus::Idle;
                record.last_updated = clock;
            }
        }
        drop(tables);
        self.operations_changed(clock);
        Ok(ids.len())
    }

    fn reset_started(&self, client_type: &str) -> StorageResult<usize> {
        let mut tables = self.tables.write();
        let ids: Vec<_> = tables
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::Started && op.client_type == client_type)
            .map(|op| op.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let clock = tables.tick();
        for id in &ids {
            if let Some(record) = tables.operations.get_mut(id) {
                record.status = OperationStatus::Idle;
                record.last_updated = clock;
            }
        }
        drop(tables);
        self.operations_changed(clock);
        Ok(ids.len())
    }

    fn operation_changes(&self) -> ChangeReceiver {
        self.operation_tx.subscribe()
    }
}

impl PagingStore for MemoryStore {
    fn collection_id(&self, collection_key: &str) -> StorageResult<CollectionId> {
        if let Some(id) = self.tables.read().collections.get(collection_key) {
            return Ok(*id);
        }
        let mut tables = self.tables.write();
        if let Some(id) = tables.collections.get(collection_key) {
            return Ok(*id);
        }
        tables.next_collection_id += 1;
        let id = tables.next_collection_id;
        tables.collections.insert(collection_key.to_string(), id);
        Ok(id)
    }

    fn find_collection(&self, collection_key: &str) -> StorageResult<Option<CollectionId>> {
        Ok(self.tables.read().collections.get(collection_key).copied())
    }

    fn collection_key(&self, collection_id: CollectionId) -> StorageResult<String> {
        self.tables
            .read()
            .collections
            .iter()
            .find(|(_, id)| **id == collection_id)
            .map(|(key, _)| key.clone())
            .ok_or(StorageError::CollectionNotFound(collection_id))
    }

    fn paging_item(
        &self,
        collection_id: CollectionId,
        position: u64,
    ) -> StorageResult<Option<PagingItem>> {
        Ok(self
            .tables
            .read()
            .items
            .get(&(collection_id, position))
            .cloned())
    }

    fn paging_items(
        &self,
        collection_id: CollectionId,
        start: u64,
        count: usize,
    ) -> StorageResult<Vec<PagingItem>> {
        let tables = self.tables.read();
        let end = start.saturating_add(count as u64);
        let mut expected = start;
        let mut page = Vec::new();
        for item in tables
            .items
            .range((collection_id, start)..(collection_id, end))
            .map(|(_, item)| item)
        {
            if item.position != expected {
                break;
            }
            page.push(item.clone());
            expected += 1;
        }
        Ok(page)
    }

    fn write_page(
        &self,
        collection_id: CollectionId,
        start: u64,
        item_ids: &[ItemId],
        end_of_collection: bool,
    ) -> StorageResult<u64> {
        let clock = {
            let mut tables = self.tables.write();
            Self::ensure_collection(&tables, collection_id)?;
            let clock = tables.tick();
            for (offset, item_id) in item_ids.iter().enumerate() {
                let position = start + offset as u64;
                tables.items.insert(
                    (collection_id, position),
                    PagingItem {
                        collection_id,
                        position,
                        item_id: item_id.clone(),
                        last_in_sync: clock,
                    },
                );
            }
            if end_of_collection {
                let end = start + item_ids.len() as u64;
                let stale: Vec<_> = tables
                    .items
                    .range((collection_id, end)..(collection_id, u64::MAX))
                    .map(|(key, _)| *key)
                    .collect();
                for key in stale {
                    tables.items.remove(&key);
                }
            }
            clock
        };
        debug!(
            collection_id,
            start,
            count = item_ids.len(),
            end_of_collection,
            "page written"
        );
        self.paging_changed(clock);
        Ok(clock)
    }

    fn touch_items(&self, collection_id: CollectionId, item_ids: &[ItemId]) -> StorageResult<u64> {
        let wanted: HashSet<&ItemId> = item_ids.iter().collect();
        let clock = {
            let mut tables = self.tables.write();
            Self::ensure_collection(&tables, collection_id)?;
            let clock = tables.tick();
            for item in tables
                .items
                .range_mut((collection_id, 0)..(collection_id, u64::MAX))
                .map(|(_, item)| item)
                .filter(|item| wanted.contains(&item.item_id))
            {
                item.last_in_sync = clock;
            }
            clock
        };
        self.paging_changed(clock);
        Ok(clock)
    }

    fn latest_sync_mark(&self, collection_id: CollectionId) -> StorageResult<Option<u64>> {
        Ok(self
            .tables
            .read()
            .items
            .range((collection_id, 0)..(collection_id, u64::MAX))
            .map(|(_, item)| item.last_in_sync)
            .max())
    }

    fn items_updated_since(
        &self,
        collection_id: CollectionId,
        mark: u64,
        positions: Range<u64>,
    ) -> StorageResult<Vec<PagingItem>> {
        if positions.start >= positions.end {
            return Ok(Vec::new());
        }
        Ok(self
            .tables
            .read()
            .items
            .range((collection_id, positions.start)..(collection_id, positions.end))
            .map(|(_, item)| item)
            .filter(|item| item.last_in_sync > mark)
            .cloned()
            .collect())
    }

    fn clear_collection(&self, collection_id: CollectionId) -> StorageResult<()> {
        let clock = {
            let mut tables = self.tables.write();
            tables
                .items
                .retain(|(collection, _), _| *collection != collection_id);
            tables.tick()
        };
        self.paging_changed(clock);
        Ok(())
    }

    fn paging_changes(&self) -> ChangeReceiver {
        self.paging_tx.subscribe()
    }
}
