//! Snapshot file format for [`crate::MemoryStore`].
//!
//! ```text
//! ┌──────────────┬───────────────┬──────────────────────┐
//! │ magic "TSYN" │ version (u16) │ CBOR-encoded tables  │
//! └──────────────┴───────────────┴──────────────────────┘
//! ```

use crate::error::{StorageError, StorageResult};
use crate::memory::Tables;
use crate::model::{CollectionId, OperationId, OperationRecord, PagingItem};
use serde::{Deserialize, Serialize};

const SNAPSHOT_MAGIC: [u8; 4] = *b"TSYN";
const SNAPSHOT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
    clock: u64,
    next_operation_id: OperationId,
    next_collection_id: CollectionId,
    operations: Vec<OperationRecord>,
    collections: Vec<(String, CollectionId)>,
    items: Vec<PagingItem>,
}

impl StoreSnapshot {
    pub(crate) fn from_tables(tables: &Tables) -> Self {
        Self {
            clock: tables.clock,
            next_operation_id: tables.next_operation_id,
            next_collection_id: tables.next_collection_id,
            operations: tables.operations.values().cloned().collect(),
            collections: tables
                .collections
                .iter()
                .map(|(key, id)| (key.clone(), *id))
                .collect(),
            items: tables.items.values().cloned().collect(),
        }
    }

    /// Rebuilds the tables and their indexes.
    pub(crate) fn into_tables(self) -> StorageResult<Tables> {
        let mut tables = Tables {
            clock: self.clock,
            next_operation_id: self.next_operation_id,
            next_collection_id: self.next_collection_id,
            ..Tables::default()
        };
        for record in self.operations {
            if record.last_updated > self.clock || record.id > self.next_operation_id {
                return Err(StorageError::Corrupted(format!(
                    "operation {} is newer than the snapshot",
                    record.id
                )));
            }
            if tables.operation_keys.insert(record.key(), record.id).is_some() {
                return Err(StorageError::Corrupted(format!(
                    "duplicate key for operation {}",
                    record.id
                )));
            }
            tables.operations.insert(record.id, record);
        }
        tables.collections.extend(self.collections);
        for item in self.items {
            tables
                .items
                .insert((item.collection_id, item.position), item);
        }
        Ok(tables)
    }

    pub(crate) fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut data = Vec::with_capacity(HEADER_SIZE);
        data.extend_from_slice(&SNAPSHOT_MAGIC);
        data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        ciborium::into_writer(self, &mut data)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(data)
    }

    pub(crate) fn decode(data: &[u8]) -> StorageResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StorageError::Corrupted("snapshot too small".into()));
        }
        if data[0..4] != SNAPSHOT_MAGIC {
            return Err(StorageError::Corrupted("invalid snapshot magic".into()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported snapshot version: {version}"
            )));
        }
        ciborium::from_reader(&data[HEADER_SIZE..]).map_err(|e| StorageError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKey;
    use crate::store::{OperationStore, PagingStore};
    use crate::MemoryStore;
    use tempfile::tempdir;

    #[test]
    fn reopen_restores_operations_and_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.tsyn");

        let store = MemoryStore::new();
        let key = OperationKey::new("client", "send", "m1");
        let op = store.upsert_operation(&key, b"hello".to_vec()).unwrap().record;
        let inbox = store.collection_id("inbox").unwrap();
        store
            .write_page(inbox, 0, &["a".into(), "b".into()], true)
            .unwrap();
        store.save_to(&path).unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.operation(op.id).unwrap().unwrap(), op);
        assert_eq!(reopened.operation_by_key(&key).unwrap().unwrap().id, op.id);
        assert_eq!(reopened.collection_id("inbox").unwrap(), inbox);
        assert_eq!(reopened.paging_items(inbox, 0, 10).unwrap().len(), 2);
        assert_eq!(reopened.clock(), store.clock());

        // New rows keep counting from where the previous process stopped.
        let other = reopened
            .upsert_operation(&OperationKey::new("client", "send", "m2"), vec![])
            .unwrap()
            .record;
        assert!(other.id > op.id);
        assert!(other.last_updated > op.last_updated);
        assert_ne!(reopened.collection_id("archive").unwrap(), inbox);
    }

    #[test]
    fn open_missing_file_creates_empty_store() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("absent")).unwrap();
        assert!(store.operations().is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = StoreSnapshot::from_tables(&Tables::default())
            .encode()
            .unwrap();
        data[0] = b'X';
        assert!(matches!(
            StoreSnapshot::decode(&data),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let data = StoreSnapshot::from_tables(&Tables::default())
            .encode()
            .unwrap();
        assert!(StoreSnapshot::decode(&data[..data.len() - 1]).is_err());
        assert!(StoreSnapshot::decode(&data[..3]).is_err());
    }
}
