//! # Tidesync Storage
//!
//! Storage seams for the operation engine and the paging engine, plus an
//! in-memory implementation of both.
//!
//! The store keeps two tables:
//!
//! - **operations**: durable work items keyed by
//!   `(client_type, op_type, unique_key)`
//! - **paging items**: positioned references to cached items, keyed by
//!   `(collection_id, position)`
//!
//! Every mutation runs under a single write lock, so readers never observe a
//! partially applied upsert or page write. Each mutation advances a store-wide
//! logical clock; that clock value is what `last_updated` and `last_in_sync`
//! carry, so both are strictly monotonic.
//!
//! Change notifications are per table and coalescing. [`observe`] turns a
//! notification channel plus a query into a (optionally throttled) stream of
//! query results.
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{MemoryStore, OperationKey, OperationStore, UpsertKind};
//!
//! let store = MemoryStore::new();
//! let key = OperationKey::new("app", "sync.profile", "user-1");
//! let first = store.upsert_operation(&key, b"v1".to_vec()).unwrap();
//! let second = store.upsert_operation(&key, b"v2".to_vec()).unwrap();
//!
//! assert_eq!(first.kind, UpsertKind::Inserted);
//! assert_eq!(second.kind, UpsertKind::Existing);
//! assert_eq!(second.record.input, b"v1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod model;
mod notify;
mod snapshot;
mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use model::{
    CollectionId, ItemId, OperationId, OperationKey, OperationRecord, OperationStatus,
    PagingItem, PendingOperation, UpsertKind, Upserted,
};
pub use notify::{observe, ChangeReceiver};
pub use store::{OperationStore, PagingStore};
