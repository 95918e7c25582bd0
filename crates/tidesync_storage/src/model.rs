//! Row types for the operation and paging tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an operation row. Stable across recycling.
pub type OperationId = u64;

/// Identifier of a paging collection.
pub type CollectionId = u64;

/// Identifier of a cached item. Payloads live elsewhere.
pub type ItemId = String;

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Enqueued, waiting for its actor.
    Idle,
    /// Picked up by its actor.
    Started,
    /// Completed with an output.
    Success,
    /// Completed with an error digest.
    Failure,
    /// Parked until an external resumption trigger.
    Suspended,
}

impl OperationStatus {
    /// Returns true while the operation is waiting or running.
    ///
    /// Re-enqueuing a pending operation does not override its input.
    pub fn is_pending(&self) -> bool {
        matches!(self, OperationStatus::Idle | OperationStatus::Started)
    }

    /// Returns true once the actor has produced a result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Success | OperationStatus::Failure)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationStatus::Idle => "idle",
            OperationStatus::Started => "started",
            OperationStatus::Success => "success",
            OperationStatus::Failure => "failure",
            OperationStatus::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// The deduplication key of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    /// The client (account, tenant) the operation belongs to.
    pub client_type: String,
    /// The operation type, one per actor.
    pub op_type: String,
    /// Deduplication key within the type.
    pub unique_key: String,
}

impl OperationKey {
    /// Creates a new key.
    pub fn new(
        client_type: impl Into<String>,
        op_type: impl Into<String>,
        unique_key: impl Into<String>,
    ) -> Self {
        Self {
            client_type: client_type.into(),
            op_type: op_type.into(),
            unique_key: unique_key.into(),
        }
    }
}

/// A persisted operation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Row id.
    pub id: OperationId,
    /// Operation type.
    pub op_type: String,
    /// Deduplication key.
    pub unique_key: String,
    /// Serialized input.
    pub input: Vec<u8>,
    /// Current status.
    pub status: OperationStatus,
    /// Serialized output on success, serialized error digest on failure.
    pub output: Option<Vec<u8>>,
    /// Store clock value of the last write to this row.
    pub last_updated: u64,
    /// Owning client.
    pub client_type: String,
}

impl OperationRecord {
    /// Returns the deduplication key of this row.
    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.client_type, &self.op_type, &self.unique_key)
    }
}

/// An idle operation as seen by a dispatcher: its id and freshness mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperation {
    /// Row id.
    pub id: OperationId,
    /// `last_updated` at the time of the query.
    pub last_updated: u64,
}

/// What an upsert did to the operation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    /// A new row was created.
    Inserted,
    /// A pending row already existed and was left untouched.
    Existing,
    /// A finished or suspended row was reset to idle with the new input.
    Recycled,
}

/// Result of [`crate::OperationStore::upsert_operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    /// The row after the upsert.
    pub record: OperationRecord,
    /// What happened.
    pub kind: UpsertKind,
}

/// A positioned reference to an item inside a paging collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingItem {
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Zero-based position; the page-addressing key.
    pub position: u64,
    /// Referenced item.
    pub item_id: ItemId,
    /// Store clock value of the last reconciliation or update of this row.
    pub last_in_sync: u64,
}
