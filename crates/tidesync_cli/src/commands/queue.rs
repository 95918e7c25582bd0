//! Queue command implementation.

use serde::Serialize;
use std::path::Path;
use tidesync_operation::ErrorDigest;
use tidesync_storage::{MemoryStore, OperationRecord, OperationStatus};

/// One operation row as listed.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Row id.
    pub id: u64,
    /// Owning client.
    pub client_type: String,
    /// Operation type.
    pub op_type: String,
    /// Deduplication key.
    pub unique_key: String,
    /// Current status.
    pub status: String,
    /// Store clock value of the last write.
    pub last_updated: u64,
    /// Error digest of a failed row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDigest>,
}

impl From<&OperationRecord> for QueueEntry {
    fn from(record: &OperationRecord) -> Self {
        let error = match (record.status, &record.output) {
            (OperationStatus::Failure, Some(bytes)) => {
                ciborium::from_reader::<ErrorDigest, _>(bytes.as_slice()).ok()
            }
            _ => None,
        };
        Self {
            id: record.id,
            client_type: record.client_type.clone(),
            op_type: record.op_type.clone(),
            unique_key: record.unique_key.clone(),
            status: record.status.to_string(),
            last_updated: record.last_updated,
            error,
        }
    }
}

/// Runs the queue command.
pub fn run(
    path: &Path,
    status: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let store = MemoryStore::open(path)?;
    let entries = list(&store, status);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }
    Ok(())
}

/// Lists operation rows, optionally filtered by status name.
pub fn list(store: &MemoryStore, status: Option<&str>) -> Vec<QueueEntry> {
    store
        .operations()
        .iter()
        .map(QueueEntry::from)
        .filter(|entry| status.map_or(true, |wanted| entry.status.eq_ignore_ascii_case(wanted)))
        .collect()
}

fn print_text_output(entries: &[QueueEntry]) {
    println!("Tidesync Operation Queue");
    println!("========================");
    println!();
    if entries.is_empty() {
        println!("No operations.");
        return;
    }
    for entry in entries {
        println!(
            "  [{}] {} {} ({}) {} @{}",
            entry.id,
            entry.client_type,
            entry.op_type,
            entry.unique_key,
            entry.status,
            entry.last_updated
        );
        if let Some(error) = &entry.error {
            println!("        {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_storage::{OperationKey, OperationStore};

    #[test]
    fn lists_and_filters_rows() {
        let store = MemoryStore::new();
        let done = store
            .upsert_operation(&OperationKey::new("cli", "paging.reconcile", "1:0:10"), vec![])
            .unwrap()
            .record;
        store
            .upsert_operation(&OperationKey::new("cli", "paging.reconcile", "1:10:10"), vec![])
            .unwrap();
        let started = store
            .start_operation(done.id, done.last_updated)
            .unwrap()
            .unwrap();
        let mut digest = Vec::new();
        ciborium::into_writer(&ErrorDigest::new(Some("E1".into()), None), &mut digest).unwrap();
        store
            .finish_operation(
                done.id,
                started.last_updated,
                OperationStatus::Failure,
                Some(digest),
            )
            .unwrap();

        let all = list(&store, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].error.as_ref().and_then(|d| d.code.as_deref()), Some("E1"));

        let idle = list(&store, Some("IDLE"));
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].unique_key, "1:10:10");
    }
}
