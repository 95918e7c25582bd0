//! Per-type dispatch of idle operations to their actor.

use crate::codec;
use crate::error::ErrorDigest;
use crate::registry::{ErasedActor, Outcome};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tidesync_storage::{
    observe, OperationId, OperationRecord, OperationStatus, OperationStore, PendingOperation,
};
use tracing::{debug, error, info, warn};

/// Watches the idle rows of one operation type and runs them.
pub(crate) struct Dispatcher {
    pub(crate) op_type: &'static str,
    pub(crate) client_type: String,
    pub(crate) store: Arc<dyn OperationStore>,
    pub(crate) actor: Arc<dyn ErasedActor>,
    pub(crate) execution_timeout: Duration,
    pub(crate) throttle: Duration,
}

impl Dispatcher {
    /// Runs until the store is dropped or the task is aborted.
    pub(crate) async fn run(self) {
        let store = Arc::clone(&self.store);
        let client_type = self.client_type.clone();
        let op_type = self.op_type;
        let mut idle = observe(store.operation_changes(), self.throttle, move || {
            store.idle_operations(&client_type, op_type)
        });

        // Freshness mark of every idle row already dispatched. A recycled row
        // keeps its id but carries a newer mark, so it is dispatched again.
        let mut dispatched: HashMap<OperationId, u64> = HashMap::new();

        while let Some(batch) = idle.next().await {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    error!(op_type = self.op_type, error = %e, "failed to list idle operations");
                    continue;
                }
            };
            dispatched.retain(|id, _| batch.iter().any(|op| op.id == *id));
            for pending in batch {
                if dispatched.get(&pending.id) == Some(&pending.last_updated) {
                    continue;
                }
                let (id, mark) = (pending.id, pending.last_updated);
                if self.dispatch(pending) {
                    dispatched.insert(id, mark);
                }
            }
        }
        debug!(op_type = self.op_type, "dispatcher stopped");
    }

    /// Claims and runs one idle row.
    ///
    /// Returns `false` if the claim failed in storage, leaving the row to be
    /// tried again on the next change.
    fn dispatch(&self, pending: PendingOperation) -> bool {
        let record = match self.store.start_operation(pending.id, pending.last_updated) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    operation_id = pending.id,
                    op_type = self.op_type,
                    "operation changed before pickup"
                );
                return true;
            }
            Err(e) => {
                error!(operation_id = pending.id, error = %e, "failed to start operation");
                return false;
            }
        };
        info!(operation_id = record.id, op_type = self.op_type, "operation started");

        tokio::spawn(execute(
            Arc::clone(&self.store),
            Arc::clone(&self.actor),
            record,
            self.execution_timeout,
        ));
        true
    }
}

/// Runs one started operation and records its outcome.
async fn execute(
    store: Arc<dyn OperationStore>,
    actor: Arc<dyn ErasedActor>,
    record: OperationRecord,
    execution_timeout: Duration,
) {
    let input = record.input.clone();
    let mut run = tokio::spawn(async move { actor.perform(input).await });

    let outcome = match tokio::time::timeout(execution_timeout, &mut run).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) if e.is_panic() => {
            warn!(operation_id = record.id, "actor panicked");
            Outcome::Failure(ErrorDigest::internal("actor panicked"))
        }
        Ok(Err(_)) => Outcome::Failure(ErrorDigest::internal("actor was cancelled")),
        Err(_) => {
            run.abort();
            warn!(
                operation_id = record.id,
                timeout_ms = execution_timeout.as_millis() as u64,
                "operation timed out"
            );
            Outcome::Failure(ErrorDigest::execution_timeout())
        }
    };

    let (status, output) = match outcome {
        Outcome::Success(output) => (OperationStatus::Success, Some(output)),
        Outcome::Failure(digest) => match codec::encode(&digest) {
            Ok(bytes) => (OperationStatus::Failure, Some(bytes)),
            Err(e) => {
                error!(operation_id = record.id, error = %e, "failed to encode digest");
                (OperationStatus::Failure, None)
            }
        },
        Outcome::Suspended => (OperationStatus::Suspended, None),
    };

    match store.finish_operation(record.id, record.last_updated, status, output) {
        Ok(true) => info!(operation_id = record.id, %status, "operation finished"),
        Ok(false) => warn!(
            operation_id = record.id,
            "operation changed while running, result dropped"
        ),
        Err(e) => error!(operation_id = record.id, error = %e, "failed to record result"),
    }
}
