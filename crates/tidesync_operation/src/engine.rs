//! The operation engine: enqueue, execute, listen.

use crate::codec;
use crate::config::OperationConfig;
use crate::connectivity::Connectivity;
use crate::definition::OperationDefinition;
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorDigest, OperationError, OperationResult};
use crate::registry::ActorRegistry;
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidesync_storage::{
    observe, OperationId, OperationKey, OperationRecord, OperationStatus, OperationStore,
    StorageError, StorageResult, UpsertKind,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of [`OperationEngine::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued<O> {
    /// The operation is stored under this id, waiting for or being worked on
    /// by its actor.
    Enqueued(OperationId),
    /// The actor answered synchronously; nothing was stored.
    Completed(O),
}

struct EngineInner {
    config: OperationConfig,
    store: Arc<dyn OperationStore>,
    registry: ActorRegistry,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl EngineInner {
    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Durable queue plus actor dispatch for asynchronous work.
///
/// Operations are persisted through an [`OperationStore`] before anything
/// runs, so work survives restarts. Each registered operation type gets one
/// dispatcher task that picks idle rows up, runs the actor and records the
/// outcome. A [`Connectivity`] regain moves every suspended row of the
/// client back to idle.
///
/// Cloning the engine is cheap; clones share the same dispatchers. The
/// background tasks stop when [`OperationEngine::shutdown`] is called or the
/// last clone is dropped.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use std::sync::Arc;
/// use tidesync_operation::{
///     Actor, ActorError, ActorRegistry, Connectivity, OperationConfig, OperationDefinition,
///     OperationEngine,
/// };
/// use tidesync_storage::MemoryStore;
///
/// struct Greet;
///
/// impl OperationDefinition for Greet {
///     const TYPE: &'static str = "greet";
///     type Input = String;
///     type Output = String;
///
///     fn unique_key(name: &String) -> Option<String> {
///         Some(name.clone())
///     }
/// }
///
/// struct Greeter;
///
/// #[async_trait]
/// impl Actor<Greet> for Greeter {
///     async fn perform(&self, name: String) -> Result<String, ActorError> {
///         Ok(format!("hello {name}"))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = OperationEngine::start(
///     OperationConfig::new("demo"),
///     Arc::new(MemoryStore::new()),
///     ActorRegistry::new().register::<Greet, _>(Greeter),
///     Connectivity::default(),
/// )
/// .unwrap();
///
/// let greeting = engine.execute::<Greet>("ada".to_string()).await.unwrap();
/// assert_eq!(greeting, "hello ada");
/// # }
/// ```
#[derive(Clone)]
pub struct OperationEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for OperationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationEngine")
            .field("client_type", &self.inner.config.client_type)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl OperationEngine {
    /// Starts the engine.
    ///
    /// Rows of this client left `Started` by a previous process are moved
    /// back to `Idle` first, then one dispatcher per registered type and a
    /// connectivity watcher are spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if interrupted work cannot be reset.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn start(
        config: OperationConfig,
        store: Arc<dyn OperationStore>,
        registry: ActorRegistry,
        connectivity: Connectivity,
    ) -> OperationResult<Self> {
        let interrupted = store.reset_started(&config.client_type)?;
        if interrupted > 0 {
            info!(
                client_type = %config.client_type,
                count = interrupted,
                "requeued interrupted operations"
            );
        }

        let mut tasks = Vec::new();
        for (op_type, actor) in registry.iter() {
            let dispatcher = Dispatcher {
                op_type,
                client_type: config.client_type.clone(),
                store: Arc::clone(&store),
                actor: Arc::clone(actor),
                execution_timeout: config.execution_timeout,
                throttle: config.notification_throttle,
            };
            tasks.push(tokio::spawn(dispatcher.run()));
        }
        tasks.push(tokio::spawn(resume_on_regain(
            Arc::clone(&store),
            config.client_type.clone(),
            connectivity,
        )));

        debug!(
            client_type = %config.client_type,
            op_types = ?registry.op_types(),
            "operation engine started"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                registry,
                tasks: Mutex::new(tasks),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &OperationConfig {
        &self.inner.config
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.inner.store
    }

    /// Returns true if an actor is registered for `op_type`.
    pub fn handles(&self, op_type: &str) -> bool {
        self.inner.registry.contains(op_type)
    }

    /// Enqueues an operation.
    ///
    /// The actor's fast path is consulted first. Otherwise the row for the
    /// input's deduplication key is upserted: a pending row is reused as is,
    /// a finished or suspended one is recycled with the new input.
    pub fn enqueue<D: OperationDefinition>(
        &self,
        input: D::Input,
    ) -> OperationResult<Enqueued<D::Output>> {
        self.ensure_open()?;
        let actor = self
            .inner
            .registry
            .get(D::TYPE)
            .ok_or_else(|| OperationError::UnknownOperationType(D::TYPE.to_string()))?;

        let bytes = codec::encode(&input)?;
        if let Some(output) = actor.before_enqueue(&bytes)? {
            debug!(op_type = D::TYPE, "completed by fast path");
            return Ok(Enqueued::Completed(codec::decode(&output)?));
        }

        let unique_key = D::unique_key(&input).unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = OperationKey::new(&self.inner.config.client_type, D::TYPE, unique_key);
        let upserted = self.inner.store.upsert_operation(&key, bytes)?;
        match upserted.kind {
            UpsertKind::Inserted => debug!(
                operation_id = upserted.record.id,
                op_type = D::TYPE,
                "operation enqueued"
            ),
            UpsertKind::Recycled => debug!(
                operation_id = upserted.record.id,
                op_type = D::TYPE,
                "operation recycled"
            ),
            UpsertKind::Existing => debug!(
                operation_id = upserted.record.id,
                op_type = D::TYPE,
                status = %upserted.record.status,
                "operation already pending"
            ),
        }
        Ok(Enqueued::Enqueued(upserted.record.id))
    }

    /// Enqueues an operation and waits for its output.
    ///
    /// Fails with [`OperationError::PickupTimeout`] if the operation is still
    /// idle after the pickup timeout (the row is then recorded as failed),
    /// and with [`OperationError::ExecutionTimeout`] if it does not finish
    /// within the execution timeout.
    pub async fn execute<D: OperationDefinition>(
        &self,
        input: D::Input,
    ) -> OperationResult<D::Output> {
        let id = match self.enqueue::<D>(input)? {
            Enqueued::Completed(output) => return Ok(output),
            Enqueued::Enqueued(id) => id,
        };
        let mut rows = self.watch_operation(id);

        let started = match tokio::time::timeout(
            self.inner.config.pickup_timeout,
            wait_for_pickup(&mut rows, id),
        )
        .await
        {
            Ok(row) => row?,
            Err(_) => return self.fail_pickup(id),
        };
        if let Some(result) = outcome_of::<D>(&started) {
            return result;
        }

        let deadline = self.inner.config.execution_timeout + self.inner.config.execute_margin;
        tokio::time::timeout(deadline, wait_for_outcome::<D>(&mut rows, id))
            .await
            .unwrap_or(Err(OperationError::ExecutionTimeout))
    }

    /// Streams the outcome of operation `id` every time it finishes.
    ///
    /// The current outcome is emitted first if the row is already finished.
    /// A recycled row emits again when its new run finishes.
    pub fn listen<D: OperationDefinition>(
        &self,
        id: OperationId,
    ) -> BoxStream<'static, OperationResult<D::Output>> {
        let mut last_seen = None;
        self.watch_operation(id)
            .filter_map(move |row| {
                let item = match row {
                    Err(e) => Some(Err(e.into())),
                    Ok(None) => Some(Err(StorageError::OperationNotFound(id).into())),
                    Ok(Some(row)) if last_seen == Some(row.last_updated) => None,
                    Ok(Some(row)) => {
                        let result = outcome_of::<D>(&row);
                        if result.is_some() {
                            last_seen = Some(row.last_updated);
                        }
                        result
                    }
                };
                future::ready(item)
            })
            .boxed()
    }

    /// Streams the status of the operation an input deduplicates to.
    ///
    /// Emits `None` while no such operation exists, then every status
    /// change.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::NoDeduplicationKey`] if the definition opts
    /// out of deduplication.
    pub fn listen_status_of<D: OperationDefinition>(
        &self,
        input: &D::Input,
    ) -> OperationResult<BoxStream<'static, OperationResult<Option<OperationStatus>>>> {
        let unique_key = D::unique_key(input)
            .ok_or_else(|| OperationError::NoDeduplicationKey(D::TYPE.to_string()))?;
        let key = OperationKey::new(&self.inner.config.client_type, D::TYPE, unique_key);
        let store = Arc::clone(&self.inner.store);

        let mut last_seen: Option<Option<(OperationStatus, u64)>> = None;
        Ok(observe(store.operation_changes(), Duration::ZERO, move || {
            store.operation_by_key(&key)
        })
        .filter_map(move |row| {
            let item = match row {
                Err(e) => Some(Err(e.into())),
                Ok(row) => {
                    let current = row.map(|r| (r.status, r.last_updated));
                    if last_seen == Some(current) {
                        None
                    } else {
                        last_seen = Some(current);
                        Some(Ok(current.map(|(status, _)| status)))
                    }
                }
            };
            future::ready(item)
        })
        .boxed())
    }

    /// Moves every suspended operation of this client back to idle.
    ///
    /// Returns the number of operations resumed.
    pub fn resume_suspended(&self) -> OperationResult<usize> {
        self.ensure_open()?;
        let resumed = self
            .inner
            .store
            .resume_suspended(&self.inner.config.client_type)?;
        if resumed > 0 {
            info!(count = resumed, "resumed suspended operations");
        }
        Ok(resumed)
    }

    /// Stops all dispatchers. Running actors finish on their own.
    ///
    /// Later calls to `enqueue` fail with [`OperationError::Closed`].
    pub fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.abort_tasks();
            debug!(client_type = %self.inner.config.client_type, "operation engine shut down");
        }
    }

    /// Returns true once [`OperationEngine::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> OperationResult<()> {
        if self.is_shutdown() {
            Err(OperationError::Closed)
        } else {
            Ok(())
        }
    }

    fn watch_operation(&self, id: OperationId) -> RowStream {
        let store = Arc::clone(&self.inner.store);
        observe(store.operation_changes(), Duration::ZERO, move || {
            store.operation(id)
        })
    }

    /// Claims a row nobody picked up and records it as failed.
    fn fail_pickup<O>(&self, id: OperationId) -> OperationResult<O> {
        let store = &self.inner.store;
        let Some(row) = store.operation(id)? else {
            return Err(StorageError::OperationNotFound(id).into());
        };
        if let Some(claimed) = store.start_operation(id, row.last_updated)? {
            let digest = codec::encode(&ErrorDigest::pickup_timeout())?;
            store.finish_operation(
                id,
                claimed.last_updated,
                OperationStatus::Failure,
                Some(digest),
            )?;
            warn!(operation_id = id, op_type = %row.op_type, "operation not picked up in time");
        }
        Err(OperationError::PickupTimeout)
    }
}

type RowStream = BoxStream<'static, StorageResult<Option<OperationRecord>>>;

async fn wait_for_pickup(rows: &mut RowStream, id: OperationId) -> OperationResult<OperationRecord> {
    while let Some(row) = rows.next().await {
        let row = row?.ok_or(StorageError::OperationNotFound(id))?;
        if row.status != OperationStatus::Idle {
            return Ok(row);
        }
    }
    Err(OperationError::Closed)
}

async fn wait_for_outcome<D: OperationDefinition>(
    rows: &mut RowStream,
    id: OperationId,
) -> OperationResult<D::Output> {
    while let Some(row) = rows.next().await {
        let row = row?.ok_or(StorageError::OperationNotFound(id))?;
        if let Some(result) = outcome_of::<D>(&row) {
            return result;
        }
    }
    Err(OperationError::Closed)
}

/// Maps a finished row to the caller-facing result. `None` while pending.
fn outcome_of<D: OperationDefinition>(
    row: &OperationRecord,
) -> Option<OperationResult<D::Output>> {
    match row.status {
        OperationStatus::Idle | OperationStatus::Started => None,
        OperationStatus::Suspended => Some(Err(OperationError::Suspended)),
        OperationStatus::Success => Some(match &row.output {
            Some(bytes) => codec::decode(bytes),
            None => Err(OperationError::Failed(ErrorDigest::internal(
                "operation succeeded without output",
            ))),
        }),
        OperationStatus::Failure => Some(Err(match &row.output {
            Some(bytes) => match codec::decode::<ErrorDigest>(bytes) {
                Ok(digest) => OperationError::from_digest(digest),
                Err(e) => e,
            },
            None => OperationError::Failed(ErrorDigest::internal("operation failed")),
        })),
    }
}

/// Resumes suspended rows of a client on every connectivity regain.
async fn resume_on_regain(
    store: Arc<dyn OperationStore>,
    client_type: String,
    connectivity: Connectivity,
) {
    loop {
        connectivity.wait_until_regained().await;
        match store.resume_suspended(&client_type) {
            Ok(0) => {}
            Ok(count) => info!(%client_type, count, "connectivity regained, operations resumed"),
            Err(e) => warn!(%client_type, error = %e, "failed to resume operations"),
        }
    }
}
