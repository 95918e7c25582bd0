//! The caller-facing paging session.

use crate::config::PagingConfig;
use crate::effects::{self, EffectContext};
use crate::error::PagingResult;
use crate::queries::PagingQueries;
use crate::reconcile::PagingReconciliationDefinition;
use crate::reducer::Reducer;
use crate::state::{PagingEvent, PagingState, ReconciliationState};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tidesync_loop::Loop;
use tidesync_operation::{Connectivity, OperationDefinition, OperationEngine, OperationError};
use tidesync_storage::CollectionId;
use tracing::debug;

/// A cache-first view over one remote collection.
///
/// Cached items are shown as soon as they are read; each page is then
/// reconciled with the remote through the operation engine, which must have
/// a [`crate::ReconciliationActor`] registered. Dropping the source cancels
/// its in-flight work.
///
/// ```text
///   next() ──► cache lookahead ──► provisional items ─┐
///          └─► reconciliation ───► reconciled items ──┴─► PagingState
/// ```
pub struct PagingDataSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    collection_id: CollectionId,
    machine: Loop<ReconciliationState<T>, PagingEvent<T>>,
}

impl<T> std::fmt::Debug for PagingDataSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingDataSource")
            .field("collection_id", &self.collection_id)
            .field("active", &self.machine.is_active())
            .finish()
    }
}

impl<T> PagingDataSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Opens a session over `collection_id`.
    ///
    /// Nothing is loaded until the first [`PagingDataSource::next`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the engine has no
    /// reconciliation actor.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new<Q>(
        collection_id: CollectionId,
        config: PagingConfig,
        queries: Arc<Q>,
        engine: OperationEngine,
        connectivity: Connectivity,
    ) -> PagingResult<Self>
    where
        Q: PagingQueries<Item = T>,
    {
        config.validate()?;
        if !engine.handles(PagingReconciliationDefinition::TYPE) {
            return Err(OperationError::UnknownOperationType(
                PagingReconciliationDefinition::TYPE.to_string(),
            )
            .into());
        }

        let reducer = Reducer::new(config.page_size, Q::identity);
        let effects = effects::build(EffectContext {
            collection_id,
            config,
            queries,
            engine,
            connectivity,
        });
        let machine = Loop::new(
            format!("paging-{collection_id}"),
            ReconciliationState::default(),
            move |state, event| reducer.reduce(state, event),
            effects,
        );
        debug!(collection_id, "paging session opened");

        Ok(Self {
            collection_id,
            machine,
        })
    }

    /// Returns the collection this session pages through.
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Returns the current view.
    pub fn state(&self) -> PagingState<T> {
        self.machine.state().view()
    }

    /// Returns the full session state.
    pub fn reconciliation_state(&self) -> ReconciliationState<T> {
        self.machine.state()
    }

    /// Streams the view, starting with the current one.
    pub fn subscribe(&self) -> BoxStream<'static, PagingState<T>> {
        self.machine
            .subscribe()
            .map(|snapshot| snapshot.state.view())
            .boxed()
    }

    /// Requests one more page, or retries a failed one.
    pub fn next(&self) {
        self.machine.send(PagingEvent::PrefetchNext);
    }

    /// Starts over from the first page.
    ///
    /// Results of work started before the reload are discarded.
    pub fn reload(&self) {
        self.machine.send(PagingEvent::Reload);
    }

    /// Returns true until the session is closed.
    pub fn is_active(&self) -> bool {
        self.machine.is_active()
    }

    /// Closes the session and cancels its effects.
    pub fn close(&self) {
        self.machine.close();
    }
}
