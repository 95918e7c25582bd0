//! Test fixtures wiring a store, an engine and a remote together.

use crate::remote::FakeRemote;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tidesync_operation::{ActorRegistry, Connectivity, OperationConfig, OperationEngine};
use tidesync_paging::{
    PageFetcher, PagingConfig, PagingDataSource, PagingReconciliationDefinition, ReconciliationActor,
    ReconciliationState, StoredItemQueries,
};
use tidesync_storage::{CollectionId, MemoryStore, OperationStore, PagingItem, PagingStore};
use tracing_subscriber::EnvFilter;

/// How long [`wait_until`] waits before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// A memory store, an operation engine reconciling against a
/// [`FakeRemote`], and one collection.
pub struct PagingHarness {
    /// The store.
    pub store: Arc<MemoryStore>,
    /// The remote collection.
    pub remote: Arc<FakeRemote>,
    /// The engine with a reconciliation actor registered.
    pub engine: OperationEngine,
    /// Connectivity shared by the engine and sessions.
    pub connectivity: Connectivity,
    /// Key of the collection.
    pub collection_key: String,
    /// Id of the collection.
    pub collection_id: CollectionId,
}

impl PagingHarness {
    /// Starts a harness over a fresh store.
    ///
    /// # Panics
    ///
    /// Panics outside of a tokio runtime or if the engine fails to start.
    pub fn start(collection_key: &str, total: u64) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), collection_key, total)
    }

    /// Starts a harness over an existing store.
    ///
    /// # Panics
    ///
    /// Panics outside of a tokio runtime or if the engine fails to start.
    pub fn with_store(store: Arc<MemoryStore>, collection_key: &str, total: u64) -> Self {
        let remote = Arc::new(FakeRemote::new(total));
        let connectivity = Connectivity::new(true);
        let registry = ActorRegistry::new().register::<PagingReconciliationDefinition, _>(
            ReconciliationActor::new(
                Arc::clone(&store) as Arc<dyn PagingStore>,
                Arc::clone(&remote) as Arc<dyn PageFetcher>,
            ),
        );
        let engine = OperationEngine::start(
            OperationConfig::new("testkit"),
            Arc::clone(&store) as Arc<dyn OperationStore>,
            registry,
            connectivity.clone(),
        )
        .expect("Failed to start operation engine");
        let collection_id = store
            .collection_id(collection_key)
            .expect("Failed to register collection");

        Self {
            store,
            remote,
            engine,
            connectivity,
            collection_key: collection_key.to_string(),
            collection_id,
        }
    }

    /// Writes the first `count` remote items into the cache, as a previous
    /// run would have left them.
    pub fn seed_cache(&self, count: u64) {
        let ids = FakeRemote::item_ids(&self.collection_key, count);
        self.store
            .write_page(self.collection_id, 0, &ids, false)
            .expect("Failed to seed cache");
    }

    /// Opens a session over the harness collection.
    pub fn source(&self, config: PagingConfig) -> PagingDataSource<PagingItem> {
        PagingDataSource::new(
            self.collection_id,
            config,
            Arc::new(StoredItemQueries::new(
                Arc::clone(&self.store) as Arc<dyn PagingStore>
            )),
            self.engine.clone(),
            self.connectivity.clone(),
        )
        .expect("Failed to open paging session")
    }

    /// Ids of the first `count` remote items.
    pub fn expected_ids(&self, count: u64) -> Vec<String> {
        FakeRemote::item_ids(&self.collection_key, count)
    }

    /// Drops and regains connectivity.
    pub fn bounce_connectivity(&self) {
        self.connectivity.set_available(false);
        self.connectivity.set_available(true);
    }
}

/// Waits until `predicate` holds for the session state and returns that
/// state.
///
/// # Panics
///
/// Panics if the predicate does not hold within [`WAIT_TIMEOUT`].
pub async fn wait_until<T, P>(source: &PagingDataSource<T>, predicate: P) -> ReconciliationState<T>
where
    T: Clone + Send + Sync + 'static,
    P: Fn(&ReconciliationState<T>) -> bool,
{
    let mut changes = source.subscribe();
    let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let state = source.reconciliation_state();
            if predicate(&state) {
                return state;
            }
            if changes.next().await.is_none() {
                panic!("paging session closed while waiting");
            }
        }
    })
    .await;
    match waited {
        Ok(state) => state,
        Err(_) => panic!(
            "condition not reached, last state: {:?}",
            source.state().status
        ),
    }
}

/// Item ids of a session state, reconciled then provisional.
pub fn visible_ids(state: &ReconciliationState<PagingItem>) -> Vec<String> {
    state
        .view()
        .items
        .into_iter()
        .map(|item| item.item_id)
        .collect()
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
