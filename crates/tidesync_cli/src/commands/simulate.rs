//! Simulate command implementation.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidesync_operation::{ActorError, ActorRegistry, Connectivity, OperationConfig, OperationEngine};
use tidesync_paging::{
    FetchContext, PageFetcher, PagingConfig, PagingDataSource, PagingReconciliationDefinition,
    PagingStatus, ReconciliationActor, StoredItemQueries,
};
use tidesync_storage::{ItemId, MemoryStore, OperationStore, PagingStore};
use tracing::info;

/// Gives up after this many failed pages in a row.
const MAX_CONSECUTIVE_FAILURES: usize = 10;

/// How long to wait for any session change before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct Options {
    /// Collection key.
    pub collection: String,
    /// Number of remote items.
    pub total: u64,
    /// Page size.
    pub page_size: usize,
    /// Fail every n-th remote call; 0 never fails.
    pub fail_every: usize,
}

/// One observed change of the session.
#[derive(Debug, Serialize, PartialEq)]
pub struct Step {
    /// Number of visible items.
    pub items: usize,
    /// Session status.
    pub status: PagingStatus,
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Collection key.
    pub collection: String,
    /// Number of remote items.
    pub total: u64,
    /// Page size.
    pub page_size: usize,
    /// Remote calls made.
    pub remote_calls: usize,
    /// Items visible at the end.
    pub visible: usize,
    /// Final status.
    pub status: PagingStatus,
    /// Distinct states observed, in order.
    pub steps: Vec<Step>,
}

struct SyntheticRemote {
    total: u64,
    fail_every: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl PageFetcher for SyntheticRemote {
    async fn fetch(&self, context: FetchContext) -> Result<Vec<ItemId>, ActorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(ActorError::with_code(
                "simulated",
                format!("simulated failure on call {call}"),
            ));
        }
        let end = (context.start + context.page_size as u64).min(self.total);
        Ok((context.start..end)
            .map(|n| format!("{}-{n}", context.collection_key))
            .collect())
    }
}

/// Runs the simulate command.
pub async fn run(
    store_path: Option<&Path>,
    options: Options,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(store_path, &options).await?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }
    Ok(())
}

/// Pages through a synthetic remote until the end of the collection.
pub async fn simulate(
    store_path: Option<&Path>,
    options: &Options,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let store = Arc::new(match store_path {
        Some(path) => MemoryStore::open(path)?,
        None => MemoryStore::new(),
    });
    let remote = Arc::new(SyntheticRemote {
        total: options.total,
        fail_every: options.fail_every,
        calls: AtomicUsize::new(0),
    });
    let connectivity = Connectivity::new(true);
    let registry = ActorRegistry::new().register::<PagingReconciliationDefinition, _>(
        ReconciliationActor::new(
            Arc::clone(&store) as Arc<dyn PagingStore>,
            Arc::clone(&remote) as Arc<dyn PageFetcher>,
        ),
    );
    let engine = OperationEngine::start(
        OperationConfig::new("cli"),
        Arc::clone(&store) as Arc<dyn OperationStore>,
        registry,
        connectivity.clone(),
    )?;

    let collection_id = store.collection_id(&options.collection)?;
    let source = PagingDataSource::new(
        collection_id,
        PagingConfig::new(options.page_size).with_retry_timeout(Duration::from_millis(200)),
        Arc::new(StoredItemQueries::new(
            Arc::clone(&store) as Arc<dyn PagingStore>
        )),
        engine.clone(),
        connectivity,
    )?;

    let mut updates = source.subscribe();
    let mut steps: Vec<Step> = Vec::new();
    let mut failures = 0;
    source.next();

    while let Some(state) = tokio::time::timeout(STALL_TIMEOUT, updates.next()).await? {
        let step = Step {
            items: state.items.len(),
            status: state.status,
        };
        if steps.last() != Some(&step) {
            steps.push(step);
        }

        match state.status {
            PagingStatus::EndOfCollection => break,
            PagingStatus::Failed => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    break;
                }
            }
            PagingStatus::HasMore => {
                failures = 0;
                let session = source.reconciliation_state();
                if session.visible_len() >= session.requested {
                    source.next();
                }
            }
            PagingStatus::Loading => {}
        }
    }

    let last = source.state();
    source.close();
    engine.shutdown();

    if let Some(path) = store_path {
        store.save_to(path)?;
    }
    info!(
        collection = %options.collection,
        visible = last.items.len(),
        status = ?last.status,
        "simulation finished"
    );

    Ok(SimulationReport {
        collection: options.collection.clone(),
        total: options.total,
        page_size: options.page_size,
        remote_calls: remote.calls.load(Ordering::SeqCst),
        visible: last.items.len(),
        status: last.status,
        steps,
    })
}

fn print_text_output(report: &SimulationReport) {
    println!("Tidesync Paging Simulation");
    println!("==========================");
    println!();
    println!("Collection:   {}", report.collection);
    println!("Remote items: {}", report.total);
    println!("Page size:    {}", report.page_size);
    println!();
    println!("Steps:");
    for (n, step) in report.steps.iter().enumerate() {
        println!("  {:>3}. {:>5} items  {:?}", n + 1, step.items, step.status);
    }
    println!();
    println!("Remote calls: {}", report.remote_calls);
    println!("Visible:      {} ({:?})", report.visible, report.status);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(total: u64, fail_every: usize) -> Options {
        Options {
            collection: "feed".into(),
            total,
            page_size: 10,
            fail_every,
        }
    }

    #[tokio::test]
    async fn reaches_end_of_collection() {
        let report = simulate(None, &options(25, 0)).await.unwrap();
        assert_eq!(report.status, PagingStatus::EndOfCollection);
        assert_eq!(report.visible, 25);
        assert_eq!(report.remote_calls, 3);
    }

    #[tokio::test]
    async fn recovers_from_failures() {
        let report = simulate(None, &options(25, 2)).await.unwrap();
        assert_eq!(report.status, PagingStatus::EndOfCollection);
        assert_eq!(report.visible, 25);
        assert!(report.steps.iter().any(|s| s.status == PagingStatus::Failed));
    }

    #[tokio::test]
    async fn persists_store_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.tsyn");
        simulate(Some(&path), &options(5, 0)).await.unwrap();

        let store = MemoryStore::open(&path).unwrap();
        let feed = store.collection_id("feed").unwrap();
        assert_eq!(store.paging_items(feed, 0, 100).unwrap().len(), 5);
        assert_eq!(store.operations().len(), 1);
    }
}
