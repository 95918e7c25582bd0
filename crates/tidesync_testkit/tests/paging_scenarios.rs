//! End-to-end paging scenarios over a memory store and a fake remote.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tidesync_operation::{ActorRegistry, Connectivity, OperationConfig, OperationEngine, OperationError};
use tidesync_paging::{PagingDataSource, PagingError, StoredItemQueries};
use tidesync_storage::{MemoryStore, PagingItem, PagingStore};
use tidesync_testkit::prelude::*;

fn reconciled_and_idle(count: usize) -> impl Fn(&tidesync_paging::ReconciliationState<PagingItem>) -> bool {
    move |s| s.reconciled_items.len() == count && s.reconciliation == ReconciliationStatus::Idle
}

#[tokio::test]
async fn pages_through_whole_collection() {
    init_tracing();
    let h = PagingHarness::start("inbox", 25);
    let source = h.source(PagingConfig::new(10));
    assert!(source.state().items.is_empty());

    source.next();
    let s = wait_until(&source, reconciled_and_idle(10)).await;
    assert_eq!(s.status(), PagingStatus::HasMore);

    source.next();
    wait_until(&source, reconciled_and_idle(20)).await;

    source.next();
    let s = wait_until(&source, |s| {
        s.reconciliation == ReconciliationStatus::EndOfCollection
    })
    .await;
    assert_eq!(visible_ids(&s), h.expected_ids(25));
    assert!(s.provisional_items.is_empty());
    assert_eq!(s.status(), PagingStatus::EndOfCollection);
    assert_eq!(h.remote.call_starts(), vec![0, 10, 20]);

    // Terminal: nothing more is fetched.
    source.next();
    tokio::task::yield_now().await;
    assert_eq!(h.remote.call_starts().len(), 3);
}

/// Runs a session over one cached page whose reconciliation fails, and
/// returns every status it published until page two was reconciled.
async fn cached_page_session_statuses() -> Vec<PagingStatus> {
    let h = PagingHarness::start("inbox", 25);
    h.seed_cache(10);
    h.remote.fail_next(1);
    let source = h.source(PagingConfig::new(10));
    let mut views = source.subscribe();

    source.next();
    let mut statuses = Vec::new();
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while let Some(view) = views.next().await {
            statuses.push(view.status);
            if view.items.len() == 20 && view.status == PagingStatus::HasMore {
                break;
            }
        }
    })
    .await
    .expect("page two was never reconciled");

    // Page one came from the cache; page two was requested without another
    // call to next().
    let s = wait_until(&source, reconciled_and_idle(20)).await;
    assert_eq!(visible_ids(&s), h.expected_ids(20));
    assert_eq!(h.remote.call_starts(), vec![0, 10]);
    statuses
}

#[tokio::test]
async fn cached_page_carries_session_past_failed_reconciliation() {
    init_tracing();
    let statuses = cached_page_session_statuses().await;
    assert!(
        !statuses.contains(&PagingStatus::Failed),
        "statuses: {statuses:?}"
    );
    assert_eq!(statuses.last(), Some(&PagingStatus::HasMore));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cached_page_never_surfaces_failure_under_parallel_effects() {
    // Cache lookup and reconciliation finish in either order here.
    for run in 0..50 {
        let statuses = cached_page_session_statuses().await;
        assert!(
            !statuses.contains(&PagingStatus::Failed),
            "run {run} statuses: {statuses:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_cached_page_still_fails_under_parallel_effects() {
    let h = PagingHarness::start("inbox", 25);
    h.seed_cache(4);
    h.remote.set_reachable(false);
    let source = h.source(PagingConfig::new(10));

    source.next();
    let s = wait_until(&source, |s| {
        s.reconciliation == ReconciliationStatus::Failed { start: 0 }
    })
    .await;
    assert_eq!(s.pending_failure, None);
    assert_eq!(visible_ids(&s), h.expected_ids(4));
}

#[tokio::test]
async fn offline_session_shows_cached_items() {
    init_tracing();
    let h = PagingHarness::start("inbox", 25);
    h.seed_cache(10);
    h.remote.set_reachable(false);
    let source = h.source(PagingConfig::new(10));

    source.next();
    let s = wait_until(&source, |s| {
        s.reconciliation == ReconciliationStatus::Failed { start: 10 }
    })
    .await;
    assert_eq!(s.status(), PagingStatus::Failed);
    assert_eq!(visible_ids(&s), h.expected_ids(10));
}

#[tokio::test]
async fn failed_page_retries_when_connectivity_returns() {
    init_tracing();
    let h = PagingHarness::start("inbox", 25);
    h.remote.set_reachable(false);
    let source = h.source(PagingConfig::new(10));

    source.next();
    let s = wait_until(&source, |s| s.status() == PagingStatus::Failed).await;
    assert_eq!(s.reconciliation, ReconciliationStatus::Failed { start: 0 });
    assert!(s.view().items.is_empty());

    // Let the retry effect start listening.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.remote.set_reachable(true);
    h.bounce_connectivity();

    let s = tokio::time::timeout(
        Duration::from_secs(5),
        wait_until(&source, reconciled_and_idle(10)),
    )
    .await
    .expect("retry did not follow connectivity");
    assert_eq!(visible_ids(&s), h.expected_ids(10));
}

#[tokio::test(start_paused = true)]
async fn failed_page_retries_after_timeout() {
    let h = PagingHarness::start("inbox", 25);
    h.remote.set_reachable(false);
    let source = h.source(PagingConfig::new(10).with_retry_timeout(Duration::from_secs(15)));

    source.next();
    wait_until(&source, |s| s.status() == PagingStatus::Failed).await;
    let failed_at = tokio::time::Instant::now();
    h.remote.set_reachable(true);

    wait_until(&source, reconciled_and_idle(10)).await;
    assert!(failed_at.elapsed() >= Duration::from_secs(15));
    assert_eq!(h.remote.call_starts(), vec![0, 0]);
}

#[tokio::test]
async fn retry_keeps_requested_count() {
    let h = PagingHarness::start("inbox", 25);
    h.remote.set_reachable(false);
    let source = h.source(PagingConfig::new(10));

    source.next();
    let failed = wait_until(&source, |s| s.status() == PagingStatus::Failed).await;
    h.remote.set_reachable(true);

    // A next() on a failed session retries the failed page.
    source.next();
    let s = wait_until(&source, reconciled_and_idle(10)).await;
    assert_eq!(s.requested, failed.requested);
}

#[tokio::test]
async fn storage_updates_are_spliced_into_view() {
    init_tracing();
    let h = PagingHarness::start("inbox", 8);
    let source = h.source(PagingConfig::new(10));

    source.next();
    let s = wait_until(&source, |s| {
        s.reconciliation == ReconciliationStatus::EndOfCollection
    })
    .await;
    let target = h.expected_ids(8)[3].clone();
    let before = s.reconciled_items[3].last_in_sync;

    let mark = h
        .store
        .touch_items(h.collection_id, std::slice::from_ref(&target))
        .unwrap();
    assert!(mark > before);

    let s = wait_until(&source, |s| s.reconciled_items[3].last_in_sync == mark).await;
    assert_eq!(visible_ids(&s), h.expected_ids(8));
    assert_eq!(s.applied_update_mark, Some(mark));
}

#[tokio::test]
async fn reload_starts_over() {
    init_tracing();
    let h = PagingHarness::start("inbox", 25);
    let source = h.source(PagingConfig::new(10));

    source.next();
    wait_until(&source, reconciled_and_idle(10)).await;
    source.next();
    wait_until(&source, reconciled_and_idle(20)).await;

    source.reload();
    let s = wait_until(&source, |s| {
        s.epoch == 1 && s.reconciled_items.len() == 10 && s.reconciliation == ReconciliationStatus::Idle
    })
    .await;
    assert_eq!(s.requested, 10);
    assert!(s.provisional_items.is_empty());
    assert_eq!(visible_ids(&s), h.expected_ids(10));
    assert_eq!(h.remote.call_starts(), vec![0, 10, 0]);
}

#[tokio::test]
async fn remote_shrinking_truncates_cache() {
    let h = PagingHarness::start("inbox", 5);
    h.seed_cache(15);
    let source = h.source(PagingConfig::new(10));

    source.next();
    let s = wait_until(&source, |s| {
        s.reconciliation == ReconciliationStatus::EndOfCollection
    })
    .await;
    assert_eq!(visible_ids(&s), h.expected_ids(5));
    assert_eq!(
        h.store.paging_items(h.collection_id, 0, 100).unwrap().len(),
        5
    );
}

#[tokio::test]
async fn closed_session_ignores_requests() {
    let h = PagingHarness::start("inbox", 25);
    let source = h.source(PagingConfig::new(10));
    source.close();
    assert!(!source.is_active());

    source.next();
    assert_eq!(source.reconciliation_state().requested, 0);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn session_requires_reconciliation_actor_and_valid_config() {
    let store = Arc::new(MemoryStore::new());
    let queries = Arc::new(StoredItemQueries::new(
        Arc::clone(&store) as Arc<dyn PagingStore>
    ));
    let bare = OperationEngine::start(
        OperationConfig::new("bare"),
        Arc::clone(&store) as Arc<dyn tidesync_storage::OperationStore>,
        ActorRegistry::new(),
        Connectivity::default(),
    )
    .unwrap();

    let err = PagingDataSource::new(
        1,
        PagingConfig::new(10),
        Arc::clone(&queries),
        bare,
        Connectivity::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PagingError::Operation(OperationError::UnknownOperationType(_))
    ));

    let h = PagingHarness::start("inbox", 25);
    let err = PagingDataSource::new(
        h.collection_id,
        PagingConfig::new(0),
        queries,
        h.engine.clone(),
        h.connectivity.clone(),
    )
    .unwrap_err();
    assert!(matches!(err, PagingError::InvalidConfig(_)));
}
