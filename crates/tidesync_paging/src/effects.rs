//! Effects of a paging session.
//!
//! Each effect watches one part of [`ReconciliationState`] and reports back
//! with a [`PagingEvent`]. Results carry the epoch and start they were
//! requested for, so the reducer can drop them after a reload.

use crate::config::PagingConfig;
use crate::queries::PagingQueries;
use crate::reconcile::{PagingReconciliationDefinition, ReconcileRequest};
use crate::state::{CacheLookupStatus, PagingEvent, ReconciliationState, ReconciliationStatus};
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tidesync_loop::Effect;
use tidesync_operation::{Connectivity, OperationEngine};
use tidesync_storage::{observe, CollectionId};
use tracing::{debug, warn};

type State<Q> = ReconciliationState<<Q as PagingQueries>::Item>;
type Event<Q> = PagingEvent<<Q as PagingQueries>::Item>;

pub(crate) struct EffectContext<Q> {
    pub(crate) collection_id: CollectionId,
    pub(crate) config: PagingConfig,
    pub(crate) queries: Arc<Q>,
    pub(crate) engine: OperationEngine,
    pub(crate) connectivity: Connectivity,
}

pub(crate) fn build<Q: PagingQueries>(ctx: EffectContext<Q>) -> Vec<Effect<State<Q>, Event<Q>>> {
    let mut effects = vec![
        cache_lookup(&ctx),
        reconciliation(&ctx),
        retry(&ctx),
    ];
    if ctx.queries.update_changes().is_some() {
        effects.push(update_head(&ctx));
        effects.push(updates(&ctx));
    }
    effects
}

fn cache_lookup<Q: PagingQueries>(ctx: &EffectContext<Q>) -> Effect<State<Q>, Event<Q>> {
    let collection_id = ctx.collection_id;
    let page_size = ctx.config.page_size;
    let queries = Arc::clone(&ctx.queries);

    Effect::skipping_repeated(
        "cache-lookup",
        |s: &State<Q>| match s.cache_lookup {
            CacheLookupStatus::Lookup { start } => Some((s.epoch, start)),
            _ => None,
        },
        move |(epoch, start)| {
            let queries = Arc::clone(&queries);
            stream::once(async move {
                let items = queries
                    .load_page(collection_id, start, page_size)
                    .unwrap_or_else(|e| {
                        warn!(collection_id, start, error = %e, "cache lookup failed");
                        Vec::new()
                    });
                PagingEvent::CacheLoaded {
                    epoch,
                    start,
                    items,
                }
            })
            .boxed()
        },
    )
}

fn reconciliation<Q: PagingQueries>(ctx: &EffectContext<Q>) -> Effect<State<Q>, Event<Q>> {
    let collection_id = ctx.collection_id;
    let page_size = ctx.config.page_size;
    let queries = Arc::clone(&ctx.queries);
    let engine = ctx.engine.clone();

    Effect::skipping_repeated(
        "reconciliation",
        |s: &State<Q>| match s.reconciliation {
            ReconciliationStatus::Reconcile { start } => Some((s.epoch, start)),
            _ => None,
        },
        move |(epoch, start)| {
            let queries = Arc::clone(&queries);
            let engine = engine.clone();
            stream::once(async move {
                let request = ReconcileRequest {
                    collection_id,
                    start,
                    page_size,
                };
                let outcome = match engine
                    .execute::<PagingReconciliationDefinition>(request)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!(collection_id, start, error = %e, "reconciliation failed");
                        return PagingEvent::ReconcileFailed {
                            epoch,
                            start,
                            error: e.to_string(),
                        };
                    }
                };
                match queries.load_page(collection_id, start, page_size) {
                    Ok(items) => PagingEvent::Reconciled {
                        epoch,
                        start,
                        outcome,
                        items,
                    },
                    Err(e) => {
                        warn!(collection_id, start, error = %e, "re-reading reconciled page failed");
                        PagingEvent::ReconcileFailed {
                            epoch,
                            start,
                            error: e.to_string(),
                        }
                    }
                }
            })
            .boxed()
        },
    )
}

/// Waits for connectivity or the retry timeout after a failure, whichever
/// comes first.
fn retry<Q: PagingQueries>(ctx: &EffectContext<Q>) -> Effect<State<Q>, Event<Q>> {
    let connectivity = ctx.connectivity.clone();
    let retry_timeout = ctx.config.retry_timeout;

    Effect::first_value_after_every_null(
        "retry",
        |s: &State<Q>| match s.reconciliation {
            ReconciliationStatus::Failed { start } => Some(start),
            _ => None,
        },
        move |start| {
            let regained = connectivity.wait_until_regained();
            stream::once(async move {
                tokio::select! {
                    _ = regained => debug!(start, "connectivity regained, retrying page"),
                    _ = tokio::time::sleep(retry_timeout) => debug!(start, "retry timeout elapsed, retrying page"),
                }
                PagingEvent::PrefetchNext
            })
            .boxed()
        },
    )
}

fn update_head<Q: PagingQueries>(ctx: &EffectContext<Q>) -> Effect<State<Q>, Event<Q>> {
    let collection_id = ctx.collection_id;
    let queries = Arc::clone(&ctx.queries);

    Effect::new("update-head", move |_snapshots| {
        let Some(changes) = queries.update_changes() else {
            return stream::empty().boxed();
        };
        let mut last = None;
        observe(changes, Duration::ZERO, move || {
            queries.update_head(collection_id)
        })
        .filter_map(move |head| {
            let event = match head {
                Ok(head) if last != Some(head) => {
                    last = Some(head);
                    Some(PagingEvent::UpdateHeadChanged { head })
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(collection_id, error = %e, "reading update head failed");
                    None
                }
            };
            future::ready(event)
        })
        .boxed()
    })
}

/// Splices items updated after the applied mark into the visible range.
fn updates<Q: PagingQueries>(ctx: &EffectContext<Q>) -> Effect<State<Q>, Event<Q>> {
    let collection_id = ctx.collection_id;
    let queries = Arc::clone(&ctx.queries);

    Effect::skipping_repeated(
        "updates",
        |s: &State<Q>| match (s.applied_update_mark, s.db_update_head) {
            (Some(applied), Some(head)) if head > applied && s.visible_len() > 0 => {
                Some((s.epoch, applied, head, s.visible_len() as u64))
            }
            _ => None,
        },
        move |(epoch, applied, head, visible)| {
            let queries = Arc::clone(&queries);
            stream::once(async move {
                let items = queries
                    .updated_since(collection_id, applied, 0..visible)
                    .unwrap_or_else(|e| {
                        warn!(collection_id, error = %e, "reading updated items failed");
                        Vec::new()
                    });
                PagingEvent::ItemsUpdated {
                    epoch,
                    mark: head,
                    items,
                }
            })
            .boxed()
        },
    )
}
