//! The reconciliation reducer.
//!
//! Pure: every transition of a paging session is decided here, effects only
//! carry out what the state asks for and report back with events.

use crate::reconcile::ReconcileOutcome;
use crate::state::{CacheLookupStatus, PagingEvent, ReconciliationState, ReconciliationStatus};

pub(crate) struct Reducer<T> {
    page_size: usize,
    identity: fn(&T) -> &str,
}

impl<T: Clone> Reducer<T> {
    pub(crate) fn new(page_size: usize, identity: fn(&T) -> &str) -> Self {
        Self {
            page_size,
            identity,
        }
    }

    pub(crate) fn reduce(
        &self,
        state: &ReconciliationState<T>,
        event: &PagingEvent<T>,
    ) -> ReconciliationState<T> {
        let mut next = state.clone();
        match event {
            PagingEvent::PrefetchNext => self.prefetch_next(&mut next),
            PagingEvent::Reload => self.reload(&mut next),
            PagingEvent::CacheLoaded {
                epoch,
                start,
                items,
            } if *epoch == next.epoch => self.cache_loaded(&mut next, *start, items),
            PagingEvent::Reconciled {
                epoch,
                start,
                outcome,
                items,
            } if *epoch == next.epoch => self.reconciled(&mut next, *start, *outcome, items),
            PagingEvent::ReconcileFailed { epoch, start, .. } if *epoch == next.epoch => {
                self.reconcile_failed(&mut next, *start)
            }
            PagingEvent::UpdateHeadChanged { head } => {
                next.db_update_head = *head;
                if next.applied_update_mark.is_none() {
                    next.applied_update_mark = *head;
                }
            }
            PagingEvent::ItemsUpdated { epoch, mark, items } if *epoch == next.epoch => {
                self.items_updated(&mut next, *mark, items)
            }
            // Results of a previous epoch.
            _ => {}
        }
        next
    }

    fn prefetch_next(&self, s: &mut ReconciliationState<T>) {
        match s.reconciliation {
            ReconciliationStatus::EndOfCollection => return,
            ReconciliationStatus::Failed { start } => {
                s.reconciliation = ReconciliationStatus::Reconcile { start };
            }
            ReconciliationStatus::Idle | ReconciliationStatus::Reconcile { .. } => {
                s.requested = s.requested.max(s.visible_len()) + self.page_size;
            }
        }
        self.schedule(s);
    }

    fn reload(&self, s: &mut ReconciliationState<T>) {
        *s = ReconciliationState {
            epoch: s.epoch + 1,
            requested: self.page_size,
            db_update_head: s.db_update_head,
            applied_update_mark: s.db_update_head,
            ..ReconciliationState::default()
        };
        self.schedule(s);
    }

    fn cache_loaded(&self, s: &mut ReconciliationState<T>, start: u64, items: &[T]) {
        if s.cache_lookup != (CacheLookupStatus::Lookup { start }) {
            return;
        }
        if s.reconciliation == ReconciliationStatus::EndOfCollection {
            s.cache_lookup = CacheLookupStatus::Idle;
            return;
        }
        if start != s.visible_len() as u64 {
            // Reconciliation moved the visible end while the read ran.
            s.cache_lookup = CacheLookupStatus::Idle;
            self.schedule(s);
            if s.cache_lookup == CacheLookupStatus::Idle {
                if let Some(failed) = s.pending_failure.take() {
                    self.settle_failure(s, failed);
                }
            }
            return;
        }

        s.provisional_items.extend_from_slice(items);
        s.cache_lookup = if items.len() < self.page_size {
            CacheLookupStatus::Exhausted
        } else {
            CacheLookupStatus::Idle
        };

        if let Some(failed) = s.pending_failure.take() {
            self.settle_failure(s, failed);
        } else if matches!(s.reconciliation, ReconciliationStatus::Failed { .. })
            && s.provisional_items.len() >= self.page_size
        {
            self.promote_cached_page(s);
        }
        self.schedule(s);
    }

    fn reconciled(
        &self,
        s: &mut ReconciliationState<T>,
        start: u64,
        outcome: ReconcileOutcome,
        items: &[T],
    ) {
        if s.reconciliation != (ReconciliationStatus::Reconcile { start })
            || s.pending_failure.is_some()
        {
            return;
        }
        if outcome == ReconcileOutcome::HasMore && items.len() < self.page_size {
            // The stored page shrank after the write; the cursor cannot move.
            self.reconcile_failed(s, start);
            return;
        }
        s.reconciled_items.extend_from_slice(items);
        match outcome {
            ReconcileOutcome::EndOfCollection => {
                s.provisional_items.clear();
                s.reconciliation = ReconciliationStatus::EndOfCollection;
                s.cache_lookup = CacheLookupStatus::Idle;
            }
            ReconcileOutcome::HasMore => {
                let confirmed = self.page_size.min(s.provisional_items.len());
                s.provisional_items.drain(..confirmed);
                s.reconciliation = ReconciliationStatus::Idle;
                self.schedule(s);
            }
        }
    }

    fn reconcile_failed(&self, s: &mut ReconciliationState<T>, start: u64) {
        if s.reconciliation != (ReconciliationStatus::Reconcile { start })
            || s.pending_failure.is_some()
        {
            return;
        }
        if s.provisional_items.len() < self.page_size
            && matches!(s.cache_lookup, CacheLookupStatus::Lookup { .. })
        {
            // The lookup in flight may still fill the page.
            s.pending_failure = Some(start);
            return;
        }
        self.settle_failure(s, start);
    }

    /// Promotes a full cached page in place of the failed one, or fails.
    fn settle_failure(&self, s: &mut ReconciliationState<T>, start: u64) {
        if s.provisional_items.len() >= self.page_size {
            self.promote_cached_page(s);
        } else {
            s.reconciliation = ReconciliationStatus::Failed { start };
        }
    }

    fn items_updated(&self, s: &mut ReconciliationState<T>, mark: u64, items: &[T]) {
        let identity = self.identity;
        for item in items {
            let id = identity(item);
            if let Some(slot) = s
                .reconciled_items
                .iter_mut()
                .chain(s.provisional_items.iter_mut())
                .find(|existing| identity(existing) == id)
            {
                *slot = item.clone();
            }
        }
        s.applied_update_mark = Some(s.applied_update_mark.map_or(mark, |m| m.max(mark)));
    }

    /// Treats the first cached page as reconciled and moves on to the next.
    fn promote_cached_page(&self, s: &mut ReconciliationState<T>) {
        let page: Vec<T> = s.provisional_items.drain(..self.page_size).collect();
        s.reconciled_items.extend(page);
        s.reconciliation = ReconciliationStatus::Reconcile { start: s.cursor() };
    }

    /// Starts cache lookahead and reconciliation where the state calls for it.
    fn schedule(&self, s: &mut ReconciliationState<T>) {
        if s.reconciliation == ReconciliationStatus::EndOfCollection {
            return;
        }
        if s.cache_lookup == CacheLookupStatus::Idle && s.visible_len() < s.requested {
            s.cache_lookup = CacheLookupStatus::Lookup {
                start: s.visible_len() as u64,
            };
        }
        if s.reconciliation == ReconciliationStatus::Idle
            && (s.reconciled_items.len() < s.requested || !s.provisional_items.is_empty())
        {
            s.reconciliation = ReconciliationStatus::Reconcile { start: s.cursor() };
        }
    }
}
