//! Change notifications and query observation.

use crate::error::StorageResult;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::watch;

/// Receives the store clock value of the latest committed write to a table.
///
/// Notifications coalesce: a slow receiver only sees the newest value.
pub type ChangeReceiver = watch::Receiver<u64>;

/// Re-runs `query` now and after every change notification.
///
/// With a non-zero `throttle`, each notification is followed by a pause
/// before the query runs, so bursts of writes collapse into one result. The
/// stream ends when the store is dropped.
pub fn observe<T, Q>(
    changes: ChangeReceiver,
    throttle: Duration,
    query: Q,
) -> BoxStream<'static, StorageResult<T>>
where
    T: Send + 'static,
    Q: Fn() -> StorageResult<T> + Send + Sync + 'static,
{
    stream::unfold(
        (changes, query, true),
        move |(mut changes, query, first)| async move {
            if !first {
                changes.changed().await.ok()?;
                if !throttle.is_zero() {
                    tokio::time::sleep(throttle).await;
                }
            }
            // Mark everything up to now as seen before querying.
            changes.borrow_and_update();
            let result = query();
            Some((result, (changes, query, false)))
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn emits_initial_result_then_on_change() {
        let (tx, rx) = watch::channel(0u64);
        let counter = Arc::new(AtomicU64::new(0));
        let source = Arc::clone(&counter);

        let mut results = observe(rx, Duration::ZERO, move || {
            Ok(source.load(Ordering::SeqCst))
        });

        assert_eq!(results.next().await.unwrap().unwrap(), 0);

        counter.store(7, Ordering::SeqCst);
        tx.send_replace(1);
        assert_eq!(results.next().await.unwrap().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_coalesces_bursts() {
        let (tx, rx) = watch::channel(0u64);
        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&calls);

        let mut results = observe(rx, Duration::from_millis(100), move || {
            Ok(seen.fetch_add(1, Ordering::SeqCst))
        });
        results.next().await.unwrap().unwrap();

        tx.send_replace(1);
        let pending = tokio::spawn(async move { results.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send_replace(2);
        tx.send_replace(3);

        let second = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ends_when_sender_dropped() {
        let (tx, rx) = watch::channel(0u64);
        let mut results = observe(rx, Duration::ZERO, || Ok(()));
        results.next().await.unwrap().unwrap();

        drop(tx);
        assert!(results.next().await.is_none());
    }
}
