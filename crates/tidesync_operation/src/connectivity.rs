//! Network availability signal.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    available: bool,
    /// Number of unavailable -> available transitions so far.
    regained: u64,
}

/// A live "is the network likely available" signal.
///
/// Detection is left to the embedder, which reports changes through
/// [`Connectivity::set_available`]. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<Status>>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    /// Creates a signal with the given initial availability.
    pub fn new(available: bool) -> Self {
        let (tx, _) = watch::channel(Status {
            available,
            regained: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current availability.
    pub fn is_available(&self) -> bool {
        self.tx.borrow().available
    }

    /// Reports a change in availability.
    pub fn set_available(&self, available: bool) {
        self.tx.send_if_modified(|status| {
            if status.available == available {
                return false;
            }
            status.available = available;
            if available {
                status.regained += 1;
            }
            true
        });
    }

    /// Completes on the next unavailable -> available transition after this
    /// call, or when the signal is dropped.
    ///
    /// The returned future starts watching immediately, so a transition that
    /// happens before it is first polled is still observed, even if
    /// availability flips back before the caller wakes.
    pub fn wait_until_regained(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        let seen = rx.borrow_and_update().regained;
        async move {
            while rx.changed().await.is_ok() {
                if rx.borrow_and_update().regained != seen {
                    return;
                }
            }
        }
    }
}
