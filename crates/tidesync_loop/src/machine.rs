//! The loop runtime.

use crate::effect::{Effect, EventStream, SnapshotStream};
use crate::snapshot::Snapshot;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Reducer<S, E> = Box<dyn Fn(&S, &E) -> S + Send + Sync>;

struct Core<S, E> {
    snapshot: Snapshot<S, E>,
    subscribers: Vec<UnboundedSender<Snapshot<S, E>>>,
}

/// State shared between the loop handle and its effect tasks.
struct Shared<S, E> {
    name: String,
    reducer: Reducer<S, E>,
    core: Mutex<Core<S, E>>,
}

impl<S, E> Shared<S, E>
where
    S: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Applies one event. Returns false if the loop is closed.
    fn send(&self, event: E) -> bool {
        let mut core = self.core.lock();
        if !core.snapshot.is_active {
            return false;
        }

        let state = (self.reducer)(&core.snapshot.state, &event);
        core.snapshot = Snapshot {
            state,
            event: Some(event),
            is_active: true,
        };

        // Subscribers whose receiver was dropped are pruned here.
        let snapshot = core.snapshot.clone();
        core.subscribers
            .retain(|tx| tx.unbounded_send(snapshot.clone()).is_ok());
        true
    }

    fn subscribe(&self) -> SnapshotStream<S, E> {
        let (tx, rx) = mpsc::unbounded();
        let mut core = self.core.lock();
        // The latest snapshot is replayed first; a closed loop yields only its
        // terminal snapshot.
        let _ = tx.unbounded_send(core.snapshot.clone());
        if core.snapshot.is_active {
            core.subscribers.push(tx);
        }
        rx.boxed()
    }

    fn close(&self) -> bool {
        let mut core = self.core.lock();
        if !core.snapshot.is_active {
            return false;
        }
        core.snapshot.is_active = false;
        let snapshot = core.snapshot.clone();
        for tx in core.subscribers.drain(..) {
            let _ = tx.unbounded_send(snapshot.clone());
        }
        true
    }
}

/// A live, cancellable state machine.
///
/// The loop owns its state exclusively; callers and effects only ever see
/// copies carried by [`Snapshot`]s. Effect tasks are spawned on the ambient
/// tokio runtime when the loop is created, so [`Loop::new`] must be called
/// from within a runtime.
///
/// Dropping the loop closes it.
pub struct Loop<S, E>
where
    S: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    shared: Arc<Shared<S, E>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, E> Loop<S, E>
where
    S: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a loop and starts its effects.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new<R>(name: impl Into<String>, initial: S, reducer: R, effects: Vec<Effect<S, E>>) -> Self
    where
        R: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.into(),
            reducer: Box::new(reducer),
            core: Mutex::new(Core {
                snapshot: Snapshot::initial(initial),
                subscribers: Vec::new(),
            }),
        });

        let tasks = effects
            .into_iter()
            .map(|effect| {
                let effect_name = effect.name().to_string();
                let events = effect.into_stream(shared.subscribe());
                tokio::spawn(drive(Arc::downgrade(&shared), effect_name, events))
            })
            .collect();

        debug!(machine = %shared.name, "loop started");

        Self {
            shared,
            tasks: Mutex::new(tasks),
        }
    }

    /// Returns the loop's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Applies `event` to the current state and publishes the result.
    ///
    /// Events sent after [`Loop::close`] are ignored.
    pub fn send(&self, event: E) {
        if !self.shared.send(event) {
            trace!(machine = %self.shared.name, "event dropped, loop is closed");
        }
    }

    /// Returns a cheap handle that can send events without keeping the loop
    /// alive.
    pub fn sender(&self) -> LoopSender<S, E> {
        LoopSender {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> S {
        self.shared.core.lock().snapshot.state.clone()
    }

    /// Returns a copy of the latest snapshot.
    pub fn snapshot(&self) -> Snapshot<S, E> {
        self.shared.core.lock().snapshot.clone()
    }

    /// Returns true until the loop is closed.
    pub fn is_active(&self) -> bool {
        self.shared.core.lock().snapshot.is_active
    }

    /// Streams the latest snapshot followed by every later one.
    ///
    /// The stream ends after the terminal inactive snapshot.
    pub fn subscribe(&self) -> SnapshotStream<S, E> {
        self.shared.subscribe()
    }

    /// Publishes the terminal snapshot and cancels all running effects.
    ///
    /// Calling `close` more than once has no further effect.
    pub fn close(&self) {
        if self.shared.close() {
            debug!(machine = %self.shared.name, "loop closed");
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl<S, E> Drop for Loop<S, E>
where
    S: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.close();
    }
}

/// A weak sending handle to a [`Loop`].
pub struct LoopSender<S, E> {
    shared: Weak<Shared<S, E>>,
}

impl<S, E> Clone for LoopSender<S, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<S, E> LoopSender<S, E>
where
    S: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Sends an event. Returns false if the loop has been closed or dropped.
    pub fn send(&self, event: E) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.send(event),
            None => false,
        }
    }
}

/// Feeds the events produced by one effect back into the loop.
async fn drive<S, E>(shared: Weak<Shared<S, E>>, effect: String, mut events: EventStream<E>)
where
    S: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    while let Some(event) = events.next().await {
        let Some(strong) = shared.upgrade() else {
            break;
        };
        if !strong.send(event) {
            break;
        }
    }
    trace!(effect = %effect, "effect finished");
}
