//! Effects and effect combinators.
//!
//! An effect maps the stream of loop snapshots to a stream of events. The
//! combinators here cover the shapes the paging engine needs: run once on
//! start, restart on every change of a derived key, and run only while a
//! condition holds.

use crate::snapshot::Snapshot;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::borrow::Cow;
use std::sync::Arc;

/// The stream of snapshots an effect observes.
pub type SnapshotStream<S, E> = BoxStream<'static, Snapshot<S, E>>;

/// The stream of events an effect produces.
pub type EventStream<E> = BoxStream<'static, E>;

type Runner<S, E> = Box<dyn FnOnce(SnapshotStream<S, E>) -> EventStream<E> + Send>;

/// A named unit of asynchronous behaviour inside a [`crate::Loop`].
pub struct Effect<S, E> {
    name: Cow<'static, str>,
    run: Runner<S, E>,
}

impl<S, E> std::fmt::Debug for Effect<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect").field("name", &self.name).finish()
    }
}

impl<S, E> Effect<S, E>
where
    S: Clone + Send + 'static,
    E: Send + 'static,
{
    /// Creates an effect from a raw snapshot-to-event mapping.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, run: F) -> Self
    where
        F: FnOnce(SnapshotStream<S, E>) -> EventStream<E> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    /// Returns the effect's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_stream(self, snapshots: SnapshotStream<S, E>) -> EventStream<E> {
        (self.run)(snapshots)
    }

    /// Runs `effect` once, fed the first snapshot's state.
    pub fn when_initialized<F>(name: impl Into<Cow<'static, str>>, effect: F) -> Self
    where
        F: FnOnce(S) -> EventStream<E> + Send + 'static,
    {
        Self::new(name, move |snapshots| {
            let mut effect = Some(effect);
            snapshots
                .take(1)
                .flat_map(move |snapshot| match effect.take() {
                    Some(effect) => effect(snapshot.state),
                    None => stream::empty().boxed(),
                })
                .boxed()
        })
    }

    /// Restarts `effect` whenever `key_of` yields a different key.
    ///
    /// The previous inner effect is cancelled on every change, including a
    /// change to `None`, which starts nothing. At most one inner effect runs
    /// at any time.
    pub fn skipping_repeated<K, KeyFn, F>(
        name: impl Into<Cow<'static, str>>,
        key_of: KeyFn,
        effect: F,
    ) -> Self
    where
        K: Clone + PartialEq + Send + 'static,
        KeyFn: Fn(&S) -> Option<K> + Send + Sync + 'static,
        F: Fn(K) -> EventStream<E> + Send + Sync + 'static,
    {
        Self::new(name, move |snapshots| {
            switch_latest(snapshots, key_of, |previous, next| previous != next, effect)
        })
    }

    /// Starts `effect` with the first non-`None` value after every `None`.
    ///
    /// Changes between two non-`None` values are ignored; a transition back
    /// to `None` cancels the running effect.
    pub fn first_value_after_every_null<T, MapFn, F>(
        name: impl Into<Cow<'static, str>>,
        mapper: MapFn,
        effect: F,
    ) -> Self
    where
        T: Clone + Send + 'static,
        MapFn: Fn(&S) -> Option<T> + Send + Sync + 'static,
        F: Fn(T) -> EventStream<E> + Send + Sync + 'static,
    {
        Self::new(name, move |snapshots| {
            switch_latest(
                snapshots,
                mapper,
                |previous, next| previous.is_some() != next.is_some(),
                effect,
            )
        })
    }

    /// Starts `effect` on every false → true transition of `predicate` and
    /// cancels it on the reverse transition.
    pub fn when_becomes_true<P, F>(name: impl Into<Cow<'static, str>>, predicate: P, effect: F) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
        F: Fn(S) -> EventStream<E> + Send + Sync + 'static,
    {
        Self::first_value_after_every_null(
            name,
            move |state: &S| predicate(state).then(|| state.clone()),
            effect,
        )
    }
}

struct Switch<S, E, T> {
    snapshots: SnapshotStream<S, E>,
    current: Option<T>,
    inner: Option<EventStream<E>>,
    done: bool,
}

/// Maps snapshots to an optional selection and runs the inner effect for the
/// latest selection, replacing it whenever `restart` says so.
fn switch_latest<S, E, T, SelectFn, F>(
    snapshots: SnapshotStream<S, E>,
    select: SelectFn,
    restart: fn(&Option<T>, &Option<T>) -> bool,
    effect: F,
) -> EventStream<E>
where
    S: Send + 'static,
    E: Send + 'static,
    T: Clone + Send + 'static,
    SelectFn: Fn(&S) -> Option<T> + Send + Sync + 'static,
    F: Fn(T) -> EventStream<E> + Send + Sync + 'static,
{
    let select = Arc::new(select);
    let effect = Arc::new(effect);
    let initial = Switch {
        snapshots,
        current: None,
        inner: None,
        done: false,
    };

    stream::unfold(initial, move |mut switch| {
        let select = Arc::clone(&select);
        let effect = Arc::clone(&effect);
        async move {
            loop {
                if switch.done {
                    return None;
                }
                tokio::select! {
                    // Snapshots first: a stale inner effect must be cancelled
                    // before it gets a chance to emit.
                    biased;
                    next = switch.snapshots.next() => match next {
                        Some(snapshot) if snapshot.is_active => {
                            let selected = select(&snapshot.state);
                            if restart(&switch.current, &selected) {
                                switch.inner = selected.clone().map(|value| effect(value));
                                switch.current = selected;
                            }
                        }
                        _ => {
                            switch.inner = None;
                            switch.done = true;
                        }
                    },
                    event = next_inner(&mut switch.inner) => match event {
                        Some(event) => return Some((event, switch)),
                        None => switch.inner = None,
                    },
                }
            }
        }
    })
    .boxed()
}

async fn next_inner<E>(inner: &mut Option<EventStream<E>>) -> Option<E> {
    match inner {
        Some(events) => events.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use crate::{Effect, Loop};
    use futures::{stream, StreamExt};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        SetKey(Option<u32>),
        SetFlag(bool),
        Record(String),
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct St {
        key: Option<u32>,
        flag: bool,
        log: Vec<String>,
    }

    fn reduce(state: &St, event: &Ev) -> St {
        let mut next = state.clone();
        match event {
            Ev::SetKey(key) => next.key = *key,
            Ev::SetFlag(flag) => next.flag = *flag,
            Ev::Record(entry) => next.log.push(entry.clone()),
        }
        next
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn when_initialized_runs_once() {
        let effect = Effect::when_initialized("init", |state: St| {
            stream::once(async move { Ev::Record(format!("init:{:?}", state.key)) }).boxed()
        });
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);
        machine.send(Ev::SetKey(Some(1)));
        settle().await;

        assert_eq!(machine.state().log, vec!["init:None".to_string()]);
    }

    #[tokio::test]
    async fn skipping_repeated_restarts_only_on_key_change() {
        let effect = Effect::skipping_repeated(
            "keyed",
            |state: &St| state.key,
            |key| stream::once(async move { Ev::Record(format!("key:{key}")) }).boxed(),
        );
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);

        machine.send(Ev::SetKey(Some(1)));
        settle().await;
        machine.send(Ev::SetFlag(true));
        machine.send(Ev::SetKey(Some(1)));
        settle().await;
        machine.send(Ev::SetKey(Some(2)));
        settle().await;

        assert_eq!(
            machine.state().log,
            vec!["key:1".to_string(), "key:2".to_string()]
        );
    }

    #[tokio::test]
    async fn skipping_repeated_cancels_previous_effect() {
        let effect = Effect::skipping_repeated(
            "slow",
            |state: &St| state.key,
            |key| {
                stream::once(async move {
                    let delay = if key == 1 { 200 } else { 10 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ev::Record(format!("done:{key}"))
                })
                .boxed()
            },
        );
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);

        machine.send(Ev::SetKey(Some(1)));
        settle().await;
        machine.send(Ev::SetKey(Some(2)));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(machine.state().log, vec!["done:2".to_string()]);
    }

    #[tokio::test]
    async fn change_to_none_cancels_without_restart() {
        let effect = Effect::skipping_repeated(
            "slow",
            |state: &St| state.key,
            |key| {
                stream::once(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ev::Record(format!("done:{key}"))
                })
                .boxed()
            },
        );
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);

        machine.send(Ev::SetKey(Some(7)));
        settle().await;
        machine.send(Ev::SetKey(None));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(machine.state().log.is_empty());
    }

    #[tokio::test]
    async fn when_becomes_true_fires_on_each_rising_edge() {
        let effect = Effect::when_becomes_true(
            "edge",
            |state: &St| state.flag,
            |_state| stream::once(async { Ev::Record("rose".into()) }).boxed(),
        );
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);

        machine.send(Ev::SetFlag(true));
        settle().await;
        // Unrelated changes while true do not re-trigger.
        machine.send(Ev::SetKey(Some(3)));
        machine.send(Ev::SetFlag(true));
        settle().await;
        machine.send(Ev::SetFlag(false));
        machine.send(Ev::SetFlag(true));
        settle().await;

        assert_eq!(machine.state().log, vec!["rose".to_string(), "rose".to_string()]);
    }

    #[tokio::test]
    async fn first_value_after_every_null_keeps_first_value() {
        let effect = Effect::first_value_after_every_null(
            "first",
            |state: &St| state.key,
            |key| stream::once(async move { Ev::Record(format!("first:{key}")) }).boxed(),
        );
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);

        machine.send(Ev::SetKey(Some(4)));
        settle().await;
        machine.send(Ev::SetKey(Some(5)));
        settle().await;
        machine.send(Ev::SetKey(None));
        machine.send(Ev::SetKey(Some(6)));
        settle().await;

        assert_eq!(
            machine.state().log,
            vec!["first:4".to_string(), "first:6".to_string()]
        );
    }

    #[tokio::test]
    async fn closing_cancels_inner_effects() {
        let effect = Effect::skipping_repeated(
            "forever",
            |state: &St| state.key,
            |_key| {
                stream::unfold((), |_| async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Some((Ev::Record("tick".into()), ()))
                })
                .boxed()
            },
        );
        let machine = Loop::new("test", St::default(), reduce, vec![effect]);
        machine.send(Ev::SetKey(Some(1)));
        settle().await;

        machine.close();
        let ticks = machine.state().log.len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(machine.state().log.len(), ticks);
        assert!(!machine.is_active());
    }
}
