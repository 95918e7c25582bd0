//! Loop snapshots.

/// A published view of a loop: its state, the event that produced it and
/// whether the loop is still running.
///
/// The initial snapshot carries no event. The terminal snapshot published by
/// [`crate::Loop::close`] keeps the last state and event but has
/// `is_active == false`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<S, E> {
    /// The state after applying `event`.
    pub state: S,
    /// The event that produced this state, if any.
    pub event: Option<E>,
    /// False once the loop has been closed.
    pub is_active: bool,
}

impl<S, E> Snapshot<S, E> {
    /// Creates the initial snapshot of a loop.
    pub fn initial(state: S) -> Self {
        Self {
            state,
            event: None,
            is_active: true,
        }
    }
}
