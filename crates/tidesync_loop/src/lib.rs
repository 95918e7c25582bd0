//! # Tidesync Loop
//!
//! A minimal reactive state-machine runtime.
//!
//! A [`Loop`] is built from an initial state, a pure reducer and a set of
//! [`Effect`]s. Every event, whether sent by a caller or produced by an
//! effect, goes through the same serialized apply path:
//!
//! ```text
//!   send(event) ──► lock ──► reduce(state, event) ──► publish snapshot
//!                                                        │
//!        ┌───────────────────────────────────────────────┘
//!        ▼
//!   effect(snapshots) ──► events ──► send(event)
//! ```
//!
//! ## Key Invariants
//!
//! - No two reducer invocations interleave
//! - Every subscriber observes every snapshot, in order
//! - A new subscriber first receives the latest snapshot
//! - `close()` publishes a final inactive snapshot and cancels all effects
//!
//! ## Example
//!
//! ```rust
//! use tidesync_loop::{Effect, Loop};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let counter = Loop::new("counter", 0u32, |state: &u32, step: &u32| state + step, vec![]);
//! counter.send(2);
//! counter.send(3);
//! assert_eq!(counter.state(), 5);
//! counter.close();
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod effect;
mod machine;
mod snapshot;

pub use effect::{Effect, EventStream, SnapshotStream};
pub use machine::{Loop, LoopSender};
pub use snapshot::Snapshot;
