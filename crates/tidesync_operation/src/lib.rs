//! # Tidesync Operation
//!
//! A durable, deduplicating queue of asynchronous work with one actor per
//! operation type.
//!
//! ## Lifecycle
//!
//! ```text
//!   enqueue ──► Idle ──► Started ──► Success
//!                ▲                 ├─► Failure   (error digest)
//!                │                 └─► Suspended (needs connectivity)
//!                │                        │
//!                └──── resumption ────────┘
//! ```
//!
//! - Enqueuing with the key of an `Idle` or `Started` row reuses the row and
//!   keeps its input.
//! - Enqueuing with the key of a finished or suspended row recycles it: same
//!   id, new input, back to `Idle`.
//!
//! ## Dispatch
//!
//! Every registered type has a dispatcher that re-queries idle rows after each
//! change notification. New work is recognised by its `last_updated` mark, not
//! by its id, because a recycled row keeps its id. Pickup is a compare-and-set
//! on that mark, so a row is never run twice for the same enqueue.
//!
//! ## Timeouts
//!
//! - **pickup timeout**: [`OperationEngine::execute`] gives up if the row is
//!   still idle, recording a `pickup_timeout` failure
//! - **execution timeout**: the dispatcher aborts a stuck `perform` and
//!   records an `execution_timeout` failure

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod connectivity;
mod definition;
mod dispatcher;
mod engine;
mod error;
mod registry;

pub use config::OperationConfig;
pub use connectivity::Connectivity;
pub use definition::{Actor, ActorError, OperationDefinition};
pub use engine::{Enqueued, OperationEngine};
pub use error::{
    ErrorDigest, OperationError, OperationResult, EXECUTION_TIMEOUT_CODE, INTERNAL_ERROR_CODE,
    PICKUP_TIMEOUT_CODE,
};
pub use registry::ActorRegistry;
