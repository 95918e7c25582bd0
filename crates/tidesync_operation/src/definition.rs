//! Operation definitions and the actor contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Describes one type of operation.
///
/// A definition is a marker type; it names the operation, fixes its input
/// and output types and decides how inputs are deduplicated.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tidesync_operation::OperationDefinition;
///
/// #[derive(Serialize, Deserialize)]
/// struct MarkRead {
///     message_id: String,
/// }
///
/// struct MarkReadDefinition;
///
/// impl OperationDefinition for MarkReadDefinition {
///     const TYPE: &'static str = "mail.mark_read";
///     type Input = MarkRead;
///     type Output = ();
///
///     fn unique_key(input: &MarkRead) -> Option<String> {
///         Some(input.message_id.clone())
///     }
/// }
/// ```
pub trait OperationDefinition: Send + Sync + 'static {
    /// Operation type stored with every row. Must be unique per engine.
    const TYPE: &'static str;

    /// Input of the operation.
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Output of a successful run.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Deduplication key for an input.
    ///
    /// Returning `None` opts out of deduplication: every enqueue creates a
    /// new row under a random key.
    fn unique_key(input: &Self::Input) -> Option<String>;
}

/// How an actor reports that `perform` did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorError {
    /// The operation cannot run now (typically no connectivity). It is parked
    /// as `Suspended` and re-surfaced on resumption.
    #[error("operation needs suspension")]
    NeedsSuspension,

    /// The operation failed. Recorded as `Failure` with this digest.
    #[error("operation failed: {}", message.as_deref().unwrap_or("no message"))]
    Failed {
        /// Machine-readable code.
        code: Option<String>,
        /// Human-readable message.
        message: Option<String>,
    },
}

impl ActorError {
    /// A failure with a message and no code.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            code: None,
            message: Some(message.into()),
        }
    }

    /// A failure with a code and a message.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }
}

/// Performs the work of one operation type.
#[async_trait]
pub trait Actor<D: OperationDefinition>: Send + Sync + 'static {
    /// Optional synchronous fast path consulted by `enqueue`.
    ///
    /// Returning an output completes the call without touching storage.
    fn before_enqueue(&self, input: &D::Input) -> Option<D::Output> {
        let _ = input;
        None
    }

    /// Does the work.
    async fn perform(&self, input: D::Input) -> Result<D::Output, ActorError>;
}
