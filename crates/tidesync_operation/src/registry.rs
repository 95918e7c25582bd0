//! Actor registry: operation type to type-erased handler.

use crate::codec;
use crate::definition::{Actor, ActorError, OperationDefinition};
use crate::error::{ErrorDigest, OperationResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// What a run of an actor produced, in stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success(Vec<u8>),
    Failure(ErrorDigest),
    Suspended,
}

/// An actor with its input and output types erased to bytes.
#[async_trait]
pub(crate) trait ErasedActor: Send + Sync {
    fn before_enqueue(&self, input: &[u8]) -> OperationResult<Option<Vec<u8>>>;

    async fn perform(&self, input: Vec<u8>) -> Outcome;
}

struct TypedActor<D, A> {
    actor: A,
    _definition: PhantomData<fn() -> D>,
}

#[async_trait]
impl<D, A> ErasedActor for TypedActor<D, A>
where
    D: OperationDefinition,
    A: Actor<D>,
{
    fn before_enqueue(&self, input: &[u8]) -> OperationResult<Option<Vec<u8>>> {
        let input: D::Input = codec::decode(input)?;
        self.actor
            .before_enqueue(&input)
            .map(|output| codec::encode(&output))
            .transpose()
    }

    async fn perform(&self, input: Vec<u8>) -> Outcome {
        let input: D::Input = match codec::decode(&input) {
            Ok(input) => input,
            Err(e) => return Outcome::Failure(ErrorDigest::internal(format!("bad input: {e}"))),
        };
        match self.actor.perform(input).await {
            Ok(output) => match codec::encode(&output) {
                Ok(bytes) => Outcome::Success(bytes),
                Err(e) => Outcome::Failure(ErrorDigest::internal(format!("bad output: {e}"))),
            },
            Err(ActorError::NeedsSuspension) => Outcome::Suspended,
            Err(ActorError::Failed { code, message }) => {
                Outcome::Failure(ErrorDigest::new(code, message))
            }
        }
    }
}

/// Maps operation types to their actors.
///
/// Built once and handed to [`crate::OperationEngine::start`]; the engine
/// starts one dispatcher per registered type.
#[derive(Default)]
pub struct ActorRegistry {
    actors: HashMap<&'static str, Arc<dyn ErasedActor>>,
}

impl std::fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}

impl ActorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the actor for definition `D`, replacing any previous one.
    pub fn register<D, A>(mut self, actor: A) -> Self
    where
        D: OperationDefinition,
        A: Actor<D>,
    {
        let erased = TypedActor::<D, A> {
            actor,
            _definition: PhantomData,
        };
        if self.actors.insert(D::TYPE, Arc::new(erased)).is_some() {
            warn!(op_type = D::TYPE, "actor replaced");
        }
        self
    }

    /// Returns true if an actor handles `op_type`.
    pub fn contains(&self, op_type: &str) -> bool {
        self.actors.contains_key(op_type)
    }

    /// Lists the registered operation types, sorted.
    pub fn op_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.actors.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub(crate) fn get(&self, op_type: &str) -> Option<&Arc<dyn ErasedActor>> {
        self.actors.get(op_type)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn ErasedActor>)> {
        self.actors.iter().map(|(op_type, actor)| (*op_type, actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Square(u32);

    struct SquareDefinition;

    impl OperationDefinition for SquareDefinition {
        const TYPE: &'static str = "math.square";
        type Input = Square;
        type Output = u32;

        fn unique_key(input: &Square) -> Option<String> {
            Some(input.0.to_string())
        }
    }

    struct SquareActor;

    #[async_trait]
    impl Actor<SquareDefinition> for SquareActor {
        fn before_enqueue(&self, input: &Square) -> Option<u32> {
            (input.0 == 0).then_some(0)
        }

        async fn perform(&self, input: Square) -> Result<u32, ActorError> {
            match input.0 {
                13 => Err(ActorError::with_code("unlucky", "thirteen")),
                99 => Err(ActorError::NeedsSuspension),
                n => Ok(n * n),
            }
        }
    }

    fn registry() -> ActorRegistry {
        ActorRegistry::new().register::<SquareDefinition, _>(SquareActor)
    }

    #[tokio::test]
    async fn perform_maps_results_to_outcomes() {
        let registry = registry();
        let actor = registry.get("math.square").unwrap();

        let ok = actor.perform(codec::encode(&Square(3)).unwrap()).await;
        assert_eq!(ok, Outcome::Success(codec::encode(&9u32).unwrap()));

        let failed = actor.perform(codec::encode(&Square(13)).unwrap()).await;
        assert_eq!(
            failed,
            Outcome::Failure(ErrorDigest::new(
                Some("unlucky".into()),
                Some("thirteen".into())
            ))
        );

        let parked = actor.perform(codec::encode(&Square(99)).unwrap()).await;
        assert_eq!(parked, Outcome::Suspended);
    }

    #[tokio::test]
    async fn undecodable_input_is_an_internal_failure() {
        let registry = registry();
        let actor = registry.get("math.square").unwrap();
        match actor.perform(vec![0xff]).await {
            Outcome::Failure(digest) => {
                assert_eq!(digest.code.as_deref(), Some("internal_error"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn before_enqueue_fast_path() {
        let registry = registry();
        let actor = registry.get("math.square").unwrap();
        assert!(actor
            .before_enqueue(&codec::encode(&Square(0)).unwrap())
            .unwrap()
            .is_some());
        assert!(actor
            .before_enqueue(&codec::encode(&Square(2)).unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn lists_registered_types() {
        let registry = registry();
        assert!(registry.contains("math.square"));
        assert!(!registry.contains("math.cube"));
        assert_eq!(registry.op_types(), vec!["math.square"]);
    }
}
