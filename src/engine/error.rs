//! Error types for round-up allocation.

use thiserror::Error;

use crate::model::{PurchaseId, UserId};
use crate::store::StoreError;

/// Fault returned by [`Engine::allocate`](super::Engine::allocate).
///
/// Business outcomes (disabled round-ups, no active goals, leftovers) are
/// reported through [`AllocationResult`](crate::AllocationResult) instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("user {user}, purchase {purchase}: {source}")]
    Store {
        user: UserId,
        purchase: PurchaseId,
        source: StoreError,
    },

    #[error("engine is missing its {0}")]
    MissingComponent(&'static str),
}

impl EngineError {
    pub(crate) fn store(user: UserId, purchase: PurchaseId) -> impl Fn(StoreError) -> Self + Copy {
        move |source| EngineError::Store {
            user,
            purchase,
            source,
        }
    }
}
