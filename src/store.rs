//! Storage and collaborator seams used by the engine.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    CharityGoal, CharityId, DonationMode, GoalCompleted, GoalId, GoalUpdate, Purchase, PurchaseId,
    UserId,
};

/// Persistence fault raised by a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("goal {0} not found")]
    GoalNotFound(GoalId),

    #[error("purchase {0} not found")]
    PurchaseNotFound(PurchaseId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("write failed: {0}")]
    Write(String),
}

/// Charity goals of every user.
#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Non-completed goals of `user`, by priority then insertion order.
    async fn list_active_goals(&self, user: UserId) -> Result<Vec<CharityGoal>, StoreError>;

    async fn update_goal(&self, goal: GoalId, update: GoalUpdate) -> Result<(), StoreError>;

    /// Record the charity currently targeted by a priority-mode user.
    async fn set_primary_charity(
        &self,
        user: UserId,
        charity: Option<CharityId>,
    ) -> Result<(), StoreError>;
}

/// Purchases produced by transaction ingestion.
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn find_purchase(&self, purchase: PurchaseId) -> Result<Option<Purchase>, StoreError>;

    /// Flag a purchase as processed for donation. Terminal.
    async fn mark_processed(
        &self,
        purchase: PurchaseId,
        donated_to: Option<CharityId>,
    ) -> Result<(), StoreError>;
}

/// Per-user donation preferences.
#[async_trait]
pub trait PreferenceReader: Send + Sync {
    async fn donation_mode(&self, user: UserId) -> Result<DonationMode, StoreError>;

    async fn is_roundup_enabled(&self, user: UserId) -> Result<bool, StoreError>;

    async fn user_email(&self, user: UserId) -> Result<Option<String>, StoreError>;
}

/// Error reported by a notification channel.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Receives goal completion notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_goal_completed(&self, notice: GoalCompleted) -> Result<(), NotifyError>;
}
