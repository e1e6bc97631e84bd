//! Core domain types for the round-up allocation engine.

use std::fmt;
use std::str::FromStr;

use crate::Money;

/// User identifier.
pub type UserId = u32;

/// Charity goal identifier.
pub type GoalId = u32;

/// Purchase identifier, also the idempotency key for allocation.
pub type PurchaseId = u64;

/// Opaque reference to a charity.
pub type CharityId = String;

/// How a user's round-ups are spread across their charity goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DonationMode {
    /// Fill goals strictly in priority order.
    #[default]
    Priority,
    /// Pick a goal uniformly at random for each increment.
    Random,
}

impl FromStr for DonationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(DonationMode::Priority),
            "random" => Ok(DonationMode::Random),
            other => Err(format!("unknown donation mode '{other}'")),
        }
    }
}

impl fmt::Display for DonationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DonationMode::Priority => f.write_str("priority"),
            DonationMode::Random => f.write_str("random"),
        }
    }
}

/// A user's pledge of a target donation amount to one charity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharityGoal {
    pub id: GoalId,
    pub user: UserId,
    pub charity_id: CharityId,
    pub charity_name: String,
    pub goal_amount: Money,
    pub current_amount: Money,
    /// Dense ordering key among the user's active goals, starting at 1.
    pub priority: u32,
    pub is_completed: bool,
    /// Insertion order, breaks ties between equal priorities.
    pub seq: u64,
}

/// New values for a goal after an allocation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalUpdate {
    pub current_amount: Money,
    pub is_completed: bool,
}

/// A purchase observed by transaction ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub id: PurchaseId,
    pub user: UserId,
    /// Absolute value of the spend.
    pub amount: Money,
    pub processed_for_donation: bool,
    /// First charity that received part of this purchase's round-up.
    pub donated_to_charity_id: Option<CharityId>,
}

impl Purchase {
    /// Create an unprocessed purchase.
    pub fn new(id: PurchaseId, user: UserId, amount: Money) -> Self {
        Self {
            id,
            user,
            amount: amount.abs(),
            processed_for_donation: false,
            donated_to_charity_id: None,
        }
    }
}

/// Input event of the engine: a settled purchase and its round-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEvent {
    pub user: UserId,
    pub purchase: PurchaseId,
    pub roundup: Money,
}

/// Portion of a round-up given to one charity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub goal: GoalId,
    pub charity_id: CharityId,
    pub amount: Money,
}

/// Business outcome of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStatus {
    /// Round-up was distributed (possibly leaving some unallocated).
    Allocated,
    /// The user has no active goals; the purchase was marked processed anyway.
    NoActiveGoals,
    /// The purchase was already processed; nothing changed.
    AlreadyProcessed,
    /// Round-ups are turned off for the user; nothing changed.
    Disabled,
    /// The purchase is unknown to the purchase store; nothing changed.
    PurchaseNotFound,
}

/// Result of [`Engine::allocate`](crate::Engine::allocate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationResult {
    pub status: AllocationStatus,
    /// Allocations in the order they were applied.
    pub allocations: Vec<Allocation>,
    /// Money no goal could absorb, if any.
    pub unallocated: Option<Money>,
    /// First charity that received a non-zero allocation.
    pub primary_charity: Option<CharityId>,
    /// Goals that became completed during this call.
    pub completed_goals: Vec<GoalId>,
}

impl AllocationResult {
    pub(crate) fn outcome(status: AllocationStatus) -> Self {
        Self {
            status,
            allocations: Vec::new(),
            unallocated: None,
            primary_charity: None,
            completed_goals: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(
            self.status,
            AllocationStatus::Disabled | AllocationStatus::PurchaseNotFound
        )
    }

    /// Total placed across all charities.
    pub fn allocated(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// Payload sent when a charity goal is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalCompleted {
    pub user_email: Option<String>,
    pub charity_name: String,
    pub amount: Money,
    pub purchase: PurchaseId,
}
