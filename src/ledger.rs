//! Charity ledger rules.
//!
//! Every goal keeps `0 <= current_amount <= goal_amount`, and
//! `is_completed` holds exactly when the goal amount is positive and reached.
//! Active goals of a user carry dense priorities `1..=n`.

use std::collections::HashSet;

use thiserror::Error;

use crate::Money;
use crate::model::{CharityGoal, GoalId, GoalUpdate};

/// Errors raised by ledger maintenance operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("goal {0} not found")]
    GoalNotFound(GoalId),

    #[error("goal {0} listed more than once")]
    DuplicateGoal(GoalId),

    #[error("reorder lists {given} goals but the user has {active} active goals")]
    IncompleteOrder { given: usize, active: usize },

    #[error("goal amount {0} is negative")]
    NegativeGoalAmount(Money),
}

/// Whether `current` satisfies a goal of `goal`.
pub fn is_goal_reached(goal: Money, current: Money) -> bool {
    goal.is_positive() && current >= goal
}

impl CharityGoal {
    /// Amount the goal can still accept.
    pub fn headroom(&self) -> Money {
        if self.current_amount >= self.goal_amount {
            Money::ZERO
        } else {
            self.goal_amount - self.current_amount
        }
    }

    /// Add up to `amount` to the goal and return what was accepted.
    pub fn credit(&mut self, amount: Money) -> Money {
        let accepted = amount.min(self.headroom()).max(Money::ZERO);
        self.current_amount += accepted;
        self.is_completed = is_goal_reached(self.goal_amount, self.current_amount);
        accepted
    }

    /// Change the target, clamping the accumulated amount to it.
    pub fn set_goal_amount(&mut self, goal_amount: Money) -> Result<(), LedgerError> {
        if goal_amount < Money::ZERO {
            return Err(LedgerError::NegativeGoalAmount(goal_amount));
        }
        self.goal_amount = goal_amount;
        self.current_amount = self.current_amount.min(goal_amount);
        self.is_completed = is_goal_reached(self.goal_amount, self.current_amount);
        Ok(())
    }

    /// Restart a goal from zero, making it active again.
    pub fn reset(&mut self) {
        self.current_amount = Money::ZERO;
        self.is_completed = false;
    }

    pub fn update(&self) -> GoalUpdate {
        GoalUpdate {
            current_amount: self.current_amount,
            is_completed: self.is_completed,
        }
    }

    /// Apply a persisted update, keeping the ledger invariants.
    pub fn apply(&mut self, update: GoalUpdate) {
        self.current_amount = update.current_amount.clamp(Money::ZERO, self.goal_amount);
        self.is_completed = is_goal_reached(self.goal_amount, self.current_amount);
    }
}

/// Sort goals in allocation order: priority, then insertion order.
pub fn sort_by_priority(goals: &mut [CharityGoal]) {
    goals.sort_by_key(|goal| (goal.priority, goal.seq));
}

/// Renumber active goals to `1..=n`, keeping their relative order.
/// Completed goals keep their priority but are excluded from the sequence.
pub fn renumber(goals: &mut [CharityGoal]) {
    let mut active: Vec<&mut CharityGoal> = goals.iter_mut().filter(|g| !g.is_completed).collect();
    active.sort_by_key(|goal| (goal.priority, goal.seq));
    for (idx, goal) in active.into_iter().enumerate() {
        goal.priority = idx as u32 + 1;
    }
}

/// Give the active goals the priorities implied by `order`.
///
/// `order` must list every active goal exactly once.
pub fn reorder(goals: &mut [CharityGoal], order: &[GoalId]) -> Result<(), LedgerError> {
    let active = goals.iter().filter(|g| !g.is_completed).count();
    if order.len() != active {
        return Err(LedgerError::IncompleteOrder {
            given: order.len(),
            active,
        });
    }

    let mut seen = HashSet::with_capacity(order.len());
    for id in order {
        if !seen.insert(*id) {
            return Err(LedgerError::DuplicateGoal(*id));
        }
        if !goals.iter().any(|g| g.id == *id && !g.is_completed) {
            return Err(LedgerError::GoalNotFound(*id));
        }
    }

    for (idx, id) in order.iter().enumerate() {
        if let Some(goal) = goals.iter_mut().find(|g| g.id == *id) {
            goal.priority = idx as u32 + 1;
        }
    }
    Ok(())
}
