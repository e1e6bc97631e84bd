//! Distribution of a round-up across a user's active goals.

use rand::Rng;

use crate::Money;
use crate::model::{CharityGoal, DonationMode};

/// One allocation: `amount` credited to the goal at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub amount: Money,
}

/// Outcome of distributing one round-up.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Steps in application order. A goal appears at most once.
    pub steps: Vec<Step>,
    /// The goals with every step applied.
    pub goals: Vec<CharityGoal>,
    /// Money that no goal could absorb.
    pub unallocated: Money,
}

/// Distribute `amount` over `goals` (given in priority order).
pub fn plan<R: Rng + ?Sized>(
    mode: DonationMode,
    goals: &[CharityGoal],
    amount: Money,
    rng: &mut R,
) -> Plan {
    let mut goals = goals.to_vec();
    let remaining = amount.max(Money::ZERO);
    let (steps, unallocated) = match mode {
        DonationMode::Priority => fill_in_order(&mut goals, remaining),
        DonationMode::Random => fill_at_random(&mut goals, remaining, rng),
    };
    Plan {
        steps,
        goals,
        unallocated,
    }
}

/// Fill goals in order, cascading into the next one when a goal completes.
fn fill_in_order(goals: &mut [CharityGoal], mut remaining: Money) -> (Vec<Step>, Money) {
    let mut steps = Vec::new();
    for (index, goal) in goals.iter_mut().enumerate() {
        if !remaining.is_positive() {
            break;
        }
        if goal.is_completed || goal.headroom().is_zero() {
            continue;
        }
        let accepted = goal.credit(remaining);
        remaining -= accepted;
        steps.push(Step {
            index,
            amount: accepted,
        });
    }
    (steps, remaining)
}

/// Repeatedly pick a goal with headroom uniformly at random until the money
/// runs out or every goal is full.
fn fill_at_random<R: Rng + ?Sized>(
    goals: &mut [CharityGoal],
    mut remaining: Money,
    rng: &mut R,
) -> (Vec<Step>, Money) {
    let mut working: Vec<usize> = goals
        .iter()
        .enumerate()
        .filter(|(_, g)| !g.is_completed && g.headroom().is_positive())
        .map(|(index, _)| index)
        .collect();

    let mut steps = Vec::new();
    while remaining.is_positive() && !working.is_empty() {
        let pick = rng.gen_range(0..working.len());
        let index = working[pick];
        let goal = &mut goals[index];

        let accepted = goal.credit(remaining);
        remaining -= accepted;
        steps.push(Step {
            index,
            amount: accepted,
        });

        if goal.headroom().is_zero() {
            working.swap_remove(pick);
        }
    }
    (steps, remaining)
}
