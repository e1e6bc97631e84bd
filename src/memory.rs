//! In-process implementation of the engine's stores.
//!
//! Backs the simulation binary and the tests. Besides the store traits it
//! exposes the goal maintenance surface (add, remove, reorder, reset) so that
//! priority renumbering always goes through [`ledger`](crate::ledger).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::Money;
use crate::ledger::{self, LedgerError};
use crate::model::{
    CharityGoal, CharityId, DonationMode, GoalCompleted, GoalId, GoalUpdate, Purchase, PurchaseId,
    UserId,
};
use crate::store::{GoalStore, Notifier, NotifyError, PreferenceReader, PurchaseStore, StoreError};

/// Donation preferences and state of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub mode: DonationMode,
    pub roundup_enabled: bool,
    pub email: Option<String>,
    /// Charity currently targeted in priority mode.
    pub primary_charity: Option<CharityId>,
}

impl UserProfile {
    pub fn new(id: UserId, mode: DonationMode) -> Self {
        Self {
            id,
            mode,
            roundup_enabled: true,
            email: None,
            primary_charity: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserProfile>,
    goals: BTreeMap<GoalId, CharityGoal>,
    purchases: HashMap<PurchaseId, Purchase>,
    next_goal: GoalId,
    next_seq: u64,
    /// Remaining goal writes before updates start failing.
    goal_write_budget: Option<usize>,
    fail_purchase_writes: bool,
}

impl Inner {
    fn user_goals(&self, user: UserId) -> Vec<CharityGoal> {
        self.goals.values().filter(|g| g.user == user).cloned().collect()
    }

    fn store_goals(&mut self, goals: Vec<CharityGoal>) {
        for goal in goals {
            self.goals.insert(goal.id, goal);
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Store keeping users, goals and purchases in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, profile: UserProfile) {
        self.inner.write().await.users.insert(profile.id, profile);
    }

    pub async fn user(&self, user: UserId) -> Option<UserProfile> {
        self.inner.read().await.users.get(&user).cloned()
    }

    pub async fn set_roundup_enabled(&self, user: UserId, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let profile = inner.users.get_mut(&user).ok_or(StoreError::UserNotFound(user))?;
        profile.roundup_enabled = enabled;
        Ok(())
    }

    /// Insert existing goals, e.g. when loading data. Loaded priorities only
    /// order each user's active goals, which are then renumbered from 1.
    /// Returns the reasons goals were rejected.
    pub async fn load_goals(
        &self,
        goals: impl IntoIterator<Item = CharityGoal>,
    ) -> Vec<LedgerError> {
        let mut inner = self.inner.write().await;
        let mut rejected = Vec::new();
        let mut users = BTreeSet::new();

        for mut goal in goals {
            if inner.goals.contains_key(&goal.id) {
                rejected.push(LedgerError::DuplicateGoal(goal.id));
                continue;
            }
            if let Err(e) = goal.set_goal_amount(goal.goal_amount) {
                rejected.push(e);
                continue;
            }
            goal.seq = inner.next_seq();
            inner.next_goal = inner.next_goal.max(goal.id);
            users.insert(goal.user);
            inner.goals.insert(goal.id, goal);
        }

        for user in users {
            let mut goals = inner.user_goals(user);
            ledger::renumber(&mut goals);
            inner.store_goals(goals);
        }
        rejected
    }

    /// Insert one existing goal. See [`MemoryStore::load_goals`].
    pub async fn insert_goal(&self, goal: CharityGoal) -> Result<(), LedgerError> {
        match self.load_goals([goal]).await.pop() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Create a goal at the lowest priority among the user's active goals.
    pub async fn add_goal(
        &self,
        user: UserId,
        charity_id: impl Into<CharityId>,
        charity_name: impl Into<String>,
        goal_amount: Money,
    ) -> Result<GoalId, LedgerError> {
        if goal_amount < Money::ZERO {
            return Err(LedgerError::NegativeGoalAmount(goal_amount));
        }

        let mut inner = self.inner.write().await;
        let priority = inner
            .goals
            .values()
            .filter(|g| g.user == user && !g.is_completed)
            .count() as u32
            + 1;
        inner.next_goal += 1;
        let id = inner.next_goal;
        let seq = inner.next_seq();

        let mut goals = inner.user_goals(user);
        goals.push(CharityGoal {
            id,
            user,
            charity_id: charity_id.into(),
            charity_name: charity_name.into(),
            goal_amount,
            current_amount: Money::ZERO,
            priority,
            is_completed: false,
            seq,
        });
        ledger::renumber(&mut goals);
        inner.store_goals(goals);
        Ok(id)
    }

    pub async fn remove_goal(&self, goal: GoalId) -> Result<CharityGoal, LedgerError> {
        let mut inner = self.inner.write().await;
        let removed = inner.goals.remove(&goal).ok_or(LedgerError::GoalNotFound(goal))?;
        let mut goals = inner.user_goals(removed.user);
        ledger::renumber(&mut goals);
        inner.store_goals(goals);
        Ok(removed)
    }

    /// Set the priorities of a user's active goals from `order`.
    pub async fn reorder_goals(&self, user: UserId, order: &[GoalId]) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let mut goals = inner.user_goals(user);
        ledger::reorder(&mut goals, order)?;
        inner.store_goals(goals);
        Ok(())
    }

    /// Restart a goal from zero, appending it after the active goals.
    pub async fn reset_goal(&self, goal: GoalId) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq();
        let target = inner.goals.get_mut(&goal).ok_or(LedgerError::GoalNotFound(goal))?;
        if !target.is_completed {
            target.reset();
            return Ok(());
        }
        target.reset();
        target.priority = u32::MAX;
        target.seq = seq;
        let user = target.user;

        let mut goals = inner.user_goals(user);
        ledger::renumber(&mut goals);
        inner.store_goals(goals);
        Ok(())
    }

    pub async fn goal(&self, goal: GoalId) -> Option<CharityGoal> {
        self.inner.read().await.goals.get(&goal).cloned()
    }

    /// All goals, ordered by id.
    pub async fn goals(&self) -> Vec<CharityGoal> {
        self.inner.read().await.goals.values().cloned().collect()
    }

    /// Register a purchase unless one with the same id exists.
    /// Returns whether it was inserted.
    pub async fn insert_purchase(&self, purchase: Purchase) -> bool {
        let mut inner = self.inner.write().await;
        if inner.purchases.contains_key(&purchase.id) {
            return false;
        }
        inner.purchases.insert(purchase.id, purchase);
        true
    }

    pub async fn purchase(&self, purchase: PurchaseId) -> Option<Purchase> {
        self.inner.read().await.purchases.get(&purchase).cloned()
    }

    /// Let `writes` more goal updates succeed, then fail every later one.
    pub async fn fail_goal_updates_after(&self, writes: usize) {
        self.inner.write().await.goal_write_budget = Some(writes);
    }

    pub async fn fail_purchase_writes(&self, fail: bool) {
        self.inner.write().await.fail_purchase_writes = fail;
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.write().await;
        inner.goal_write_budget = None;
        inner.fail_purchase_writes = false;
    }
}

#[async_trait]
impl GoalStore for MemoryStore {
    async fn list_active_goals(&self, user: UserId) -> Result<Vec<CharityGoal>, StoreError> {
        let inner = self.inner.read().await;
        let mut goals: Vec<_> = inner
            .goals
            .values()
            .filter(|g| g.user == user && !g.is_completed)
            .cloned()
            .collect();
        ledger::sort_by_priority(&mut goals);
        Ok(goals)
    }

    async fn update_goal(&self, goal: GoalId, update: GoalUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(budget) = inner.goal_write_budget.as_mut() {
            if *budget == 0 {
                return Err(StoreError::Write(format!("goal {goal} update rejected")));
            }
            *budget -= 1;
        }
        let target = inner.goals.get_mut(&goal).ok_or(StoreError::GoalNotFound(goal))?;
        let was_completed = target.is_completed;
        target.apply(update);

        // completed goals drop out of the priority sequence
        if target.is_completed && !was_completed {
            let user = target.user;
            let mut goals = inner.user_goals(user);
            ledger::renumber(&mut goals);
            inner.store_goals(goals);
        }
        Ok(())
    }

    async fn set_primary_charity(
        &self,
        user: UserId,
        charity: Option<CharityId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let profile = inner.users.get_mut(&user).ok_or(StoreError::UserNotFound(user))?;
        profile.primary_charity = charity;
        Ok(())
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn find_purchase(&self, purchase: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        Ok(self.inner.read().await.purchases.get(&purchase).cloned())
    }

    async fn mark_processed(
        &self,
        purchase: PurchaseId,
        donated_to: Option<CharityId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.fail_purchase_writes {
            return Err(StoreError::Write(format!("purchase {purchase} update rejected")));
        }
        let target = inner
            .purchases
            .get_mut(&purchase)
            .ok_or(StoreError::PurchaseNotFound(purchase))?;
        target.processed_for_donation = true;
        target.donated_to_charity_id = donated_to;
        Ok(())
    }
}

#[async_trait]
impl PreferenceReader for MemoryStore {
    async fn donation_mode(&self, user: UserId) -> Result<DonationMode, StoreError> {
        let inner = self.inner.read().await;
        let profile = inner.users.get(&user).ok_or(StoreError::UserNotFound(user))?;
        Ok(profile.mode)
    }

    async fn is_roundup_enabled(&self, user: UserId) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        let profile = inner.users.get(&user).ok_or(StoreError::UserNotFound(user))?;
        Ok(profile.roundup_enabled)
    }

    async fn user_email(&self, user: UserId) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        let profile = inner.users.get(&user).ok_or(StoreError::UserNotFound(user))?;
        Ok(profile.email.clone())
    }
}

/// Notifier that keeps every notice it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<GoalCompleted>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records notices but reports every send as failed.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<GoalCompleted> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_goal_completed(&self, notice: GoalCompleted) -> Result<(), NotifyError> {
        let charity = notice.charity_name.clone();
        self.sent.lock().await.push(notice);
        if self.fail {
            return Err(NotifyError(format!("mail server refused notice for {charity}")));
        }
        Ok(())
    }
}
