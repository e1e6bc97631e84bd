//! Round-up allocation engine.
//!
//! The engine takes the round-up of a newly observed purchase and spreads it
//! across the user's charity goals, either in priority order or at random.
//! Allocation is serialized per user; different users proceed in parallel.
//! Also supports async stream of purchase events.

use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Money;
use crate::model::{
    Allocation, AllocationResult, AllocationStatus, CharityGoal, DonationMode, GoalCompleted,
    PurchaseEvent, PurchaseId, UserId,
};
use crate::notify::{LogNotifier, NotificationQueue};
use crate::store::{GoalStore, Notifier, PreferenceReader, PurchaseStore, StoreError};

pub mod policy;
use policy::Plan;

mod state;
use state::UserLocks;

mod error;
pub use error::EngineError;

/// The round-up allocation engine.
pub struct Engine {
    goals: Arc<dyn GoalStore>,
    purchases: Arc<dyn PurchaseStore>,
    preferences: Arc<dyn PreferenceReader>,
    notifications: NotificationQueue,
    locks: UserLocks,
    rng: Mutex<StdRng>,
}

/// Public API
impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Run the engine over a stream of purchase events.
    pub async fn run(&self, mut stream: impl Stream<Item = PurchaseEvent> + Unpin) {
        while let Some(event) = stream.next().await {
            // a fault leaves the purchase unprocessed, so the next sync retries it
            let _ = self
                .allocate(event.user, event.purchase, event.roundup)
                .await;
        }
    }

    /// Distribute `roundup` of `purchase` across the goals of `user`.
    ///
    /// Business outcomes are reported in the result. An error means a store
    /// write failed: goal updates already made stay, and the purchase is left
    /// unprocessed so a retry completes the rest.
    pub async fn allocate(
        &self,
        user: UserId,
        purchase: PurchaseId,
        roundup: Money,
    ) -> Result<AllocationResult, EngineError> {
        let result = self.allocate_serialized(user, purchase, roundup).await;
        Self::log_result(user, purchase, roundup, &result);
        result
    }

    /// Deliver pending notifications and stop the engine.
    pub async fn shutdown(self) {
        self.notifications.close().await;
    }
}

/// Private API
impl Engine {
    fn log_result(
        user: UserId,
        purchase: PurchaseId,
        roundup: Money,
        result: &Result<AllocationResult, EngineError>,
    ) {
        match result {
            Ok(outcome) => match outcome.unallocated {
                Some(left) => info!(
                    user,
                    purchase,
                    amount = %roundup,
                    status = ?outcome.status,
                    allocated = %outcome.allocated(),
                    unallocated = %left,
                    "round-up processed"
                ),
                None => info!(
                    user,
                    purchase,
                    amount = %roundup,
                    status = ?outcome.status,
                    allocated = %outcome.allocated(),
                    "round-up processed"
                ),
            },
            Err(e) => warn!(
                user,
                purchase,
                amount = %roundup,
                reason = %e,
                "round-up allocation failed"
            ),
        }
    }

    /// Allocate while holding the user's lock:
    /// - Skip disabled users, unknown, foreign and already processed purchases
    /// - Mark the purchase processed right away when there is no active goal
    /// - Plan the distribution and persist it goal by goal, planning again
    ///   without any goal that disappeared in the meantime
    /// - Queue a notice for every goal that completes
    /// - Move the priority pointer, then mark the purchase processed
    async fn allocate_serialized(
        &self,
        user: UserId,
        purchase: PurchaseId,
        roundup: Money,
    ) -> Result<AllocationResult, EngineError> {
        let _guard = self.locks.acquire(user).await;
        let fault = EngineError::store(user, purchase);

        if !self.preferences.is_roundup_enabled(user).await.map_err(fault)? {
            return Ok(AllocationResult::outcome(AllocationStatus::Disabled));
        }

        let record = self.purchases.find_purchase(purchase).await.map_err(fault)?;
        let Some(record) = record.filter(|record| record.user == user) else {
            return Ok(AllocationResult::outcome(AllocationStatus::PurchaseNotFound));
        };
        if record.processed_for_donation {
            return Ok(AllocationResult::outcome(AllocationStatus::AlreadyProcessed));
        }

        let mut goals = self.goals.list_active_goals(user).await.map_err(fault)?;
        goals.retain(|goal| !goal.is_completed);

        if goals.is_empty() {
            self.purchases
                .mark_processed(purchase, None)
                .await
                .map_err(fault)?;
            let mut result = AllocationResult::outcome(AllocationStatus::NoActiveGoals);
            result.unallocated = Some(roundup);
            return Ok(result);
        }

        let mode = self.preferences.donation_mode(user).await.map_err(fault)?;
        let mut email = None;
        let mut allocations = Vec::new();
        let mut completed_goals = Vec::new();
        let mut remaining = roundup;

        let plan = 'plan: loop {
            let plan = self.plan(mode, &goals, remaining);
            let completes_any = plan
                .steps
                .iter()
                .any(|step| plan.goals[step.index].is_completed);
            if completes_any && email.is_none() {
                email = Some(self.user_email(user).await);
            }

            let mut applied: Vec<usize> = Vec::with_capacity(plan.steps.len());
            for step in &plan.steps {
                let after = &plan.goals[step.index];
                match self.goals.update_goal(after.id, after.update()).await {
                    Ok(()) => {}
                    Err(StoreError::GoalNotFound(goal)) => {
                        // removed since it was listed: keep what was written
                        // and spread the rest over the remaining goals
                        warn!(user, purchase, goal, "goal vanished during allocation");
                        for index in applied {
                            goals[index] = plan.goals[index].clone();
                        }
                        goals.remove(step.index);
                        continue 'plan;
                    }
                    Err(e) => return Err(fault(e)),
                }
                applied.push(step.index);
                remaining -= step.amount;

                allocations.push(Allocation {
                    goal: after.id,
                    charity_id: after.charity_id.clone(),
                    amount: step.amount,
                });

                if after.is_completed && !goals[step.index].is_completed {
                    completed_goals.push(after.id);
                    self.notifications.enqueue(GoalCompleted {
                        user_email: email.clone().flatten(),
                        charity_name: after.charity_name.clone(),
                        amount: after.goal_amount,
                        purchase,
                    });
                }
            }
            break plan;
        };

        if mode == DonationMode::Priority {
            let next = plan
                .goals
                .iter()
                .find(|goal| !goal.is_completed)
                .map(|goal| goal.charity_id.clone());
            self.goals
                .set_primary_charity(user, next)
                .await
                .map_err(fault)?;
        }

        let primary_charity = allocations
            .iter()
            .find(|a| a.amount.is_positive())
            .map(|a| a.charity_id.clone());
        self.purchases
            .mark_processed(purchase, primary_charity.clone())
            .await
            .map_err(fault)?;

        Ok(AllocationResult {
            status: AllocationStatus::Allocated,
            allocations,
            unallocated: remaining.is_positive().then_some(remaining),
            primary_charity,
            completed_goals,
        })
    }

    fn plan(&self, mode: DonationMode, goals: &[CharityGoal], amount: Money) -> Plan {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        policy::plan(mode, goals, amount, &mut *rng)
    }

    /// Email for completion notices. A failed lookup only costs the address.
    async fn user_email(&self, user: UserId) -> Option<String> {
        self.preferences.user_email(user).await.unwrap_or_else(|e| {
            warn!(user, reason = %e, "could not read user email for notices");
            None
        })
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    goals: Option<Arc<dyn GoalStore>>,
    purchases: Option<Arc<dyn PurchaseStore>>,
    preferences: Option<Arc<dyn PreferenceReader>>,
    notifier: Option<Arc<dyn Notifier>>,
    notification_capacity: usize,
    seed: Option<u64>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            goals: None,
            purchases: None,
            preferences: None,
            notifier: None,
            notification_capacity: 64,
            seed: None,
        }
    }
}

impl EngineBuilder {
    /// Use one backend for goals, purchases and preferences.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: GoalStore + PurchaseStore + PreferenceReader + 'static,
    {
        self.goals(store.clone())
            .purchases(store.clone())
            .preferences(store)
    }

    pub fn goals(mut self, goals: Arc<dyn GoalStore>) -> Self {
        self.goals = Some(goals);
        self
    }

    pub fn purchases(mut self, purchases: Arc<dyn PurchaseStore>) -> Self {
        self.purchases = Some(purchases);
        self
    }

    pub fn preferences(mut self, preferences: Arc<dyn PreferenceReader>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Where completion notices go. Defaults to the log.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Seed random-mode selection for reproducible runs.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Construct `Engine`. Must be called within a tokio runtime.
    pub fn build(self) -> Result<Engine, EngineError> {
        let goals = self.goals.ok_or(EngineError::MissingComponent("goal store"))?;
        let purchases = self
            .purchases
            .ok_or(EngineError::MissingComponent("purchase store"))?;
        let preferences = self
            .preferences
            .ok_or(EngineError::MissingComponent("preference reader"))?;
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Engine {
            goals,
            purchases,
            preferences,
            notifications: NotificationQueue::spawn(notifier, self.notification_capacity),
            locks: UserLocks::default(),
            rng: Mutex::new(rng),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, RecordingNotifier, UserProfile};
    use crate::model::{CharityGoal, GoalId, Purchase};
    use crate::store::StoreError;

    // test utils

    fn money(value: f64) -> Money {
        Money::from_float(value)
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        engine: Engine,
    }

    async fn fixture(mode: DonationMode, goals: &[(&str, f64, f64)]) -> Fixture {
        fixture_with(mode, goals, Arc::new(RecordingNotifier::new())).await
    }

    async fn fixture_with(
        mode: DonationMode,
        goals: &[(&str, f64, f64)],
        notifier: Arc<RecordingNotifier>,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut profile = UserProfile::new(1, mode);
        profile.email = Some("ada@example.com".to_string());
        store.add_user(profile).await;

        for (idx, (charity, goal_amount, current)) in goals.iter().enumerate() {
            let goal_amount = money(*goal_amount);
            let current_amount = money(*current);
            store
                .insert_goal(CharityGoal {
                    id: idx as GoalId + 1,
                    user: 1,
                    charity_id: charity.to_string(),
                    charity_name: format!("{charity} fund"),
                    goal_amount,
                    current_amount,
                    priority: idx as u32 + 1,
                    is_completed: false,
                    seq: 0,
                })
                .await
                .unwrap();
        }

        let engine = Engine::builder()
            .store(store.clone())
            .notifier(notifier.clone())
            .seed(Some(7))
            .build()
            .unwrap();

        Fixture {
            store,
            notifier,
            engine,
        }
    }

    impl Fixture {
        async fn purchase(&self, id: PurchaseId, amount: f64) {
            self.store
                .insert_purchase(Purchase::new(id, 1, money(amount)))
                .await;
        }

        async fn current(&self, goal: GoalId) -> Money {
            self.store.goal(goal).await.unwrap().current_amount
        }

        async fn check_invariants(&self) {
            for goal in self.store.goals().await {
                assert!(goal.current_amount >= Money::ZERO);
                assert!(goal.current_amount <= goal.goal_amount);
                assert_eq!(
                    goal.is_completed,
                    goal.goal_amount.is_positive() && goal.current_amount >= goal.goal_amount
                );
            }
        }
    }

    // Priority mode

    #[tokio::test]
    async fn priority_fills_first_goal_then_cascades() {
        let f = fixture(
            DonationMode::Priority,
            &[("water", 1.00, 0.80), ("books", 5.00, 0.00)],
        )
        .await;
        f.purchase(1, 4.50).await;

        let result = f.engine.allocate(1, 1, money(0.50)).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.status, AllocationStatus::Allocated);
        assert_eq!(
            result.allocations,
            vec![
                Allocation {
                    goal: 1,
                    charity_id: "water".into(),
                    amount: money(0.20)
                },
                Allocation {
                    goal: 2,
                    charity_id: "books".into(),
                    amount: money(0.30)
                },
            ]
        );
        assert_eq!(result.unallocated, None);
        assert_eq!(result.primary_charity.as_deref(), Some("water"));
        assert_eq!(result.completed_goals, vec![1]);

        let water = f.store.goal(1).await.unwrap();
        assert_eq!(water.current_amount, money(1.00));
        assert!(water.is_completed);
        assert_eq!(f.current(2).await, money(0.30));
        assert!(!f.store.goal(2).await.unwrap().is_completed);

        let purchase = f.store.purchase(1).await.unwrap();
        assert!(purchase.processed_for_donation);
        assert_eq!(purchase.donated_to_charity_id.as_deref(), Some("water"));
        f.check_invariants().await;
    }

    #[tokio::test]
    async fn priority_moves_primary_charity_pointer() {
        let f = fixture(
            DonationMode::Priority,
            &[("water", 1.00, 0.80), ("books", 5.00, 0.00)],
        )
        .await;
        f.purchase(1, 4.50).await;
        f.engine.allocate(1, 1, money(0.50)).await.unwrap();

        let profile = f.store.user(1).await.unwrap();
        assert_eq!(profile.primary_charity.as_deref(), Some("books"));
    }

    #[tokio::test]
    async fn leftover_is_reported_when_every_goal_fills() {
        let f = fixture(
            DonationMode::Priority,
            &[("water", 1.00, 0.90), ("books", 1.00, 0.95)],
        )
        .await;
        f.purchase(1, 3.01).await;

        let result = f.engine.allocate(1, 1, money(0.99)).await.unwrap();

        assert_eq!(result.allocated(), money(0.15));
        assert_eq!(result.unallocated, Some(money(0.84)));
        assert_eq!(result.completed_goals, vec![1, 2]);
        let profile = f.store.user(1).await.unwrap();
        assert_eq!(profile.primary_charity, None);
        f.check_invariants().await;
    }

    // Random mode

    #[tokio::test]
    async fn random_conserves_money() {
        let f = fixture(
            DonationMode::Random,
            &[("water", 0.30, 0.00), ("books", 0.40, 0.10), ("trees", 2.00, 0.00)],
        )
        .await;

        let mut total = Money::ZERO;
        for (id, amount) in [(1, 0.01), (2, 4.50), (3, 7.00), (4, 0.75), (5, 1.10)] {
            f.purchase(id, amount).await;
            let roundup = crate::calculate_roundup(money(amount));
            let result = f.engine.allocate(1, id, roundup).await.unwrap();

            assert_eq!(
                result.allocated() + result.unallocated.unwrap_or(Money::ZERO),
                roundup
            );
            total += result.allocated();
            f.check_invariants().await;
        }

        let placed: Money = f
            .store
            .goals()
            .await
            .iter()
            .map(|g| g.current_amount)
            .sum();
        assert_eq!(placed, total + money(0.10));
    }

    #[tokio::test]
    async fn random_mode_leaves_primary_pointer_alone() {
        let f = fixture(DonationMode::Random, &[("water", 5.00, 0.00)]).await;
        f.purchase(1, 2.50).await;
        f.engine.allocate(1, 1, money(0.50)).await.unwrap();

        assert_eq!(f.current(1).await, money(0.50));
        assert_eq!(f.store.user(1).await.unwrap().primary_charity, None);
    }

    // Outcomes

    #[tokio::test]
    async fn no_active_goals_marks_purchase_processed() {
        let f = fixture(DonationMode::Priority, &[("water", 1.00, 1.00)]).await;
        f.purchase(1, 2.40).await;

        let result = f.engine.allocate(1, 1, money(0.60)).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.status, AllocationStatus::NoActiveGoals);
        assert!(result.allocations.is_empty());
        assert_eq!(result.unallocated, Some(money(0.60)));
        assert_eq!(result.primary_charity, None);

        let purchase = f.store.purchase(1).await.unwrap();
        assert!(purchase.processed_for_donation);
        assert_eq!(purchase.donated_to_charity_id, None);
    }

    #[tokio::test]
    async fn disabled_user_is_left_untouched() {
        let f = fixture(DonationMode::Priority, &[("water", 5.00, 0.00)]).await;
        f.store.set_roundup_enabled(1, false).await.unwrap();
        f.purchase(1, 2.40).await;

        let result = f.engine.allocate(1, 1, money(0.60)).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.status, AllocationStatus::Disabled);
        assert_eq!(f.current(1).await, Money::ZERO);
        assert!(!f.store.purchase(1).await.unwrap().processed_for_donation);
    }

    #[tokio::test]
    async fn unknown_purchase_is_not_allocated() {
        let f = fixture(DonationMode::Priority, &[("water", 5.00, 0.00)]).await;

        let result = f.engine.allocate(1, 99, money(0.60)).await.unwrap();

        assert_eq!(result.status, AllocationStatus::PurchaseNotFound);
        assert!(!result.is_success());
        assert_eq!(f.current(1).await, Money::ZERO);
    }

    #[tokio::test]
    async fn reprocessing_a_purchase_is_a_noop() {
        let f = fixture(DonationMode::Priority, &[("water", 5.00, 0.00)]).await;
        f.purchase(1, 2.40).await;

        f.engine.allocate(1, 1, money(0.60)).await.unwrap();
        let again = f.engine.allocate(1, 1, money(0.60)).await.unwrap();

        assert!(again.is_success());
        assert_eq!(again.status, AllocationStatus::AlreadyProcessed);
        assert!(again.allocations.is_empty());
        assert_eq!(f.current(1).await, money(0.60));
    }

    #[tokio::test]
    async fn zero_roundup_only_marks_purchase() {
        let f = fixture(DonationMode::Priority, &[("water", 5.00, 0.00)]).await;
        f.purchase(1, 2.40).await;

        let result = f.engine.allocate(1, 1, Money::ZERO).await.unwrap();

        assert_eq!(result.status, AllocationStatus::Allocated);
        assert!(result.allocations.is_empty());
        assert_eq!(result.unallocated, None);
        assert!(f.store.purchase(1).await.unwrap().processed_for_donation);
    }

    #[tokio::test]
    async fn unknown_user_is_a_fault() {
        let f = fixture(DonationMode::Priority, &[]).await;
        let result = f.engine.allocate(42, 1, money(0.60)).await;
        assert!(matches!(
            result,
            Err(EngineError::Store {
                user: 42,
                purchase: 1,
                source: StoreError::UserNotFound(42)
            })
        ));
    }

    // Notifications

    #[tokio::test]
    async fn completion_notifies_once_per_goal() {
        let f = fixture(
            DonationMode::Priority,
            &[("water", 1.00, 0.80), ("books", 0.50, 0.00), ("trees", 5.00, 0.00)],
        )
        .await;
        f.purchase(1, 4.50).await;
        f.purchase(2, 4.50).await;
        f.purchase(3, 4.50).await;

        f.engine.allocate(1, 1, money(0.50)).await.unwrap(); // water done, books 0.30
        f.engine.allocate(1, 2, money(0.50)).await.unwrap(); // books done, trees 0.30
        f.engine.allocate(1, 3, money(0.50)).await.unwrap(); // trees 0.80

        let Fixture {
            notifier, engine, ..
        } = f;
        engine.shutdown().await;

        let sent = notifier.sent().await;
        assert_eq!(
            sent,
            vec![
                GoalCompleted {
                    user_email: Some("ada@example.com".to_string()),
                    charity_name: "water fund".to_string(),
                    amount: money(1.00),
                    purchase: 1,
                },
                GoalCompleted {
                    user_email: Some("ada@example.com".to_string()),
                    charity_name: "books fund".to_string(),
                    amount: money(0.50),
                    purchase: 2,
                },
            ]
        );
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_allocation() {
        let f = fixture_with(
            DonationMode::Priority,
            &[("water", 1.00, 0.80)],
            Arc::new(RecordingNotifier::failing()),
        )
        .await;
        f.purchase(1, 4.50).await;

        let result = f.engine.allocate(1, 1, money(0.50)).await.unwrap();

        assert_eq!(result.completed_goals, vec![1]);
        assert!(f.store.purchase(1).await.unwrap().processed_for_donation);
        let Fixture {
            notifier, engine, ..
        } = f;
        engine.shutdown().await;
        assert_eq!(notifier.sent().await.len(), 1);
    }

    // Persistence faults

    #[tokio::test]
    async fn failed_goal_write_keeps_purchase_retryable() {
        let f = fixture(
            DonationMode::Priority,
            &[("water", 1.00, 0.80), ("books", 5.00, 0.00)],
        )
        .await;
        f.purchase(1, 4.50).await;
        f.store.fail_goal_updates_after(1).await;

        let result = f.engine.allocate(1, 1, money(0.50)).await;
        assert!(matches!(
            result,
            Err(EngineError::Store {
                source: StoreError::Write(_),
                ..
            })
        ));

        // first step committed, second lost, purchase still open
        assert_eq!(f.current(1).await, money(1.00));
        assert_eq!(f.current(2).await, Money::ZERO);
        assert!(!f.store.purchase(1).await.unwrap().processed_for_donation);

        f.store.clear_failures().await;
        let retry = f.engine.allocate(1, 1, money(0.50)).await.unwrap();
        assert_eq!(retry.status, AllocationStatus::Allocated);
        assert_eq!(retry.completed_goals, Vec::<GoalId>::new());
        assert!(f.store.purchase(1).await.unwrap().processed_for_donation);
        assert_eq!(f.current(2).await, money(0.50));

        let Fixture {
            notifier, engine, ..
        } = f;
        engine.shutdown().await;
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_purchase_write_surfaces_error() {
        let f = fixture(DonationMode::Priority, &[("water", 5.00, 0.00)]).await;
        f.purchase(1, 4.50).await;
        f.store.fail_purchase_writes(true).await;

        let result = f.engine.allocate(1, 1, money(0.50)).await;

        assert!(result.is_err());
        assert!(!f.store.purchase(1).await.unwrap().processed_for_donation);
    }

    /// Goal store whose first listed goal is deleted right after listing.
    struct VanishingGoal(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl GoalStore for VanishingGoal {
        async fn list_active_goals(&self, user: UserId) -> Result<Vec<CharityGoal>, StoreError> {
            let goals = self.0.list_active_goals(user).await?;
            if let Some(first) = goals.first() {
                self.0.remove_goal(first.id).await.unwrap();
            }
            Ok(goals)
        }

        async fn update_goal(
            &self,
            goal: GoalId,
            update: crate::model::GoalUpdate,
        ) -> Result<(), StoreError> {
            self.0.update_goal(goal, update).await
        }

        async fn set_primary_charity(
            &self,
            user: UserId,
            charity: Option<crate::model::CharityId>,
        ) -> Result<(), StoreError> {
            self.0.set_primary_charity(user, charity).await
        }
    }

    #[tokio::test]
    async fn removed_goal_is_skipped_and_rest_replanned() {
        let f = fixture(
            DonationMode::Priority,
            &[("water", 1.00, 0.80), ("books", 5.00, 0.00)],
        )
        .await;
        f.purchase(1, 4.50).await;
        let engine = Engine::builder()
            .store(f.store.clone())
            .goals(Arc::new(VanishingGoal(f.store.clone())))
            .notifier(f.notifier.clone())
            .build()
            .unwrap();

        let result = engine.allocate(1, 1, money(0.50)).await.unwrap();

        assert_eq!(result.status, AllocationStatus::Allocated);
        assert_eq!(
            result.allocations,
            vec![Allocation {
                goal: 2,
                charity_id: "books".into(),
                amount: money(0.50)
            }]
        );
        assert_eq!(result.unallocated, None);
        assert_eq!(result.primary_charity.as_deref(), Some("books"));
        assert!(f.store.goal(1).await.is_none());
        assert_eq!(f.current(2).await, money(0.50));
        assert!(f.store.purchase(1).await.unwrap().processed_for_donation);
    }

    #[tokio::test]
    async fn removed_last_goal_leaves_roundup_unallocated() {
        let f = fixture(DonationMode::Random, &[("water", 5.00, 0.00)]).await;
        f.purchase(1, 4.50).await;
        let engine = Engine::builder()
            .store(f.store.clone())
            .goals(Arc::new(VanishingGoal(f.store.clone())))
            .notifier(f.notifier.clone())
            .build()
            .unwrap();

        let result = engine.allocate(1, 1, money(0.50)).await.unwrap();

        assert_eq!(result.status, AllocationStatus::Allocated);
        assert!(result.allocations.is_empty());
        assert_eq!(result.unallocated, Some(money(0.50)));
        assert!(f.store.purchase(1).await.unwrap().processed_for_donation);
    }

    // Concurrency

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_for_one_user_do_not_lose_updates() {
        let f = fixture(DonationMode::Priority, &[("water", 100.00, 0.00)]).await;
        for id in 1..=50 {
            f.purchase(id, 1.50).await;
        }
        let engine = Arc::new(f.engine);

        let mut tasks = tokio::task::JoinSet::new();
        for id in 1..=50 {
            let engine = engine.clone();
            tasks.spawn(async move { engine.allocate(1, id, money(0.50)).await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().is_ok());
        }

        assert_eq!(f.store.goal(1).await.unwrap().current_amount, money(25.00));
    }

    // Async run()

    #[tokio::test]
    async fn run_processes_events_and_skips_faults() {
        let f = fixture(DonationMode::Priority, &[("water", 5.00, 0.00)]).await;
        f.purchase(1, 4.50).await;
        f.purchase(2, 3.25).await;

        let events = vec![
            PurchaseEvent {
                user: 1,
                purchase: 1,
                roundup: money(0.50),
            },
            PurchaseEvent {
                user: 9, // unknown user
                purchase: 5,
                roundup: money(0.10),
            },
            PurchaseEvent {
                user: 1,
                purchase: 2,
                roundup: money(0.75),
            },
        ];
        f.engine.run(tokio_stream::iter(events)).await;

        assert_eq!(f.current(1).await, money(1.25));
    }

    #[tokio::test]
    async fn builder_requires_stores() {
        let result = Engine::builder().build();
        assert!(matches!(
            result,
            Err(EngineError::MissingComponent("goal store"))
        ));
    }
}
