//! Background delivery of goal completion notices.
//!
//! Allocation hands notices to a bounded queue drained by a single worker
//! task. Delivery failures are logged and dropped, they never reach the
//! allocation caller.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::model::GoalCompleted;
use crate::store::{Notifier, NotifyError};

pub struct NotificationQueue {
    sender: mpsc::Sender<GoalCompleted>,
    worker: JoinHandle<()>,
}

impl NotificationQueue {
    /// Start the delivery worker. Must be called within a tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<GoalCompleted>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(notice) = receiver.recv().await {
                let purchase = notice.purchase;
                let charity = notice.charity_name.clone();
                if let Err(e) = notifier.notify_goal_completed(notice).await {
                    warn!(
                        purchase,
                        charity = %charity,
                        reason = %e,
                        "goal completion notice not delivered"
                    );
                }
            }
        });

        Self { sender, worker }
    }

    /// Queue a notice without waiting. A full or closed queue drops it.
    pub fn enqueue(&self, notice: GoalCompleted) {
        match self.sender.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                warn!(
                    purchase = notice.purchase,
                    charity = %notice.charity_name,
                    "notification queue full, notice dropped"
                );
            }
            Err(TrySendError::Closed(notice)) => {
                warn!(
                    purchase = notice.purchase,
                    charity = %notice.charity_name,
                    "notification worker stopped, notice dropped"
                );
            }
        }
    }

    /// Deliver everything still queued and stop the worker.
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            warn!(reason = %e, "notification worker failed");
        }
    }
}

/// Notifier writing completions to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_goal_completed(&self, notice: GoalCompleted) -> Result<(), NotifyError> {
        info!(
            email = notice.user_email.as_deref().unwrap_or("-"),
            charity = %notice.charity_name,
            amount = %notice.amount,
            purchase = notice.purchase,
            "charity goal completed"
        );
        Ok(())
    }
}
