use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sideline_core::effects::{OutboxTask, SideEffect};
use sideline_core::notify::{EventSink, NotificationSink};
use sideline_core::payment::PaymentProcessor;
use sideline_core::repository::MarketplaceStore;
use sideline_core::{CoreError, CoreResult};
use tracing::{debug, error, info, warn};

use crate::conversation::ConversationBootstrapper;
use crate::refund::{RefundCoordinator, RefundOutcome};

pub const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: i64 = 2;

/// Delay before retrying a task that has failed `attempts` times
pub fn backoff(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, MAX_ATTEMPTS) as u32;
    Duration::seconds(BASE_BACKOFF_SECS.saturating_pow(exponent))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Runs committed side effects. A failure here never undoes the transition that queued it.
#[derive(Clone)]
pub struct SideEffectExecutor {
    store: Arc<dyn MarketplaceStore>,
    processor: Arc<dyn PaymentProcessor>,
    mailer: Arc<dyn NotificationSink>,
    events: Arc<dyn EventSink>,
    refunds: RefundCoordinator,
    conversations: ConversationBootstrapper,
}

impl SideEffectExecutor {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        processor: Arc<dyn PaymentProcessor>,
        mailer: Arc<dyn NotificationSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            refunds: RefundCoordinator::new(store.clone(), processor.clone()),
            conversations: ConversationBootstrapper::new(store.clone()),
            store,
            processor,
            mailer,
            events,
        }
    }

    pub async fn execute(&self, effect: &SideEffect) -> CoreResult<()> {
        match effect {
            SideEffect::SendEmail { to, subject, html_body, text_body } => self
                .mailer
                .send(to, subject, html_body, text_body)
                .await
                .map_err(|e| CoreError::SideEffectFailure(e.to_string())),
            SideEffect::IssueRefund { booking_id } => match self.refunds.refund(*booking_id).await? {
                RefundOutcome::NotIssued { reason } => Err(CoreError::SideEffectFailure(reason)),
                outcome => {
                    debug!(%booking_id, ?outcome, "Refund effect settled");
                    Ok(())
                }
            },
            SideEffect::EnsureConversation { booking_id } => {
                match self.conversations.ensure_conversation(*booking_id, None).await {
                    Ok(_) => Ok(()),
                    Err(CoreError::BuyerNotRegistered) => {
                        info!(%booking_id, "Buyer has no account yet; conversation deferred to first sign-in");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            SideEffect::PublishEvent { topic, key, payload } => self
                .events
                .publish(topic, key, &payload.to_string())
                .await
                .map_err(|e| CoreError::SideEffectFailure(e.to_string())),
            SideEffect::DiscardMerchantAccount { account_id } => {
                self.processor.delete_account(account_id).await?;
                info!(%account_id, "Discarded duplicate payment account");
                Ok(())
            }
        }
    }

    /// Claims due tasks and runs each once.
    pub async fn run_once(&self, now: DateTime<Utc>, batch_size: i64) -> CoreResult<DrainReport> {
        let tasks = self.store.claim_due(now, batch_size).await?;
        let mut report = DrainReport::default();
        for task in tasks {
            self.settle(&task, now, &mut report).await;
        }
        if report != DrainReport::default() {
            info!(
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                "Outbox drained"
            );
        }
        Ok(report)
    }

    async fn settle(&self, task: &OutboxTask, now: DateTime<Utc>, report: &mut DrainReport) {
        let kind = task.effect.kind();
        let bookkeeping = match self.execute(&task.effect).await {
            Ok(()) => {
                report.delivered += 1;
                self.store.mark_delivered(task.id).await
            }
            Err(e) if task.attempts >= MAX_ATTEMPTS => {
                error!(task_id = %task.id, kind, attempts = task.attempts, error = %e, "Side effect failed permanently");
                report.failed += 1;
                self.store.mark_failed(task.id, &e.to_string()).await
            }
            Err(e) => {
                let retry_at = now + backoff(task.attempts);
                warn!(task_id = %task.id, kind, attempts = task.attempts, %retry_at, error = %e, "Side effect failed; will retry");
                report.retried += 1;
                self.store.reschedule(task.id, &e.to_string(), retry_at).await
            }
        };
        if let Err(e) = bookkeeping {
            error!(task_id = %task.id, error = %e, "Failed updating outbox task");
        }
    }
}
