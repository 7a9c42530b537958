use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sideline_core::booking::PaymentStatus;
use sideline_core::payment::{PaymentProcessor, CHARGE_ALREADY_REFUNDED};
use sideline_core::repository::MarketplaceStore;
use sideline_core::CoreResult;
use sideline_shared::models::events::LifecycleEventKind;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::manager::{lifecycle_event, load_booking};

const RECORD_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Issued { refund_id: String },
    /// The processor or our records show the charge was already returned
    AlreadyRefunded { refund_id: Option<String> },
    /// No charge exists for the booking
    NothingCharged,
    /// Left for manual reconciliation
    NotIssued { reason: String },
}

impl RefundOutcome {
    pub fn issued(&self) -> bool {
        matches!(self, RefundOutcome::Issued { .. } | RefundOutcome::AlreadyRefunded { .. })
    }
}

/// Full refunds of a booking's charge. At most one refund per booking reaches the processor.
#[derive(Clone)]
pub struct RefundCoordinator {
    store: Arc<dyn MarketplaceStore>,
    processor: Arc<dyn PaymentProcessor>,
}

impl RefundCoordinator {
    pub fn new(store: Arc<dyn MarketplaceStore>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { store, processor }
    }

    /// Processor failures are reported as `NotIssued`, never as an error.
    pub async fn refund(&self, booking_id: Uuid) -> CoreResult<RefundOutcome> {
        let booking = load_booking(self.store.as_ref(), booking_id).await?;
        if let Some(refund_id) = booking.refund_id {
            return Ok(RefundOutcome::AlreadyRefunded { refund_id: Some(refund_id) });
        }

        let Some(payment_intent_id) = booking.payment_intent_id else {
            if booking.payment_status == PaymentStatus::Pending
                || booking.payment_status == PaymentStatus::Cancelled
            {
                return Ok(RefundOutcome::NothingCharged);
            }
            warn!(%booking_id, "Paid booking has no payment intent; refund needs manual reconciliation");
            return Ok(RefundOutcome::NotIssued {
                reason: "no payment intent on record".to_string(),
            });
        };

        let charge = match self.processor.retrieve_charge(&payment_intent_id).await {
            Ok(Some(charge)) => charge,
            Ok(None) => {
                warn!(%booking_id, %payment_intent_id, "No charge found for payment intent");
                return Ok(RefundOutcome::NothingCharged);
            }
            Err(e) => {
                warn!(%booking_id, error = %e, "Charge lookup failed; refund needs manual reconciliation");
                return Ok(RefundOutcome::NotIssued { reason: e.to_string() });
            }
        };
        if charge.refunded {
            info!(%booking_id, charge_id = %charge.id, "Charge already refunded");
            return Ok(RefundOutcome::AlreadyRefunded { refund_id: None });
        }

        let idempotency_key = format!("refund-{}", booking_id);
        match self.processor.refund_charge(&charge.id, &idempotency_key).await {
            Ok(refund) => {
                info!(%booking_id, refund_id = %refund.id, amount = refund.amount, "Refund issued");
                self.remember_refund(booking_id, &refund.id).await;
                Ok(RefundOutcome::Issued { refund_id: refund.id })
            }
            Err(e) if e.code() == Some(CHARGE_ALREADY_REFUNDED) => {
                info!(%booking_id, charge_id = %charge.id, "Charge already refunded");
                Ok(RefundOutcome::AlreadyRefunded { refund_id: None })
            }
            Err(e) => {
                warn!(%booking_id, error = %e, "Refund failed; needs manual reconciliation");
                Ok(RefundOutcome::NotIssued { reason: e.to_string() })
            }
        }
    }

    /// The money has moved; failing to write it down must not surface as a failed refund.
    async fn remember_refund(&self, booking_id: Uuid, refund_id: &str) {
        for _ in 0..RECORD_ATTEMPTS {
            let mut booking = match load_booking(self.store.as_ref(), booking_id).await {
                Ok(b) => b,
                Err(e) => {
                    error!(%booking_id, %refund_id, error = %e, "Could not load booking to record refund");
                    return;
                }
            };
            if booking.refund_id.is_some() {
                return;
            }
            let now = Utc::now();
            booking.refund_id = Some(refund_id.to_string());
            booking.updated_at = now;
            let effects = [lifecycle_event(&booking, LifecycleEventKind::BookingRefunded, now)];
            match self.store.update_booking(&booking, &effects).await {
                Ok(true) => return,
                Ok(false) => continue,
                Err(e) => {
                    error!(%booking_id, %refund_id, error = %e, "Could not record refund");
                    return;
                }
            }
        }
        error!(%booking_id, %refund_id, "Gave up recording refund after repeated conflicts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fixtures, MockPaymentProcessor};
    use sideline_core::repository::BookingRepository;
    use sideline_store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, Arc<MockPaymentProcessor>, RefundCoordinator, fixtures::Fixture) {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let fx = fixtures::seed(&store).await;
        let refunds = RefundCoordinator::new(store.clone(), processor.clone());
        (store, processor, refunds, fx)
    }

    #[tokio::test]
    async fn test_refund_is_issued_once() {
        let (store, processor, refunds, fx) = setup().await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_r1", "pi_r1").await;
        processor.record_charge("pi_r1", 5000).await;

        let first = refunds.refund(booking.id).await.unwrap();
        assert!(matches!(first, RefundOutcome::Issued { .. }));
        let second = refunds.refund(booking.id).await.unwrap();
        assert!(matches!(second, RefundOutcome::AlreadyRefunded { refund_id: Some(_) }));
        assert!(second.issued());
        assert_eq!(processor.refund_count().await, 1);

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert!(stored.refund_id.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refunds_reach_processor_once() {
        let (store, processor, refunds, fx) = setup().await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_r2", "pi_r2").await;
        processor.record_charge("pi_r2", 5000).await;

        let (a, b) = tokio::join!(refunds.refund(booking.id), refunds.refund(booking.id));
        assert!(a.unwrap().issued());
        assert!(b.unwrap().issued());
        assert_eq!(processor.refund_count().await, 1);
    }

    #[tokio::test]
    async fn test_processor_failure_is_not_issued() {
        let (store, processor, refunds, fx) = setup().await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_r3", "pi_r3").await;
        processor.record_charge("pi_r3", 5000).await;
        processor.set_fail_refunds(true);

        let outcome = refunds.refund(booking.id).await.unwrap();
        assert!(matches!(outcome, RefundOutcome::NotIssued { .. }));
        assert!(!outcome.issued());
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert!(stored.refund_id.is_none());
    }

    #[tokio::test]
    async fn test_unpaid_booking_has_nothing_to_refund() {
        let (store, _processor, refunds, fx) = setup().await;
        let booking = fixtures::pending_booking(&store, &fx.film, "cs_r4").await;
        assert_eq!(refunds.refund(booking.id).await.unwrap(), RefundOutcome::NothingCharged);
    }
}
