use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sideline_core::booking::{Booking, BookingType, PaymentStatus, ReviewStatus};
use sideline_core::effects::SideEffect;
use sideline_core::repository::MarketplaceStore;
use sideline_core::{CoreError, CoreResult};
use sideline_shared::models::events::{BookingLifecycleEvent, LifecycleEventKind, TOPIC_BOOKINGS};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notifications;

/// Whether a webhook-driven transition changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    AlreadyApplied,
}

/// Caller identity used for read access to a booking
#[derive(Debug, Clone)]
pub struct Viewer {
    pub profile_id: Uuid,
    pub coach_id: Option<Uuid>,
    pub verified_email: Option<String>,
}

impl Viewer {
    pub fn can_view(&self, booking: &Booking) -> bool {
        self.coach_id == Some(booking.coach_id)
            || booking.is_buyer(self.profile_id, self.verified_email.as_deref())
    }
}

/// Read model returned to the coach or buyer
#[derive(Debug, Clone, Serialize)]
pub struct BookingStatusView {
    pub booking_id: Uuid,
    pub listing_id: Uuid,
    pub booking_type: BookingType,
    pub payment_status: PaymentStatus,
    pub review_status: Option<ReviewStatus>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub submitted_review_url: Option<String>,
    pub amount_paid: i64,
    pub currency: String,
    pub meeting_id: Option<String>,
    pub conversation_id: Option<Uuid>,
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Booking> for BookingStatusView {
    fn from(booking: &Booking) -> Self {
        let review = booking.review.as_ref();
        Self {
            booking_id: booking.id,
            listing_id: booking.listing_id,
            booking_type: booking.booking_type,
            payment_status: booking.payment_status,
            review_status: review.map(|r| r.status),
            accepted_at: review.and_then(|r| r.accepted_at),
            deadline_at: review.and_then(|r| r.deadline_at),
            submitted_review_url: review.and_then(|r| r.submitted_review_url.clone()),
            amount_paid: booking.amount_paid,
            currency: booking.currency.clone(),
            meeting_id: booking.meeting_id.clone(),
            conversation_id: booking.conversation_id,
            refunded: booking.refund_id.is_some(),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Lifecycle event for the bookings topic, keyed by booking id
pub fn lifecycle_event(booking: &Booking, kind: LifecycleEventKind, now: DateTime<Utc>) -> SideEffect {
    let event = BookingLifecycleEvent {
        kind,
        booking_id: booking.id,
        coach_id: booking.coach_id,
        listing_id: booking.listing_id,
        payment_status: booking.payment_status.as_str().to_string(),
        review_status: booking.review_status().map(|s| s.as_str().to_string()),
        amount_paid: booking.amount_paid,
        currency: booking.currency.clone(),
        deadline_at: booking.deadline_at(),
        timestamp: now.timestamp(),
    };
    SideEffect::PublishEvent {
        topic: TOPIC_BOOKINGS.to_string(),
        key: booking.id.to_string(),
        payload: serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
    }
}

pub(crate) async fn load_booking(store: &dyn MarketplaceStore, booking_id: Uuid) -> CoreResult<Booking> {
    store
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| CoreError::not_found("booking"))
}

/// Load a booking the coach owns. Other coaches get NotFound, never a hint that it exists.
pub(crate) async fn load_for_coach(
    store: &dyn MarketplaceStore,
    booking_id: Uuid,
    coach_id: Uuid,
) -> CoreResult<Booking> {
    let booking = load_booking(store, booking_id).await?;
    if booking.coach_id != coach_id {
        return Err(CoreError::not_found("booking"));
    }
    Ok(booking)
}

/// Conditional write of a locally transitioned booking plus its effects.
pub(crate) async fn commit_transition(
    store: &dyn MarketplaceStore,
    booking: &mut Booking,
    effects: &[SideEffect],
) -> CoreResult<()> {
    if !store.update_booking(booking, effects).await? {
        return Err(CoreError::ConflictError(
            "booking was modified concurrently".to_string(),
        ));
    }
    booking.version += 1;
    Ok(())
}

pub(crate) async fn listing_title(store: &dyn MarketplaceStore, booking: &Booking) -> String {
    match store.get_listing(booking.listing_id).await {
        Ok(Some(listing)) => listing.title,
        _ => "your session".to_string(),
    }
}

/// Payment-axis transitions driven by checkout, webhooks and sweeps
#[derive(Clone)]
pub struct BookingManager {
    store: Arc<dyn MarketplaceStore>,
}

impl BookingManager {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    pub async fn get_status(&self, booking_id: Uuid, viewer: &Viewer) -> CoreResult<BookingStatusView> {
        let booking = load_booking(self.store.as_ref(), booking_id).await?;
        if !viewer.can_view(&booking) {
            return Err(CoreError::not_found("booking"));
        }
        Ok(BookingStatusView::from(&booking))
    }

    /// `pending -> paid` once the processor confirms the checkout session.
    pub async fn mark_paid(
        &self,
        checkout_session_id: &str,
        payment_intent_id: Option<String>,
        amount_total: Option<i64>,
    ) -> CoreResult<TransitionOutcome> {
        let store = self.store.as_ref();
        let mut booking = store
            .find_booking_by_checkout_session(checkout_session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking for checkout session"))?;

        if let Some(total) = amount_total {
            if total != booking.amount_paid {
                warn!(
                    booking_id = %booking.id,
                    expected = booking.amount_paid,
                    received = total,
                    "Checkout amount differs from booking amount"
                );
            }
        }

        let now = Utc::now();
        match booking.payment_status {
            PaymentStatus::Pending
                if matches!(booking.review_status(), Some(ReviewStatus::Declined | ReviewStatus::Expired)) =>
            {
                return self.refund_late_payment(booking, payment_intent_id).await;
            }
            PaymentStatus::Pending => {}
            PaymentStatus::Cancelled => return self.refund_late_payment(booking, payment_intent_id).await,
            PaymentStatus::Paid | PaymentStatus::Completed => {
                debug!(booking_id = %booking.id, "Payment already recorded");
                return Ok(TransitionOutcome::AlreadyApplied);
            }
        }

        booking.mark_paid(payment_intent_id, now)?;

        let title = listing_title(store, &booking).await;
        let mut effects = vec![
            lifecycle_event(&booking, LifecycleEventKind::BookingPaid, now),
            notifications::payment_received(&booking, &title),
        ];
        if booking.booking_type == BookingType::FilmReview {
            if let Some(coach) = store.get_coach(booking.coach_id).await? {
                effects.push(notifications::new_review_request(&coach, &booking, &title));
            }
        }

        match commit_transition(store, &mut booking, &effects).await {
            Ok(()) => {
                info!(booking_id = %booking.id, amount = booking.amount_paid, "Booking paid");
                Ok(TransitionOutcome::Applied)
            }
            Err(e) if e.is_conflict() => {
                let current = load_booking(store, booking.id).await?;
                if current.payment_status == PaymentStatus::Pending {
                    return Err(e);
                }
                Ok(TransitionOutcome::AlreadyApplied)
            }
            Err(e) => Err(e),
        }
    }

    /// The abandonment sweep may cancel a booking, or its review may be closed, before the
    /// payment lands. The money goes straight back.
    async fn refund_late_payment(
        &self,
        mut booking: Booking,
        payment_intent_id: Option<String>,
    ) -> CoreResult<TransitionOutcome> {
        if booking.payment_intent_id.is_some() || payment_intent_id.is_none() {
            return Ok(TransitionOutcome::AlreadyApplied);
        }
        warn!(
            booking_id = %booking.id,
            payment_status = %booking.payment_status,
            "Payment confirmed for a closed booking; refunding"
        );
        booking.payment_intent_id = payment_intent_id;
        booking.updated_at = Utc::now();
        let effects = [SideEffect::IssueRefund { booking_id: booking.id }];
        commit_transition(self.store.as_ref(), &mut booking, &effects).await?;
        Ok(TransitionOutcome::Applied)
    }

    /// `pending -> cancelled` when the checkout session expires or fails.
    pub async fn cancel_checkout(&self, checkout_session_id: &str) -> CoreResult<TransitionOutcome> {
        let store = self.store.as_ref();
        let mut booking = store
            .find_booking_by_checkout_session(checkout_session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking for checkout session"))?;
        if booking.payment_status != PaymentStatus::Pending {
            return Ok(TransitionOutcome::AlreadyApplied);
        }
        self.cancel_pending(&mut booking, Utc::now()).await?;
        Ok(TransitionOutcome::Applied)
    }

    async fn cancel_pending(&self, booking: &mut Booking, now: DateTime<Utc>) -> CoreResult<()> {
        booking.cancel(now)?;
        let effects = [lifecycle_event(booking, LifecycleEventKind::BookingCancelled, now)];
        commit_transition(self.store.as_ref(), booking, &effects).await?;
        info!(booking_id = %booking.id, "Booking cancelled before payment");
        Ok(())
    }

    /// Cancels bookings left in `pending` for longer than `horizon`. Returns how many moved.
    pub async fn cancel_abandoned(&self, now: DateTime<Utc>, horizon: Duration, limit: i64) -> CoreResult<usize> {
        let stale = self.store.list_stale_pending(now - horizon, limit).await?;
        let mut cancelled = 0;
        for mut booking in stale {
            match self.cancel_pending(&mut booking, now).await {
                Ok(()) => cancelled += 1,
                Err(e) => debug!(booking_id = %booking.id, error = %e, "Skipped abandoned booking"),
            }
        }
        Ok(cancelled)
    }

    /// Coach links the video meeting to a live lesson. Set once; re-sending the same id is a no-op.
    pub async fn attach_meeting(&self, booking_id: Uuid, coach_id: Uuid, meeting_id: &str) -> CoreResult<Booking> {
        let meeting_id = meeting_id.trim();
        if meeting_id.is_empty() {
            return Err(CoreError::ValidationError("meeting id is required".to_string()));
        }
        let store = self.store.as_ref();
        let mut booking = load_for_coach(store, booking_id, coach_id).await?;
        if booking.booking_type != BookingType::LiveLesson {
            return Err(CoreError::ValidationError(
                "meetings can only be attached to live lessons".to_string(),
            ));
        }
        match booking.meeting_id.as_deref() {
            Some(existing) if existing == meeting_id => return Ok(booking),
            Some(_) => {
                return Err(CoreError::ConflictError(
                    "booking already has a meeting".to_string(),
                ))
            }
            None => {}
        }
        if booking.payment_status != PaymentStatus::Paid {
            return Err(CoreError::PreconditionFailed(format!(
                "meeting cannot be attached while payment is {}",
                booking.payment_status
            )));
        }
        booking.meeting_id = Some(meeting_id.to_string());
        booking.updated_at = Utc::now();
        commit_transition(store, &mut booking, &[]).await?;
        Ok(booking)
    }

    /// `paid -> completed` for the live lesson attached to `meeting_id`.
    pub async fn complete_lesson(&self, meeting_id: &str) -> CoreResult<TransitionOutcome> {
        let store = self.store.as_ref();
        let mut booking = store
            .find_booking_by_meeting(meeting_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking for meeting"))?;
        if booking.payment_status == PaymentStatus::Completed {
            return Ok(TransitionOutcome::AlreadyApplied);
        }
        let now = Utc::now();
        booking.complete_lesson(now)?;
        let effects = [lifecycle_event(&booking, LifecycleEventKind::BookingCompleted, now)];
        commit_transition(store, &mut booking, &effects).await?;
        info!(booking_id = %booking.id, meeting_id, "Live lesson completed");
        Ok(TransitionOutcome::Applied)
    }

    /// Records a refund reported by the processor (including ones issued from its dashboard).
    pub async fn record_refund(&self, payment_intent_id: &str, refund_id: Option<String>) -> CoreResult<TransitionOutcome> {
        let store = self.store.as_ref();
        let mut booking = store
            .find_booking_by_payment_intent(payment_intent_id)
            .await?
            .ok_or_else(|| CoreError::not_found("booking for payment intent"))?;
        if booking.refund_id.is_some() {
            return Ok(TransitionOutcome::AlreadyApplied);
        }
        let now = Utc::now();
        booking.refund_id = Some(refund_id.unwrap_or_else(|| format!("external:{}", payment_intent_id)));
        booking.updated_at = now;
        let effects = [lifecycle_event(&booking, LifecycleEventKind::BookingRefunded, now)];
        commit_transition(store, &mut booking, &effects).await?;
        info!(booking_id = %booking.id, "Refund recorded");
        Ok(TransitionOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixtures;
    use sideline_core::effects::SideEffect;
    use sideline_core::repository::BookingRepository;
    use sideline_store::MemoryStore;

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::pending_booking(&store, &fx.lesson, "cs_1").await;
        let manager = BookingManager::new(store.clone());

        let first = manager.mark_paid("cs_1", Some("pi_1".into()), Some(7500)).await.unwrap();
        let second = manager.mark_paid("cs_1", Some("pi_1".into()), Some(7500)).await.unwrap();
        assert_eq!(first, TransitionOutcome::Applied);
        assert_eq!(second, TransitionOutcome::AlreadyApplied);

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_1"));

        let emails = store
            .outbox_tasks()
            .await
            .iter()
            .filter(|t| matches!(t.effect, SideEffect::SendEmail { .. }))
            .count();
        assert_eq!(emails, 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let manager = BookingManager::new(store);
        let err = manager.mark_paid("cs_missing", None, None).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFoundError(_)));
    }

    #[tokio::test]
    async fn test_film_review_payment_notifies_coach() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        fixtures::pending_booking(&store, &fx.film, "cs_film").await;
        let manager = BookingManager::new(store.clone());
        manager.mark_paid("cs_film", Some("pi_film".into()), None).await.unwrap();

        let recipients: Vec<String> = store
            .outbox_tasks()
            .await
            .into_iter()
            .filter_map(|t| match t.effect {
                SideEffect::SendEmail { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert!(recipients.contains(&fx.coach.email));
        assert!(recipients.contains(&"athlete@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_live_lesson_completes_on_meeting_end() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::pending_booking(&store, &fx.lesson, "cs_2").await;
        let manager = BookingManager::new(store.clone());
        manager.mark_paid("cs_2", Some("pi_2".into()), None).await.unwrap();
        manager.attach_meeting(booking.id, fx.coach.id, "mtg-42").await.unwrap();

        assert_eq!(manager.complete_lesson("mtg-42").await.unwrap(), TransitionOutcome::Applied);
        assert_eq!(
            manager.complete_lesson("mtg-42").await.unwrap(),
            TransitionOutcome::AlreadyApplied
        );
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_attach_meeting_rules() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::pending_booking(&store, &fx.lesson, "cs_3").await;
        let manager = BookingManager::new(store.clone());

        let unpaid = manager.attach_meeting(booking.id, fx.coach.id, "m1").await.unwrap_err();
        assert!(matches!(unpaid, CoreError::PreconditionFailed(_)));

        manager.mark_paid("cs_3", None, None).await.unwrap();
        let other_coach = manager.attach_meeting(booking.id, Uuid::new_v4(), "m1").await.unwrap_err();
        assert!(matches!(other_coach, CoreError::NotFoundError(_)));

        manager.attach_meeting(booking.id, fx.coach.id, "m1").await.unwrap();
        manager.attach_meeting(booking.id, fx.coach.id, "m1").await.unwrap();
        let replaced = manager.attach_meeting(booking.id, fx.coach.id, "m2").await.unwrap_err();
        assert!(replaced.is_conflict());
    }

    #[tokio::test]
    async fn test_cancel_abandoned_only_touches_stale_pending() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let now = Utc::now();
        let stale = fixtures::pending_booking(&store, &fx.lesson, "cs_old").await;
        store.backdate_booking(stale.id, now - Duration::hours(30)).await;
        let fresh = fixtures::pending_booking(&store, &fx.lesson, "cs_new").await;

        let manager = BookingManager::new(store.clone());
        let cancelled = manager.cancel_abandoned(now, Duration::hours(24), 50).await.unwrap();
        assert_eq!(cancelled, 1);

        let stale = store.get_booking(stale.id).await.unwrap().unwrap();
        let fresh = store.get_booking(fresh.id).await.unwrap().unwrap();
        assert_eq!(stale.payment_status, PaymentStatus::Cancelled);
        assert_eq!(fresh.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_late_payment_on_cancelled_booking_is_refunded() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::pending_booking(&store, &fx.lesson, "cs_late").await;
        let manager = BookingManager::new(store.clone());
        manager.cancel_checkout("cs_late").await.unwrap();

        let outcome = manager.mark_paid("cs_late", Some("pi_late".into()), None).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Cancelled);
        assert!(store
            .outbox_tasks()
            .await
            .iter()
            .any(|t| t.effect == SideEffect::IssueRefund { booking_id: booking.id }));
    }

    #[tokio::test]
    async fn test_payment_for_declined_review_is_refunded() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let mut booking = fixtures::pending_booking(&store, &fx.film, "cs_m").await;
        if let Some(review) = booking.review.as_mut() {
            review.status = ReviewStatus::Declined;
        }
        assert!(store.update_booking(&booking, &[]).await.unwrap());
        let manager = BookingManager::new(store.clone());

        let outcome = manager.mark_paid("cs_m", Some("pi_m".into()), None).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);
        let again = manager.mark_paid("cs_m", Some("pi_m".into()), None).await.unwrap();
        assert_eq!(again, TransitionOutcome::AlreadyApplied);

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_m"));
        let tasks = store.outbox_tasks().await;
        let refunds = tasks
            .iter()
            .filter(|t| t.effect == SideEffect::IssueRefund { booking_id: booking.id })
            .count();
        assert_eq!(refunds, 1);
        assert!(!tasks.iter().any(|t| matches!(t.effect, SideEffect::SendEmail { .. })));
    }

    #[tokio::test]
    async fn test_status_hidden_from_strangers() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::pending_booking(&store, &fx.lesson, "cs_4").await;
        let manager = BookingManager::new(store.clone());

        let coach = Viewer { profile_id: fx.coach.profile_id, coach_id: Some(fx.coach.id), verified_email: None };
        let buyer = Viewer {
            profile_id: fx.athlete.id,
            coach_id: None,
            verified_email: Some("Athlete@Example.com".into()),
        };
        let stranger = Viewer { profile_id: Uuid::new_v4(), coach_id: None, verified_email: Some("x@example.com".into()) };

        assert_eq!(manager.get_status(booking.id, &coach).await.unwrap().booking_id, booking.id);
        assert_eq!(manager.get_status(booking.id, &buyer).await.unwrap().payment_status, PaymentStatus::Pending);
        let err = manager.get_status(booking.id, &stranger).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFoundError(_)));
    }
}
