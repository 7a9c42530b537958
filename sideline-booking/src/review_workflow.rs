use std::sync::Arc;

use chrono::{DateTime, Utc};
use sideline_core::booking::{Booking, BookingType};
use sideline_core::effects::SideEffect;
use sideline_core::repository::MarketplaceStore;
use sideline_core::{CoreError, CoreResult};
use sideline_shared::models::events::LifecycleEventKind;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::manager::{commit_transition, lifecycle_event, listing_title, load_for_coach};
use crate::notifications;

fn validate_review_url(raw: &str) -> CoreResult<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|_| CoreError::ValidationError("review url must be an absolute URL".to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed.to_string()),
        _ => Err(CoreError::ValidationError(
            "review url must use http or https".to_string(),
        )),
    }
}

/// Coach-driven film review transitions and the deadline sweep
#[derive(Clone)]
pub struct ReviewWorkflow {
    store: Arc<dyn MarketplaceStore>,
}

impl ReviewWorkflow {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    async fn load_film_review(&self, booking_id: Uuid, coach_id: Uuid) -> CoreResult<Booking> {
        let booking = load_for_coach(self.store.as_ref(), booking_id, coach_id).await?;
        if booking.booking_type != BookingType::FilmReview {
            return Err(CoreError::ValidationError(
                "booking is not a film review".to_string(),
            ));
        }
        Ok(booking)
    }

    /// `pending_acceptance -> accepted`; starts the turnaround clock.
    pub async fn accept(&self, booking_id: Uuid, coach_id: Uuid) -> CoreResult<Booking> {
        let mut booking = self.load_film_review(booking_id, coach_id).await?;
        let now = Utc::now();
        let deadline = booking.accept_review(now)?;

        let title = listing_title(self.store.as_ref(), &booking).await;
        let effects = [
            lifecycle_event(&booking, LifecycleEventKind::ReviewAccepted, now),
            SideEffect::EnsureConversation { booking_id },
            notifications::review_accepted(&booking, &title, deadline),
        ];
        commit_transition(self.store.as_ref(), &mut booking, &effects).await?;
        info!(%booking_id, %deadline, "Film review accepted");
        Ok(booking)
    }

    /// `pending_acceptance -> declined`; the buyer is refunded.
    pub async fn decline(&self, booking_id: Uuid, coach_id: Uuid) -> CoreResult<Booking> {
        let mut booking = self.load_film_review(booking_id, coach_id).await?;
        let now = Utc::now();
        booking.decline_review(now)?;

        let title = listing_title(self.store.as_ref(), &booking).await;
        let effects = [
            SideEffect::IssueRefund { booking_id },
            lifecycle_event(&booking, LifecycleEventKind::ReviewDeclined, now),
            notifications::review_declined(&booking, &title),
        ];
        commit_transition(self.store.as_ref(), &mut booking, &effects).await?;
        info!(%booking_id, "Film review declined");
        Ok(booking)
    }

    /// `accepted -> completed` on the review axis and `paid -> completed` on payment.
    pub async fn deliver(&self, booking_id: Uuid, coach_id: Uuid, review_url: &str) -> CoreResult<Booking> {
        let review_url = validate_review_url(review_url)?;
        let mut booking = self.load_film_review(booking_id, coach_id).await?;
        let now = Utc::now();
        booking.deliver_review(review_url.clone(), now)?;

        let title = listing_title(self.store.as_ref(), &booking).await;
        let effects = [
            lifecycle_event(&booking, LifecycleEventKind::ReviewDelivered, now),
            lifecycle_event(&booking, LifecycleEventKind::BookingCompleted, now),
            notifications::review_delivered(&booking, &title, &review_url),
        ];
        commit_transition(self.store.as_ref(), &mut booking, &effects).await?;
        info!(%booking_id, "Film review delivered");
        Ok(booking)
    }

    /// Expires accepted reviews past their deadline and refunds the buyer.
    /// Returns the ids that moved to `expired`.
    pub async fn expire_overdue(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Uuid>> {
        let store = self.store.as_ref();
        let overdue = store.list_overdue_reviews(now, limit).await?;
        let mut expired = Vec::with_capacity(overdue.len());

        for mut booking in overdue {
            if let Err(e) = booking.expire_review(now) {
                debug!(booking_id = %booking.id, error = %e, "Skipped review during expiry sweep");
                continue;
            }
            let title = listing_title(store, &booking).await;
            let mut effects = vec![
                SideEffect::IssueRefund { booking_id: booking.id },
                lifecycle_event(&booking, LifecycleEventKind::ReviewExpired, now),
                notifications::review_expired_buyer(&booking, &title),
            ];
            if let Some(coach) = store.get_coach(booking.coach_id).await? {
                effects.push(notifications::review_expired_coach(&coach, &booking, &title));
            }
            match commit_transition(store, &mut booking, &effects).await {
                Ok(()) => {
                    warn!(booking_id = %booking.id, "Film review expired; refund scheduled");
                    expired.push(booking.id);
                }
                Err(e) if e.is_conflict() => {
                    debug!(booking_id = %booking.id, "Review changed during expiry sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixtures;
    use chrono::Duration;
    use sideline_core::booking::{PaymentStatus, ReviewStatus};
    use sideline_core::repository::BookingRepository;
    use sideline_store::MemoryStore;

    fn refunds_for(tasks: &[sideline_core::effects::OutboxTask], booking_id: Uuid) -> usize {
        tasks
            .iter()
            .filter(|t| t.effect == SideEffect::IssueRefund { booking_id })
            .count()
    }

    #[tokio::test]
    async fn test_accept_sets_deadline_and_bootstraps_conversation() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_a", "pi_a").await;
        let workflow = ReviewWorkflow::new(store.clone());

        let before = Utc::now();
        let accepted = workflow.accept(booking.id, fx.coach.id).await.unwrap();
        let review = accepted.review.clone().unwrap();
        assert_eq!(review.status, ReviewStatus::Accepted);
        let accepted_at = review.accepted_at.unwrap();
        assert!(accepted_at >= before);
        assert_eq!(review.deadline_at.unwrap(), accepted_at + Duration::hours(48));

        let tasks = store.outbox_tasks().await;
        assert!(tasks
            .iter()
            .any(|t| t.effect == SideEffect::EnsureConversation { booking_id: booking.id }));
    }

    #[tokio::test]
    async fn test_accept_twice_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_b", "pi_b").await;
        let workflow = ReviewWorkflow::new(store.clone());

        workflow.accept(booking.id, fx.coach.id).await.unwrap();
        let err = workflow.accept(booking.id, fx.coach.id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_wrong_coach_and_wrong_type() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let film = fixtures::paid_booking(&store, &fx.film, "cs_c", "pi_c").await;
        let lesson = fixtures::paid_booking(&store, &fx.lesson, "cs_d", "pi_d").await;
        let workflow = ReviewWorkflow::new(store.clone());

        let err = workflow.accept(film.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFoundError(_)));
        let err = workflow.accept(lesson.id, fx.coach.id).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_concurrent_declines_refund_once() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_e", "pi_e").await;
        let workflow = ReviewWorkflow::new(store.clone());

        let (a, b) = tokio::join!(
            workflow.decline(booking.id, fx.coach.id),
            workflow.decline(booking.id, fx.coach.id)
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(refunds_for(&store.outbox_tasks().await, booking.id), 1);
    }

    #[tokio::test]
    async fn test_deliver_completes_both_axes() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_f", "pi_f").await;
        let workflow = ReviewWorkflow::new(store.clone());
        workflow.accept(booking.id, fx.coach.id).await.unwrap();

        let err = workflow.deliver(booking.id, fx.coach.id, "ftp://files/review").await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));

        let delivered = workflow
            .deliver(booking.id, fx.coach.id, "https://video.example.com/r/1")
            .await
            .unwrap();
        assert_eq!(delivered.payment_status, PaymentStatus::Completed);
        assert_eq!(delivered.review_status(), Some(ReviewStatus::Completed));
    }

    #[tokio::test]
    async fn test_expiry_sweep_refunds_overdue_reviews_once() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::paid_booking(&store, &fx.film, "cs_g", "pi_g").await;
        let workflow = ReviewWorkflow::new(store.clone());
        workflow.accept(booking.id, fx.coach.id).await.unwrap();

        let early = workflow.expire_overdue(Utc::now(), 10).await.unwrap();
        assert!(early.is_empty());

        let later = Utc::now() + Duration::hours(49);
        assert_eq!(workflow.expire_overdue(later, 10).await.unwrap(), vec![booking.id]);
        assert!(workflow.expire_overdue(later, 10).await.unwrap().is_empty());

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.review_status(), Some(ReviewStatus::Expired));
        assert_eq!(refunds_for(&store.outbox_tasks().await, booking.id), 1);
    }
}
