use std::sync::Arc;

use chrono::Utc;
use sideline_core::booking::{BookingType, PaymentStatus};
use sideline_core::repository::MarketplaceStore;
use sideline_core::review::{normalize_comment, Rating, Review};
use sideline_core::{CoreError, CoreResult};
use tracing::info;
use uuid::Uuid;

use crate::manager::load_booking;

/// Who is submitting a review
#[derive(Debug, Clone)]
pub struct Rater {
    pub profile_id: Uuid,
    pub verified_email: Option<String>,
}

/// Decides whether a live lesson may be reviewed, and records the review
#[derive(Clone)]
pub struct ReviewGate {
    store: Arc<dyn MarketplaceStore>,
}

impl ReviewGate {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    pub async fn create_review(
        &self,
        booking_id: Uuid,
        rater: &Rater,
        rating: i32,
        comment: Option<String>,
    ) -> CoreResult<Review> {
        let rating = Rating::try_from(rating)?;
        let comment = normalize_comment(comment)?;

        let booking = load_booking(self.store.as_ref(), booking_id).await?;
        if booking.booking_type != BookingType::LiveLesson {
            return Err(CoreError::ValidationError(
                "only live lessons can be reviewed".to_string(),
            ));
        }
        if !booking.is_buyer(rater.profile_id, rater.verified_email.as_deref()) {
            return Err(CoreError::AuthorizationError(
                "only the athlete who booked this lesson can review it".to_string(),
            ));
        }
        if booking.payment_status != PaymentStatus::Completed {
            return Err(CoreError::PreconditionFailed(
                "lesson has not been completed yet".to_string(),
            ));
        }

        let review = Review {
            id: Uuid::new_v4(),
            booking_id,
            coach_id: booking.coach_id,
            rater_profile_id: rater.profile_id,
            rating,
            comment,
            hidden: false,
            hidden_at: None,
            created_at: Utc::now(),
        };
        self.store.insert_review(&review).await?;
        info!(%booking_id, rating = review.rating.value(), "Review recorded");
        Ok(review)
    }
}
