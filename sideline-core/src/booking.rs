use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::Listing;
use crate::{CoreError, CoreResult};

/// Kind of coaching product a booking was purchased for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingType {
    LiveLesson,
    FilmReview,
}

impl BookingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::LiveLesson => "live_lesson",
            BookingType::FilmReview => "film_review",
        }
    }
}

impl FromStr for BookingType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_lesson" => Ok(BookingType::LiveLesson),
            "film_review" => Ok(BookingType::FilmReview),
            other => Err(CoreError::ValidationError(format!("unknown booking type: {}", other))),
        }
    }
}

impl fmt::Display for BookingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment axis of a booking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
}

/// Every legal move on the payment axis. Anything else is rejected.
pub const PAYMENT_TRANSITIONS: &[(PaymentStatus, PaymentStatus)] = &[
    (PaymentStatus::Pending, PaymentStatus::Paid),
    (PaymentStatus::Paid, PaymentStatus::Completed),
    (PaymentStatus::Pending, PaymentStatus::Cancelled),
];

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        PAYMENT_TRANSITIONS.contains(&(*self, next))
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "completed" => Ok(PaymentStatus::Completed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(CoreError::ValidationError(format!("unknown payment status: {}", other))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review-workflow axis, present only on film-review bookings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    PendingAcceptance,
    Accepted,
    Declined,
    Completed,
    Expired,
}

pub const REVIEW_TRANSITIONS: &[(ReviewStatus, ReviewStatus)] = &[
    (ReviewStatus::PendingAcceptance, ReviewStatus::Accepted),
    (ReviewStatus::PendingAcceptance, ReviewStatus::Declined),
    (ReviewStatus::Accepted, ReviewStatus::Completed),
    (ReviewStatus::Accepted, ReviewStatus::Expired),
];

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::PendingAcceptance => "pending_acceptance",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Declined => "declined",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Expired => "expired",
        }
    }

    pub fn can_transition_to(&self, next: ReviewStatus) -> bool {
        REVIEW_TRANSITIONS.contains(&(*self, next))
    }
}

impl FromStr for ReviewStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_acceptance" => Ok(ReviewStatus::PendingAcceptance),
            "accepted" => Ok(ReviewStatus::Accepted),
            "declined" => Ok(ReviewStatus::Declined),
            "completed" => Ok(ReviewStatus::Completed),
            "expired" => Ok(ReviewStatus::Expired),
            other => Err(CoreError::ValidationError(format!("unknown review status: {}", other))),
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Film-review sub-state. `deadline_at` is only ever written together with `accepted_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilmReviewState {
    pub status: ReviewStatus,
    pub turnaround_hours: i32,
    pub accepted_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub submitted_review_url: Option<String>,
}

/// Who is paying. Guests only have an email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerContact {
    pub profile_id: Option<Uuid>,
    pub email: String,
}

/// A purchased instance of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub coach_id: Uuid,
    pub buyer_profile_id: Option<Uuid>,
    pub buyer_email: String,
    pub booking_type: BookingType,
    /// Minor currency units
    pub amount_paid: i64,
    pub platform_fee: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub review: Option<FilmReviewState>,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub meeting_id: Option<String>,
    pub refund_id: Option<String>,
    pub conversation_id: Option<Uuid>,
    /// Optimistic concurrency token; the store bumps it on every successful update.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A booking in `pending`, created before the buyer is redirected to the payment page.
    /// Listing terms (price, turnaround) are copied so later listing edits cannot change them.
    pub fn new_pending(
        id: Uuid,
        listing: &Listing,
        buyer: BuyerContact,
        platform_fee: i64,
        checkout_session_id: String,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let review = match listing.booking_type {
            BookingType::LiveLesson => None,
            BookingType::FilmReview => {
                let turnaround_hours = listing
                    .turnaround_hours
                    .filter(|h| *h > 0)
                    .ok_or_else(|| {
                        CoreError::ValidationError(
                            "film review listing has no turnaround window".to_string(),
                        )
                    })?;
                Some(FilmReviewState {
                    status: ReviewStatus::PendingAcceptance,
                    turnaround_hours,
                    accepted_at: None,
                    deadline_at: None,
                    submitted_review_url: None,
                })
            }
        };

        Ok(Self {
            id,
            listing_id: listing.id,
            coach_id: listing.coach_id,
            buyer_profile_id: buyer.profile_id,
            buyer_email: buyer.email,
            booking_type: listing.booking_type,
            amount_paid: listing.price_cents,
            platform_fee,
            currency: listing.currency.clone(),
            payment_status: PaymentStatus::Pending,
            review,
            checkout_session_id: Some(checkout_session_id),
            payment_intent_id: None,
            meeting_id: None,
            refund_id: None,
            conversation_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn review_status(&self) -> Option<ReviewStatus> {
        self.review.as_ref().map(|r| r.status)
    }

    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.review.as_ref().and_then(|r| r.deadline_at)
    }

    /// True when the profile (or, for guest checkouts, the verified email) paid for this booking.
    pub fn is_buyer(&self, profile_id: Uuid, verified_email: Option<&str>) -> bool {
        if self.buyer_profile_id == Some(profile_id) {
            return true;
        }
        match verified_email {
            Some(email) => self.buyer_email.eq_ignore_ascii_case(email.trim()),
            None => false,
        }
    }

    /// Move the payment axis, rejecting anything outside `PAYMENT_TRANSITIONS`.
    pub fn transition_payment(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.payment_status.can_transition_to(next) {
            return Err(CoreError::ConflictError(format!(
                "payment status cannot move from {} to {}",
                self.payment_status, next
            )));
        }
        self.payment_status = next;
        self.updated_at = now;
        Ok(())
    }

    fn transition_review(
        &mut self,
        next: ReviewStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<&mut FilmReviewState> {
        let review = self.review.as_mut().ok_or_else(|| {
            CoreError::ValidationError("booking is not a film review".to_string())
        })?;
        if !review.status.can_transition_to(next) {
            return Err(CoreError::ConflictError(format!(
                "review status cannot move from {} to {}",
                review.status, next
            )));
        }
        review.status = next;
        self.updated_at = now;
        Ok(review)
    }

    /// Payment confirmed by the processor.
    pub fn mark_paid(&mut self, payment_intent_id: Option<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition_payment(PaymentStatus::Paid, now)?;
        if payment_intent_id.is_some() {
            self.payment_intent_id = payment_intent_id;
        }
        Ok(())
    }

    /// Live lesson finished (meeting ended). Film reviews complete through `deliver_review`.
    pub fn complete_lesson(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.booking_type != BookingType::LiveLesson {
            return Err(CoreError::ValidationError(
                "only live lessons complete when a meeting ends".to_string(),
            ));
        }
        self.transition_payment(PaymentStatus::Completed, now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition_payment(PaymentStatus::Cancelled, now)
    }

    /// `pending_acceptance -> accepted`. Sets `accepted_at` and `deadline_at` together and
    /// returns the deadline.
    pub fn accept_review(&mut self, now: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        if self.review.is_some() && self.payment_status != PaymentStatus::Paid {
            return Err(CoreError::ConflictError(format!(
                "booking cannot be accepted while payment is {}",
                self.payment_status
            )));
        }
        let review = self.transition_review(ReviewStatus::Accepted, now)?;
        let deadline = now + Duration::hours(i64::from(review.turnaround_hours));
        review.accepted_at = Some(now);
        review.deadline_at = Some(deadline);
        Ok(deadline)
    }

    /// `pending_acceptance -> declined`.
    pub fn decline_review(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.review.is_some() && self.payment_status != PaymentStatus::Paid {
            return Err(CoreError::ConflictError(format!(
                "booking cannot be declined while payment is {}",
                self.payment_status
            )));
        }
        self.transition_review(ReviewStatus::Declined, now)?;
        Ok(())
    }

    /// `accepted -> completed` on the review axis and `paid -> completed` on the payment axis.
    pub fn deliver_review(&mut self, review_url: String, now: DateTime<Utc>) -> CoreResult<()> {
        if self.review_status() == Some(ReviewStatus::Accepted)
            && self.payment_status != PaymentStatus::Paid
        {
            return Err(CoreError::ConflictError(format!(
                "review cannot be delivered while payment is {}",
                self.payment_status
            )));
        }
        let review = self.transition_review(ReviewStatus::Completed, now)?;
        review.submitted_review_url = Some(review_url);
        self.transition_payment(PaymentStatus::Completed, now)
    }

    /// `accepted -> expired`, only once the deadline has passed.
    pub fn expire_review(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.is_overdue(now) {
            return Err(CoreError::ConflictError(
                "review deadline has not passed".to_string(),
            ));
        }
        self.transition_review(ReviewStatus::Expired, now)?;
        Ok(())
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match &self.review {
            Some(review) => {
                review.status == ReviewStatus::Accepted
                    && review.deadline_at.map(|d| d <= now).unwrap_or(false)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn listing(booking_type: BookingType, turnaround_hours: Option<i32>) -> Listing {
        Listing {
            id: Uuid::new_v4(),
            coach_id: Uuid::new_v4(),
            booking_type,
            title: "Pitching mechanics".to_string(),
            price_cents: 7500,
            currency: "usd".to_string(),
            duration_minutes: Some(60),
            turnaround_hours,
            is_active: true,
        }
    }

    fn film_review() -> Booking {
        let now = Utc::now();
        Booking::new_pending(
            Uuid::new_v4(),
            &listing(BookingType::FilmReview, Some(48)),
            BuyerContact { profile_id: None, email: "buyer@example.com".to_string() },
            750,
            "cs_test_1".to_string(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_payment_transition_table() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Paid));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Cancelled));
    }

    #[test]
    fn test_review_transition_table() {
        use ReviewStatus::*;
        let all = [PendingAcceptance, Accepted, Declined, Completed, Expired];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (PendingAcceptance, Accepted)
                        | (PendingAcceptance, Declined)
                        | (Accepted, Completed)
                        | (Accepted, Expired)
                );
                assert_eq!(from.can_transition_to(to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_live_lesson_has_no_review_state() {
        let booking = Booking::new_pending(
            Uuid::new_v4(),
            &listing(BookingType::LiveLesson, None),
            BuyerContact { profile_id: None, email: "buyer@example.com".to_string() },
            0,
            "cs_test_2".to_string(),
            Utc::now(),
        )
        .unwrap();
        assert!(booking.review.is_none());
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_film_review_requires_turnaround() {
        let result = Booking::new_pending(
            Uuid::new_v4(),
            &listing(BookingType::FilmReview, None),
            BuyerContact { profile_id: None, email: "buyer@example.com".to_string() },
            0,
            "cs_test_3".to_string(),
            Utc::now(),
        );
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_accept_sets_deadline_from_turnaround() {
        let mut booking = film_review();
        booking.mark_paid(Some("pi_1".to_string()), Utc::now()).unwrap();
        assert!(booking.deadline_at().is_none());

        let t = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let deadline = booking.accept_review(t).unwrap();

        assert_eq!(deadline, Utc.with_ymd_and_hms(2026, 3, 3, 9, 30, 0).unwrap());
        let review = booking.review.as_ref().unwrap();
        assert_eq!(review.accepted_at, Some(t));
        assert_eq!(review.deadline_at, Some(t + Duration::hours(48)));
    }

    #[test]
    fn test_accept_requires_payment() {
        let mut booking = film_review();
        let err = booking.accept_review(Utc::now()).unwrap_err();
        assert!(err.is_conflict());
        assert!(booking.deadline_at().is_none());
    }

    #[test]
    fn test_decline_requires_payment() {
        let mut booking = film_review();
        let err = booking.decline_review(Utc::now()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(booking.review_status(), Some(ReviewStatus::PendingAcceptance));
    }

    #[test]
    fn test_second_accept_or_decline_conflicts() {
        let mut booking = film_review();
        booking.mark_paid(None, Utc::now()).unwrap();
        booking.decline_review(Utc::now()).unwrap();
        assert!(booking.decline_review(Utc::now()).unwrap_err().is_conflict());
        assert!(booking.accept_review(Utc::now()).unwrap_err().is_conflict());
        assert!(booking.deadline_at().is_none());
    }

    #[test]
    fn test_deliver_moves_both_axes() {
        let mut booking = film_review();
        booking.mark_paid(None, Utc::now()).unwrap();
        booking.accept_review(Utc::now()).unwrap();
        booking
            .deliver_review("https://video.example.com/r/1".to_string(), Utc::now())
            .unwrap();
        assert_eq!(booking.review_status(), Some(ReviewStatus::Completed));
        assert_eq!(booking.payment_status, PaymentStatus::Completed);
    }

    #[test]
    fn test_expire_only_after_deadline() {
        let mut booking = film_review();
        let t = Utc::now();
        booking.mark_paid(None, t).unwrap();
        booking.accept_review(t).unwrap();

        assert!(booking.expire_review(t + Duration::hours(47)).unwrap_err().is_conflict());
        booking.expire_review(t + Duration::hours(48)).unwrap();
        assert_eq!(booking.review_status(), Some(ReviewStatus::Expired));
    }

    #[test]
    fn test_buyer_match_by_profile_or_email() {
        let mut booking = film_review();
        let profile = Uuid::new_v4();
        assert!(booking.is_buyer(profile, Some("Buyer@Example.com")));
        assert!(!booking.is_buyer(profile, None));
        booking.buyer_profile_id = Some(profile);
        assert!(booking.is_buyer(profile, None));
    }

    #[test]
    fn test_live_lesson_rejects_review_transitions() {
        let mut booking = Booking::new_pending(
            Uuid::new_v4(),
            &listing(BookingType::LiveLesson, None),
            BuyerContact { profile_id: None, email: "buyer@example.com".to_string() },
            0,
            "cs_test_4".to_string(),
            Utc::now(),
        )
        .unwrap();
        booking.mark_paid(None, Utc::now()).unwrap();
        assert!(matches!(
            booking.accept_review(Utc::now()),
            Err(CoreError::ValidationError(_))
        ));
        booking.complete_lesson(Utc::now()).unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Completed);
    }
}
