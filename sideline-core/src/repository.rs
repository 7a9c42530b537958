use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::Booking;
use crate::catalog::{Coach, Listing, Profile};
use crate::effects::{OutboxTask, SideEffect};
use crate::review::Review;
use crate::webhook::WebhookEventRecord;
use crate::CoreResult;

/// Result of a "set payment account if null" write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountClaim {
    /// Our account id is now the coach's account
    Claimed,
    /// Another writer got there first; this is the stored id
    AlreadySet(String),
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> CoreResult<Option<Profile>>;

    async fn find_profile_by_email(&self, email: &str) -> CoreResult<Option<Profile>>;
}

#[async_trait]
pub trait CoachRepository: Send + Sync {
    async fn get_coach(&self, id: Uuid) -> CoreResult<Option<Coach>>;

    /// Conditional write: only sets the account when the coach has none yet.
    async fn set_payment_account_if_unset(
        &self,
        coach_id: Uuid,
        account_id: &str,
    ) -> CoreResult<AccountClaim>;
}

#[async_trait]
pub trait ListingRepository: Send + Sync {
    async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>>;
}

/// Booking persistence. Every mutation is a single conditional write on `version`.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert a new booking together with its side effects
    async fn insert_booking(&self, booking: &Booking, effects: &[SideEffect]) -> CoreResult<()>;

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn find_booking_by_checkout_session(&self, session_id: &str)
        -> CoreResult<Option<Booking>>;

    async fn find_booking_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> CoreResult<Option<Booking>>;

    async fn find_booking_by_meeting(&self, meeting_id: &str) -> CoreResult<Option<Booking>>;

    /// Writes `booking` only if the stored version still equals `booking.version`, bumping it,
    /// and enqueues `effects` in the same write. Returns false when the version moved.
    async fn update_booking(&self, booking: &Booking, effects: &[SideEffect]) -> CoreResult<bool>;

    /// Accepted film reviews whose deadline is at or before `now`
    async fn list_overdue_reviews(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Booking>>;

    /// Bookings still `pending` that were created before `created_before`
    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Booking>>;
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Fails with `ConflictError` when the booking already has a review
    async fn insert_review(&self, review: &Review) -> CoreResult<()>;

    async fn get_review_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<Review>>;
}

#[async_trait]
pub trait WebhookLedger: Send + Sync {
    /// Upsert on the dedup key. Returns true only for the first delivery.
    async fn record_event(&self, record: &WebhookEventRecord) -> CoreResult<bool>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Create the conversation for a booking with its participants and a system message.
    /// Returns the existing conversation id if the booking already has one.
    async fn create_booking_conversation(
        &self,
        booking_id: Uuid,
        participants: &[Uuid],
        system_message: &str,
    ) -> CoreResult<Uuid>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(&self, effects: &[SideEffect]) -> CoreResult<()>;

    /// Claim up to `limit` due tasks, marking them processing and counting the attempt
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<OutboxTask>>;

    async fn mark_delivered(&self, id: Uuid) -> CoreResult<()>;

    /// Back to pending, not before `retry_at`
    async fn reschedule(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> CoreResult<()>;

    /// Parked for operators; never retried automatically
    async fn mark_failed(&self, id: Uuid, error: &str) -> CoreResult<()>;
}

/// Everything the booking core reads and writes
pub trait MarketplaceStore:
    ProfileRepository
    + CoachRepository
    + ListingRepository
    + BookingRepository
    + ReviewRepository
    + WebhookLedger
    + ConversationRepository
    + OutboxRepository
{
}

impl<T> MarketplaceStore for T where
    T: ProfileRepository
        + CoachRepository
        + ListingRepository
        + BookingRepository
        + ReviewRepository
        + WebhookLedger
        + ConversationRepository
        + OutboxRepository
{
}
