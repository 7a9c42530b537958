//! In-process implementation of every repository trait with the same conditional-write
//! semantics as the Postgres store. Backs the test suites and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use sideline_core::booking::{Booking, PaymentStatus, ReviewStatus};
use sideline_core::catalog::{Coach, Listing, Profile};
use sideline_core::effects::{OutboxStatus, OutboxTask, SideEffect};
use sideline_core::repository::{
    AccountClaim, BookingRepository, CoachRepository, ConversationRepository, ListingRepository,
    OutboxRepository, ProfileRepository, ReviewRepository, WebhookLedger,
};
use sideline_core::review::Review;
use sideline_core::webhook::{WebhookEventKey, WebhookEventRecord};
use sideline_core::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct MemoryConversation {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub participants: Vec<Uuid>,
    pub messages: Vec<String>,
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    coaches: HashMap<Uuid, Coach>,
    listings: HashMap<Uuid, Listing>,
    bookings: HashMap<Uuid, Booking>,
    reviews: HashMap<Uuid, Review>,
    webhook_keys: HashSet<WebhookEventKey>,
    webhook_events: Vec<WebhookEventRecord>,
    conversations: HashMap<Uuid, MemoryConversation>,
    outbox: Vec<OutboxTask>,
}

impl Tables {
    fn push_effects(&mut self, effects: &[SideEffect]) {
        let now = Utc::now();
        self.outbox
            .extend(effects.iter().cloned().map(|e| OutboxTask::new(e, now)));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_profile(&self, profile: Profile) {
        self.tables.lock().await.profiles.insert(profile.id, profile);
    }

    pub async fn insert_coach(&self, coach: Coach) {
        self.tables.lock().await.coaches.insert(coach.id, coach);
    }

    pub async fn insert_listing(&self, listing: Listing) {
        self.tables.lock().await.listings.insert(listing.id, listing);
    }

    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }

    pub async fn webhook_event_count(&self) -> usize {
        self.tables.lock().await.webhook_events.len()
    }

    pub async fn outbox_tasks(&self) -> Vec<OutboxTask> {
        self.tables.lock().await.outbox.clone()
    }

    pub async fn conversation_for_booking(&self, booking_id: Uuid) -> Option<MemoryConversation> {
        self.tables.lock().await.conversations.get(&booking_id).cloned()
    }

    /// Test hook: push a booking's timestamps back in time
    pub async fn backdate_booking(&self, booking_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(booking) = self.tables.lock().await.bookings.get_mut(&booking_id) {
            booking.created_at = created_at;
        }
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn get_profile(&self, id: Uuid) -> CoreResult<Option<Profile>> {
        Ok(self.tables.lock().await.profiles.get(&id).cloned())
    }

    async fn find_profile_by_email(&self, email: &str) -> CoreResult<Option<Profile>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

#[async_trait]
impl CoachRepository for MemoryStore {
    async fn get_coach(&self, id: Uuid) -> CoreResult<Option<Coach>> {
        Ok(self.tables.lock().await.coaches.get(&id).cloned())
    }

    async fn set_payment_account_if_unset(
        &self,
        coach_id: Uuid,
        account_id: &str,
    ) -> CoreResult<AccountClaim> {
        let mut tables = self.tables.lock().await;
        let coach = tables
            .coaches
            .get_mut(&coach_id)
            .ok_or_else(|| CoreError::not_found("coach"))?;
        match &coach.payment_account_id {
            Some(existing) => Ok(AccountClaim::AlreadySet(existing.clone())),
            None => {
                coach.payment_account_id = Some(account_id.to_string());
                Ok(AccountClaim::Claimed)
            }
        }
    }
}

#[async_trait]
impl ListingRepository for MemoryStore {
    async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>> {
        Ok(self.tables.lock().await.listings.get(&id).cloned())
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn insert_booking(&self, booking: &Booking, effects: &[SideEffect]) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.bookings.contains_key(&booking.id) {
            return Err(CoreError::ConflictError(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        tables.bookings.insert(booking.id, booking.clone());
        tables.push_effects(effects);
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.tables.lock().await.bookings.get(&id).cloned())
    }

    async fn find_booking_by_checkout_session(
        &self,
        session_id: &str,
    ) -> CoreResult<Option<Booking>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bookings
            .values()
            .find(|b| b.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn find_booking_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> CoreResult<Option<Booking>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bookings
            .values()
            .find(|b| b.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn find_booking_by_meeting(&self, meeting_id: &str) -> CoreResult<Option<Booking>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bookings
            .values()
            .find(|b| b.meeting_id.as_deref() == Some(meeting_id))
            .cloned())
    }

    async fn update_booking(&self, booking: &Booking, effects: &[SideEffect]) -> CoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let Some(stored) = tables.bookings.get_mut(&booking.id) else {
            return Err(CoreError::not_found("booking"));
        };
        if stored.version != booking.version {
            return Ok(false);
        }
        let mut next = booking.clone();
        next.version = booking.version + 1;
        *stored = next;
        tables.push_effects(effects);
        Ok(true)
    }

    async fn list_overdue_reviews(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Booking>> {
        let tables = self.tables.lock().await;
        let mut overdue: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.review_status() == Some(ReviewStatus::Accepted) && b.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|b| b.deadline_at());
        overdue.truncate(limit.max(0) as usize);
        Ok(overdue)
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Booking>> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.payment_status == PaymentStatus::Pending && b.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}

#[async_trait]
impl ReviewRepository for MemoryStore {
    async fn insert_review(&self, review: &Review) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.reviews.contains_key(&review.booking_id) {
            return Err(CoreError::ConflictError(
                "a review already exists for this booking".to_string(),
            ));
        }
        tables.reviews.insert(review.booking_id, review.clone());
        Ok(())
    }

    async fn get_review_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<Review>> {
        Ok(self.tables.lock().await.reviews.get(&booking_id).cloned())
    }
}

#[async_trait]
impl WebhookLedger for MemoryStore {
    async fn record_event(&self, record: &WebhookEventRecord) -> CoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if !tables.webhook_keys.insert(record.key.clone()) {
            return Ok(false);
        }
        tables.webhook_events.push(record.clone());
        Ok(true)
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create_booking_conversation(
        &self,
        booking_id: Uuid,
        participants: &[Uuid],
        system_message: &str,
    ) -> CoreResult<Uuid> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.conversations.get(&booking_id) {
            return Ok(existing.id);
        }
        let conversation = MemoryConversation {
            id: Uuid::new_v4(),
            booking_id,
            participants: participants.to_vec(),
            messages: vec![system_message.to_string()],
        };
        let id = conversation.id;
        tables.conversations.insert(booking_id, conversation);
        Ok(id)
    }
}

#[async_trait]
impl OutboxRepository for MemoryStore {
    async fn enqueue(&self, effects: &[SideEffect]) -> CoreResult<()> {
        self.tables.lock().await.push_effects(effects);
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<OutboxTask>> {
        let mut tables = self.tables.lock().await;
        let mut claimed = Vec::new();
        for task in tables.outbox.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if task.status == OutboxStatus::Pending && task.available_at <= now {
                task.status = OutboxStatus::Processing;
                task.attempts += 1;
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: Uuid) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(task) = tables.outbox.iter_mut().find(|t| t.id == id) {
            task.status = OutboxStatus::Delivered;
            task.last_error = None;
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(task) = tables.outbox.iter_mut().find(|t| t.id == id) {
            task.status = OutboxStatus::Pending;
            task.available_at = retry_at;
            task.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> CoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(task) = tables.outbox.iter_mut().find(|t| t.id == id) {
            task.status = OutboxStatus::Failed;
            task.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideline_core::booking::{BookingType, BuyerContact};

    fn coach() -> Coach {
        Coach {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            display_name: "Coach Rivera".to_string(),
            email: "rivera@example.com".to_string(),
            payment_account_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_payment_account_first_writer_wins() {
        let store = MemoryStore::new();
        let coach = coach();
        let coach_id = coach.id;
        store.insert_coach(coach).await;

        let first = store.set_payment_account_if_unset(coach_id, "acct_a").await.unwrap();
        let second = store.set_payment_account_if_unset(coach_id, "acct_b").await.unwrap();

        assert_eq!(first, AccountClaim::Claimed);
        assert_eq!(second, AccountClaim::AlreadySet("acct_a".to_string()));
        let stored = store.get_coach(coach_id).await.unwrap().unwrap();
        assert_eq!(stored.payment_account_id.as_deref(), Some("acct_a"));
    }

    #[tokio::test]
    async fn test_update_booking_rejects_stale_version() {
        let store = MemoryStore::new();
        let listing = Listing {
            id: Uuid::new_v4(),
            coach_id: Uuid::new_v4(),
            booking_type: BookingType::LiveLesson,
            title: "Batting".to_string(),
            price_cents: 5000,
            currency: "usd".to_string(),
            duration_minutes: Some(45),
            turnaround_hours: None,
            is_active: true,
        };
        let booking = Booking::new_pending(
            Uuid::new_v4(),
            &listing,
            BuyerContact { profile_id: None, email: "a@example.com".to_string() },
            500,
            "cs_1".to_string(),
            Utc::now(),
        )
        .unwrap();
        store.insert_booking(&booking, &[]).await.unwrap();

        let mut first = booking.clone();
        first.mark_paid(None, Utc::now()).unwrap();
        let mut second = booking.clone();
        second.cancel(Utc::now()).unwrap();

        assert!(store.update_booking(&first, &[]).await.unwrap());
        assert!(!store.update_booking(&second, &[]).await.unwrap());

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_outbox_claim_respects_availability() {
        let store = MemoryStore::new();
        store
            .enqueue(&[SideEffect::IssueRefund { booking_id: Uuid::new_v4() }])
            .await
            .unwrap();
        let now = Utc::now();
        let claimed = store.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        store
            .reschedule(claimed[0].id, "boom", now + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(store.claim_due(now, 10).await.unwrap().is_empty());
        assert_eq!(
            store.claim_due(now + chrono::Duration::seconds(31), 10).await.unwrap().len(),
            1
        );
    }
}
