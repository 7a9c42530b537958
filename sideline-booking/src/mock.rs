use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use sideline_core::notify::{EventSink, NotificationSink, NotifyError};
use sideline_core::payment::{
    AccountStatus, Charge, CheckoutSession, CheckoutSessionRequest, MerchantAccount,
    PaymentProcessor, ProcessorError, Refund, CHARGE_ALREADY_REFUNDED,
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    accounts: HashMap<String, AccountStatus>,
    created_accounts: Vec<String>,
    deleted_accounts: Vec<String>,
    sessions: HashMap<String, CheckoutSessionRequest>,
    charges: HashMap<String, Charge>,
    refunds_by_key: HashMap<String, Refund>,
}

/// In-process payment processor for local runs and tests
#[derive(Default)]
pub struct MockPaymentProcessor {
    state: Mutex<MockState>,
    sequence: AtomicU64,
    charges_enabled_on_create: AtomicBool,
    fail_checkout: AtomicBool,
    fail_refunds: AtomicBool,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_mock_{}", prefix, n)
    }

    /// New accounts come back charge-capable, as if onboarding finished instantly
    pub fn set_charges_enabled_on_create(&self, enabled: bool) {
        self.charges_enabled_on_create.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub async fn register_account(&self, account_id: &str, charges_enabled: bool) {
        self.state.lock().await.accounts.insert(
            account_id.to_string(),
            AccountStatus { charges_enabled, details_submitted: charges_enabled },
        );
    }

    /// Simulate the buyer paying a session. Returns the payment intent id.
    pub async fn complete_session(&self, session_id: &str) -> Option<String> {
        let amount = self.state.lock().await.sessions.get(session_id)?.amount;
        let payment_intent_id = self.next_id("pi");
        self.record_charge(&payment_intent_id, amount).await;
        Some(payment_intent_id)
    }

    pub async fn record_charge(&self, payment_intent_id: &str, amount: i64) {
        let charge = Charge {
            id: self.next_id("ch"),
            payment_intent_id: payment_intent_id.to_string(),
            amount,
            refunded: false,
        };
        self.state.lock().await.charges.insert(payment_intent_id.to_string(), charge);
    }

    pub async fn session(&self, session_id: &str) -> Option<CheckoutSessionRequest> {
        self.state.lock().await.sessions.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn created_accounts(&self) -> Vec<String> {
        self.state.lock().await.created_accounts.clone()
    }

    pub async fn deleted_accounts(&self) -> Vec<String> {
        self.state.lock().await.deleted_accounts.clone()
    }

    /// Distinct refunds actually issued, retries with the same key excluded
    pub async fn refund_count(&self) -> usize {
        self.state.lock().await.refunds_by_key.len()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_account(&self, _coach_id: Uuid, _email: &str) -> Result<MerchantAccount, ProcessorError> {
        // let concurrent callers interleave like real network calls do
        tokio::task::yield_now().await;
        let id = self.next_id("acct");
        let charges_enabled = self.charges_enabled_on_create.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.accounts.insert(
            id.clone(),
            AccountStatus { charges_enabled, details_submitted: charges_enabled },
        );
        state.created_accounts.push(id.clone());
        Ok(MerchantAccount { id, charges_enabled, details_submitted: charges_enabled })
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), ProcessorError> {
        let mut state = self.state.lock().await;
        state.accounts.remove(account_id);
        state.deleted_accounts.push(account_id.to_string());
        Ok(())
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        _refresh_url: &str,
        return_url: &str,
    ) -> Result<String, ProcessorError> {
        Ok(format!("https://connect.mock/setup/{}?return={}", account_id, return_url))
    }

    async fn account_status(&self, account_id: &str) -> Result<AccountStatus, ProcessorError> {
        self.state
            .lock()
            .await
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| ProcessorError::InvalidRequest {
                code: Some("resource_missing".to_string()),
                message: format!("No such account: {}", account_id),
            })
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transient("checkout unavailable".to_string()));
        }
        let id = self.next_id("cs");
        self.state.lock().await.sessions.insert(id.clone(), request.clone());
        Ok(CheckoutSession { url: format!("https://checkout.mock/pay/{}", id), id })
    }

    async fn retrieve_charge(&self, payment_intent_id: &str) -> Result<Option<Charge>, ProcessorError> {
        Ok(self.state.lock().await.charges.get(payment_intent_id).cloned())
    }

    async fn refund_charge(&self, charge_id: &str, idempotency_key: &str) -> Result<Refund, ProcessorError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transient("refunds unavailable".to_string()));
        }
        let refund_id = self.next_id("re");
        let mut state = self.state.lock().await;
        if let Some(existing) = state.refunds_by_key.get(idempotency_key) {
            return Ok(existing.clone());
        }
        let charge = state
            .charges
            .values_mut()
            .find(|c| c.id == charge_id)
            .ok_or_else(|| ProcessorError::InvalidRequest {
                code: Some("resource_missing".to_string()),
                message: format!("No such charge: {}", charge_id),
            })?;
        if charge.refunded {
            return Err(ProcessorError::InvalidRequest {
                code: Some(CHARGE_ALREADY_REFUNDED.to_string()),
                message: format!("Charge {} has already been refunded.", charge_id),
            });
        }
        charge.refunded = true;
        let refund = Refund { id: refund_id, charge_id: charge_id.to_string(), amount: charge.amount };
        state.refunds_by_key.insert(idempotency_key.to_string(), refund.clone());
        Ok(refund)
    }
}

/// An email captured by `RecordingMailer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str, text_body: &str) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("mail relay unavailable".to_string()));
        }
        self.sent.lock().await.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            text_body: text_body.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    published: Mutex<Vec<(String, String, String)>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// (topic, key, payload) in publish order
    pub async fn published(&self) -> Vec<(String, String, String)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), NotifyError> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), key.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use sideline_core::booking::{Booking, BookingType, BuyerContact};
    use sideline_core::catalog::{Coach, Listing, Profile};
    use sideline_core::repository::BookingRepository;
    use sideline_store::MemoryStore;
    use uuid::Uuid;

    pub struct Fixture {
        pub coach: Coach,
        pub athlete: Profile,
        pub lesson: Listing,
        pub film: Listing,
    }

    pub async fn seed(store: &MemoryStore) -> Fixture {
        let coach_profile = Profile {
            id: Uuid::new_v4(),
            email: "coach@example.com".to_string(),
            display_name: "Coach Carter".to_string(),
        };
        let athlete = Profile {
            id: Uuid::new_v4(),
            email: "athlete@example.com".to_string(),
            display_name: "Sam Athlete".to_string(),
        };
        let coach = Coach {
            id: Uuid::new_v4(),
            profile_id: coach_profile.id,
            display_name: coach_profile.display_name.clone(),
            email: coach_profile.email.clone(),
            payment_account_id: None,
            created_at: Utc::now(),
        };
        let lesson = Listing {
            id: Uuid::new_v4(),
            coach_id: coach.id,
            booking_type: BookingType::LiveLesson,
            title: "Pitching mechanics".to_string(),
            price_cents: 7500,
            currency: "usd".to_string(),
            duration_minutes: Some(60),
            turnaround_hours: None,
            is_active: true,
        };
        let film = Listing {
            id: Uuid::new_v4(),
            coach_id: coach.id,
            booking_type: BookingType::FilmReview,
            title: "Game film breakdown".to_string(),
            price_cents: 5000,
            currency: "usd".to_string(),
            duration_minutes: None,
            turnaround_hours: Some(48),
            is_active: true,
        };
        store.insert_profile(coach_profile).await;
        store.insert_profile(athlete.clone()).await;
        store.insert_coach(coach.clone()).await;
        store.insert_listing(lesson.clone()).await;
        store.insert_listing(film.clone()).await;
        Fixture { coach, athlete, lesson, film }
    }

    /// Booking bought by the seeded athlete, still awaiting payment
    pub async fn pending_booking(store: &MemoryStore, listing: &Listing, session_id: &str) -> Booking {
        let buyer = BuyerContact {
            profile_id: None,
            email: "athlete@example.com".to_string(),
        };
        let booking = Booking::new_pending(
            Uuid::new_v4(),
            listing,
            buyer,
            listing.price_cents / 10,
            session_id.to_string(),
            Utc::now(),
        )
        .unwrap();
        store.insert_booking(&booking, &[]).await.unwrap();
        booking
    }

    pub async fn paid_booking(store: &MemoryStore, listing: &Listing, session_id: &str, payment_intent_id: &str) -> Booking {
        let mut booking = pending_booking(store, listing, session_id).await;
        booking.mark_paid(Some(payment_intent_id.to_string()), Utc::now()).unwrap();
        assert!(store.update_booking(&booking, &[]).await.unwrap());
        booking.version += 1;
        booking
    }
}
