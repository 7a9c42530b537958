use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processor error code returned when refunding a charge that is already refunded.
pub const CHARGE_ALREADY_REFUNDED: &str = "charge_already_refunded";

/// Failures reported by the payment processor, in its own taxonomy
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error("invalid request: {message}")]
    InvalidRequest { code: Option<String>, message: String },
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("request timed out")]
    Timeout,
}

impl ProcessorError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ProcessorError::InvalidRequest { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::Transient(_) | ProcessorError::Timeout)
    }
}

/// Connected merchant account of a coach
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantAccount {
    pub id: String,
    pub charges_enabled: bool,
    pub details_submitted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountStatus {
    pub charges_enabled: bool,
    pub details_submitted: bool,
}

/// Hosted checkout routed to the coach's account, minus the platform fee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub booking_id: Uuid,
    pub destination_account: String,
    pub amount: i64,
    pub application_fee: i64,
    pub currency: String,
    pub product_name: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub refunded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub charge_id: String,
    pub amount: i64,
}

/// Everything the booking core needs from the payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a connected merchant account for a coach
    async fn create_account(
        &self,
        coach_id: Uuid,
        email: &str,
    ) -> Result<MerchantAccount, ProcessorError>;

    /// Discard an account that lost the race to be stored
    async fn delete_account(&self, account_id: &str) -> Result<(), ProcessorError>;

    /// Hosted onboarding link; no local state
    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, ProcessorError>;

    async fn account_status(&self, account_id: &str) -> Result<AccountStatus, ProcessorError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProcessorError>;

    /// Latest charge of a payment intent, if any
    async fn retrieve_charge(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Charge>, ProcessorError>;

    /// Full refund. The idempotency key makes retries safe on the processor side.
    async fn refund_charge(
        &self,
        charge_id: &str,
        idempotency_key: &str,
    ) -> Result<Refund, ProcessorError>;
}
