use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work that runs after a transition has committed. Persisted alongside the transition
/// and executed by the outbox worker; failures are retried, never rolled back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    SendEmail {
        to: String,
        subject: String,
        html_body: String,
        text_body: String,
    },
    IssueRefund {
        booking_id: Uuid,
    },
    EnsureConversation {
        booking_id: Uuid,
    },
    PublishEvent {
        topic: String,
        key: String,
        payload: serde_json::Value,
    },
    DiscardMerchantAccount {
        account_id: String,
    },
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::SendEmail { .. } => "send_email",
            SideEffect::IssueRefund { .. } => "issue_refund",
            SideEffect::EnsureConversation { .. } => "ensure_conversation",
            SideEffect::PublishEvent { .. } => "publish_event",
            SideEffect::DiscardMerchantAccount { .. } => "discard_merchant_account",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// A claimed outbox row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxTask {
    pub id: Uuid,
    pub effect: SideEffect,
    pub status: OutboxStatus,
    /// Includes the current attempt once claimed
    pub attempts: i32,
    pub last_error: Option<String>,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OutboxTask {
    pub fn new(effect: SideEffect, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            effect,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            available_at: now,
            created_at: now,
        }
    }
}
