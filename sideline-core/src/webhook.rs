use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

/// External system a webhook came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    PaymentProcessor,
    VideoConference,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::PaymentProcessor => "payment_processor",
            WebhookSource::VideoConference => "video_conference",
        }
    }
}

impl FromStr for WebhookSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment_processor" => Ok(WebhookSource::PaymentProcessor),
            "video_conference" => Ok(WebhookSource::VideoConference),
            other => Err(CoreError::ValidationError(format!("unknown webhook source: {}", other))),
        }
    }
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup key: (source id, event type, occurrence time) scoped by source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookEventKey {
    pub source: WebhookSource,
    pub source_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub key: WebhookEventKey,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
