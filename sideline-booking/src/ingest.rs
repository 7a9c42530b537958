use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sideline_core::repository::MarketplaceStore;
use sideline_core::webhook::{WebhookEventKey, WebhookEventRecord, WebhookSource};
use sideline_core::{CoreError, CoreResult};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::manager::{BookingManager, TransitionOutcome};
use crate::signature::{self, DEFAULT_TOLERANCE_SECS};

pub const PROCESSOR_SIGNATURE_HEADER: &str = "stripe-signature";
pub const VIDEO_SIGNATURE_HEADER: &str = "x-zm-signature";
pub const VIDEO_TIMESTAMP_HEADER: &str = "x-zm-request-timestamp";

/// Signing secrets per source. A source without a secret is rejected unless `allow_unsigned`.
#[derive(Debug, Clone)]
pub struct WebhookSecrets {
    pub processor_secret: Option<String>,
    pub video_secret: Option<String>,
    pub allow_unsigned: bool,
    pub tolerance_secs: i64,
}

impl Default for WebhookSecrets {
    fn default() -> Self {
        Self {
            processor_secret: None,
            video_secret: None,
            allow_unsigned: false,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum WebhookAck {
    /// Endpoint validation challenge; the value is the response body
    Handshake(Value),
    Duplicate,
    Processed,
    Ignored,
}

fn field<'a>(value: &'a Value, pointer: &str) -> CoreResult<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::ValidationError(format!("webhook payload missing {}", pointer)))
}

/// Ids arrive as strings or numbers depending on the provider
fn id_field(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn event_key(source: WebhookSource, payload: &Value) -> CoreResult<WebhookEventKey> {
    let (source_id, event_type, occurred_at) = match source {
        WebhookSource::PaymentProcessor => {
            let created = payload
                .get("created")
                .and_then(Value::as_i64)
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
            (
                field(payload, "/id")?.to_string(),
                field(payload, "/type")?.to_string(),
                created,
            )
        }
        WebhookSource::VideoConference => {
            let occurred = payload
                .get("event_ts")
                .and_then(Value::as_i64)
                .and_then(DateTime::<Utc>::from_timestamp_millis);
            let object_id = id_field(payload, "/payload/object/uuid")
                .or_else(|| id_field(payload, "/payload/object/id"))
                .ok_or_else(|| CoreError::ValidationError("webhook payload missing object id".to_string()))?;
            (object_id, field(payload, "/event")?.to_string(), occurred)
        }
    };
    let occurred_at = occurred_at
        .ok_or_else(|| CoreError::ValidationError("webhook payload missing event timestamp".to_string()))?;
    Ok(WebhookEventKey { source, source_id, event_type, occurred_at })
}

/// Verifies, deduplicates and applies provider webhooks
#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn MarketplaceStore>,
    bookings: BookingManager,
    secrets: WebhookSecrets,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn MarketplaceStore>, bookings: BookingManager, secrets: WebhookSecrets) -> Self {
        Self { store, bookings, secrets }
    }

    /// `headers` keys are lower-case. Once an event is recorded it is acknowledged even when
    /// applying it fails; the failure is logged for operators.
    pub async fn ingest(
        &self,
        source: WebhookSource,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> CoreResult<WebhookAck> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| CoreError::ValidationError(format!("malformed webhook body: {}", e)))?;

        if source == WebhookSource::VideoConference
            && payload.get("event").and_then(Value::as_str) == Some("endpoint.url_validation")
        {
            return self.answer_url_validation(&payload);
        }

        self.verify(source, headers, body)?;

        let key = event_key(source, &payload)?;
        let record = WebhookEventRecord {
            id: Uuid::new_v4(),
            key,
            payload,
            received_at: Utc::now(),
        };
        if !self.store.record_event(&record).await? {
            info!(
                source = %source,
                source_id = %record.key.source_id,
                event_type = %record.key.event_type,
                "Duplicate webhook delivery"
            );
            return Ok(WebhookAck::Duplicate);
        }

        match self.dispatch(source, &record.key.event_type, &record.payload).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                error!(
                    source = %source,
                    source_id = %record.key.source_id,
                    event_type = %record.key.event_type,
                    error = %e,
                    "Webhook recorded but could not be applied"
                );
                Ok(WebhookAck::Processed)
            }
        }
    }

    fn answer_url_validation(&self, payload: &Value) -> CoreResult<WebhookAck> {
        let plain_token = field(payload, "/payload/plainToken")?;
        let secret = self.secrets.video_secret.as_deref().ok_or_else(|| {
            CoreError::AuthorizationError("video webhook secret not configured".to_string())
        })?;
        let encrypted = signature::hmac_hex(secret, plain_token.as_bytes())
            .map_err(|e| CoreError::AuthorizationError(e.to_string()))?;
        Ok(WebhookAck::Handshake(json!({
            "plainToken": plain_token,
            "encryptedToken": encrypted,
        })))
    }

    fn verify(&self, source: WebhookSource, headers: &HashMap<String, String>, body: &[u8]) -> CoreResult<()> {
        let secret = match source {
            WebhookSource::PaymentProcessor => self.secrets.processor_secret.as_deref(),
            WebhookSource::VideoConference => self.secrets.video_secret.as_deref(),
        };
        let Some(secret) = secret else {
            if self.secrets.allow_unsigned {
                warn!(source = %source, "No webhook secret configured; accepting unsigned delivery");
                return Ok(());
            }
            return Err(CoreError::AuthorizationError(format!(
                "{} webhook secret not configured",
                source
            )));
        };

        let now = Utc::now().timestamp();
        let header = |name: &str| headers.get(name).map(String::as_str);
        let verified = match source {
            WebhookSource::PaymentProcessor => signature::verify_processor_signature(
                header(PROCESSOR_SIGNATURE_HEADER),
                body,
                secret,
                self.secrets.tolerance_secs,
                now,
            ),
            WebhookSource::VideoConference => signature::verify_video_signature(
                header(VIDEO_SIGNATURE_HEADER),
                header(VIDEO_TIMESTAMP_HEADER),
                body,
                secret,
                self.secrets.tolerance_secs,
                now,
            ),
        };
        verified.map_err(|e| {
            warn!(source = %source, error = %e, "Rejected webhook signature");
            CoreError::AuthorizationError(format!("webhook signature rejected: {}", e))
        })
    }

    async fn dispatch(&self, source: WebhookSource, event_type: &str, payload: &Value) -> CoreResult<WebhookAck> {
        let outcome = match (source, event_type) {
            (
                WebhookSource::PaymentProcessor,
                "checkout.session.completed" | "checkout.session.async_payment_succeeded",
            ) => {
                let session = payload.pointer("/data/object").unwrap_or(&Value::Null);
                if session.get("payment_status").and_then(Value::as_str) == Some("unpaid") {
                    info!(event_type, "Checkout completed without payment yet; waiting for async result");
                    return Ok(WebhookAck::Ignored);
                }
                let session_id = field(session, "/id")?;
                let payment_intent = id_field(session, "/payment_intent");
                let amount_total = session.get("amount_total").and_then(Value::as_i64);
                self.bookings.mark_paid(session_id, payment_intent, amount_total).await?
            }
            (
                WebhookSource::PaymentProcessor,
                "checkout.session.expired" | "checkout.session.async_payment_failed",
            ) => {
                let session_id = field(payload, "/data/object/id")?;
                self.bookings.cancel_checkout(session_id).await?
            }
            (WebhookSource::PaymentProcessor, "charge.refunded") => {
                let payment_intent = field(payload, "/data/object/payment_intent")?;
                let refund_id = id_field(payload, "/data/object/refunds/data/0/id");
                self.bookings.record_refund(payment_intent, refund_id).await?
            }
            (WebhookSource::PaymentProcessor, "account.updated") => {
                let account_id = payload.pointer("/data/object/id").and_then(|v| v.as_str()).unwrap_or_default();
                let charges_enabled = payload
                    .pointer("/data/object/charges_enabled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                info!(account_id, charges_enabled, "Payment account updated");
                return Ok(WebhookAck::Processed);
            }
            (WebhookSource::VideoConference, "meeting.ended") => {
                let meeting_id = id_field(payload, "/payload/object/id").ok_or_else(|| {
                    CoreError::ValidationError("meeting.ended without meeting id".to_string())
                })?;
                self.bookings.complete_lesson(&meeting_id).await?
            }
            (
                WebhookSource::VideoConference,
                "meeting.started" | "meeting.participant_joined" | "meeting.participant_left",
            ) => {
                info!(
                    event_type,
                    meeting_id = %id_field(payload, "/payload/object/id").unwrap_or_default(),
                    "Meeting activity"
                );
                return Ok(WebhookAck::Processed);
            }
            _ => {
                info!(source = %source, event_type, "Unhandled webhook event type");
                return Ok(WebhookAck::Ignored);
            }
        };
        if outcome == TransitionOutcome::AlreadyApplied {
            info!(event_type, "Webhook transition already applied");
        }
        Ok(WebhookAck::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::fixtures;
    use crate::signature::{sign_processor_payload, sign_video_payload};
    use sideline_core::booking::PaymentStatus;
    use sideline_core::repository::BookingRepository;
    use sideline_store::MemoryStore;

    const SECRET: &str = "whsec_test";
    const VIDEO_SECRET: &str = "zoom_secret";

    fn processor(store: Arc<MemoryStore>) -> WebhookProcessor {
        let secrets = WebhookSecrets {
            processor_secret: Some(SECRET.to_string()),
            video_secret: Some(VIDEO_SECRET.to_string()),
            ..WebhookSecrets::default()
        };
        WebhookProcessor::new(store.clone(), BookingManager::new(store), secrets)
    }

    fn signed(body: &[u8]) -> HashMap<String, String> {
        let header = sign_processor_payload(SECRET, body, Utc::now().timestamp()).unwrap();
        HashMap::from([(PROCESSOR_SIGNATURE_HEADER.to_string(), header)])
    }

    fn completed_event(event_id: &str, session_id: &str) -> Vec<u8> {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": session_id,
                "payment_intent": "pi_wh",
                "payment_status": "paid",
                "amount_total": 7500
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_account_updated_is_acknowledged() {
        let store = Arc::new(MemoryStore::new());
        let webhooks = processor(store.clone());
        let body = json!({
            "id": "evt_acct",
            "type": "account.updated",
            "created": 1_700_000_000,
            "data": { "object": { "id": "acct_1", "charges_enabled": true } }
        })
        .to_string()
        .into_bytes();

        let ack = webhooks.ingest(WebhookSource::PaymentProcessor, &signed(&body), &body).await.unwrap();
        assert_eq!(ack, WebhookAck::Processed);
        assert_eq!(store.webhook_event_count().await, 1);
    }

    #[tokio::test]
    async fn test_overflowing_timestamp_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let webhooks = processor(store.clone());
        let body = completed_event("evt_overflow", "cs_none");
        let headers = HashMap::from([(
            PROCESSOR_SIGNATURE_HEADER.to_string(),
            "t=-9223372036854775808,v1=00".to_string(),
        )]);

        let err = webhooks.ingest(WebhookSource::PaymentProcessor, &headers, &body).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthorizationError(_)));
        assert_eq!(store.webhook_event_count().await, 0);
    }

    #[tokio::test]
    async fn test_checkout_completed_marks_paid_and_dedups() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let booking = fixtures::pending_booking(&store, &fx.lesson, "cs_wh").await;
        let webhooks = processor(store.clone());

        let body = completed_event("evt_1", "cs_wh");
        let first = webhooks.ingest(WebhookSource::PaymentProcessor, &signed(&body), &body).await.unwrap();
        let again = webhooks.ingest(WebhookSource::PaymentProcessor, &signed(&body), &body).await.unwrap();
        assert_eq!(first, WebhookAck::Processed);
        assert_eq!(again, WebhookAck::Duplicate);
        assert_eq!(store.webhook_event_count().await, 1);

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_wh"));
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_before_recording() {
        let store = Arc::new(MemoryStore::new());
        let webhooks = processor(store.clone());
        let body = completed_event("evt_2", "cs_any");
        let headers = HashMap::from([(
            PROCESSOR_SIGNATURE_HEADER.to_string(),
            format!("t={},v1=00ff", Utc::now().timestamp()),
        )]);

        let err = webhooks.ingest(WebhookSource::PaymentProcessor, &headers, &body).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthorizationError(_)));
        assert_eq!(store.webhook_event_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_closed_unless_allowed() {
        let store = Arc::new(MemoryStore::new());
        let strict = WebhookProcessor::new(store.clone(), BookingManager::new(store.clone()), WebhookSecrets::default());
        let body = json!({"id": "evt_3", "type": "customer.created", "created": 1_700_000_000}).to_string();

        let err = strict
            .ingest(WebhookSource::PaymentProcessor, &HashMap::new(), body.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AuthorizationError(_)));

        let lenient = WebhookProcessor::new(
            store.clone(),
            BookingManager::new(store.clone()),
            WebhookSecrets { allow_unsigned: true, ..WebhookSecrets::default() },
        );
        let ack = lenient
            .ingest(WebhookSource::PaymentProcessor, &HashMap::new(), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(ack, WebhookAck::Ignored);
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation_error() {
        let store = Arc::new(MemoryStore::new());
        let webhooks = processor(store);
        let err = webhooks
            .ingest(WebhookSource::PaymentProcessor, &HashMap::new(), b"not json")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_video_url_validation_handshake() {
        let store = Arc::new(MemoryStore::new());
        let webhooks = processor(store.clone());
        let body = json!({
            "event": "endpoint.url_validation",
            "payload": { "plainToken": "qgg8vlvZRS6UYooatFL8Aw" },
            "event_ts": 1_700_000_000_000i64
        })
        .to_string();

        let ack = webhooks
            .ingest(WebhookSource::VideoConference, &HashMap::new(), body.as_bytes())
            .await
            .unwrap();
        let expected = signature::hmac_hex(VIDEO_SECRET, b"qgg8vlvZRS6UYooatFL8Aw").unwrap();
        assert_eq!(
            ack,
            WebhookAck::Handshake(json!({
                "plainToken": "qgg8vlvZRS6UYooatFL8Aw",
                "encryptedToken": expected
            }))
        );
        assert_eq!(store.webhook_event_count().await, 0);
    }

    #[tokio::test]
    async fn test_meeting_ended_completes_lesson() {
        let store = Arc::new(MemoryStore::new());
        let fx = fixtures::seed(&store).await;
        let mut booking = fixtures::paid_booking(&store, &fx.lesson, "cs_vid", "pi_vid").await;
        booking.meeting_id = Some("85746065432".to_string());
        assert!(store.update_booking(&booking, &[]).await.unwrap());
        let webhooks = processor(store.clone());

        let body = json!({
            "event": "meeting.ended",
            "event_ts": 1_700_000_000_123i64,
            "payload": { "object": { "id": 85746065432i64, "uuid": "4444AAAiAAAAAiAiAiiAii==" } }
        })
        .to_string();
        let ts = Utc::now().timestamp();
        let headers = HashMap::from([
            (VIDEO_SIGNATURE_HEADER.to_string(), sign_video_payload(VIDEO_SECRET, body.as_bytes(), ts).unwrap()),
            (VIDEO_TIMESTAMP_HEADER.to_string(), ts.to_string()),
        ]);

        let ack = webhooks.ingest(WebhookSource::VideoConference, &headers, body.as_bytes()).await.unwrap();
        assert_eq!(ack, WebhookAck::Processed);
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_apply_failure_is_still_acknowledged() {
        let store = Arc::new(MemoryStore::new());
        let webhooks = processor(store.clone());
        let body = completed_event("evt_9", "cs_unknown");
        let ack = webhooks.ingest(WebhookSource::PaymentProcessor, &signed(&body), &body).await.unwrap();
        assert_eq!(ack, WebhookAck::Processed);
        assert_eq!(store.webhook_event_count().await, 1);
    }
}
