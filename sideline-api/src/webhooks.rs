use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use sideline_booking::WebhookAck;
use sideline_core::webhook::WebhookSource;
use sideline_core::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// POST /v1/webhooks/payments
/// Payment processor events (checkout completion, expiry, refunds)
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    ingest(&state, WebhookSource::PaymentProcessor, &headers, &body).await
}

/// POST /v1/webhooks/video
/// Video provider events, including the endpoint validation handshake
pub async fn handle_video_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    ingest(&state, WebhookSource::VideoConference, &headers, &body).await
}

async fn ingest(
    state: &AppState,
    source: WebhookSource,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<Value>, AppError> {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let ack = state
        .webhooks
        .ingest(source, &headers, body)
        .await
        .map_err(|e| match e {
            CoreError::AuthorizationError(msg) => {
                tracing::warn!(source = %source, reason = %msg, "Rejected webhook delivery");
                AppError::AuthenticationError(msg)
            }
            other => AppError::from(other),
        })?;

    let status = match ack {
        WebhookAck::Handshake(body) => return Ok(Json(body)),
        WebhookAck::Duplicate => "duplicate",
        WebhookAck::Processed => "processed",
        WebhookAck::Ignored => "ignored",
    };
    Ok(Json(json!({ "received": true, "status": status })))
}
