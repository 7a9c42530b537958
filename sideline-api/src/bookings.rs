use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use sideline_booking::{BookingStatusView, CheckoutRequest, CheckoutStarted};
use sideline_core::booking::{Booking, BuyerContact};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{optional_claims, ProfileClaims};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartCheckoutRequest {
    pub listing_id: Uuid,
    pub coach_id: Uuid,
    /// Required for guests; signed-in athletes default to their account email
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeliverReviewRequest {
    pub review_url: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachMeetingRequest {
    pub meeting_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: Uuid,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/checkout
/// Create a pending booking and return the hosted payment page
pub async fn start_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutStarted>), AppError> {
    let claims = optional_claims(&state, &headers)?;

    let buyer = match &claims {
        Some(claims) => BuyerContact {
            profile_id: Some(claims.profile_id()?),
            email: req.email.or_else(|| claims.email.clone()).unwrap_or_default(),
        },
        None => BuyerContact {
            profile_id: None,
            email: req.email.unwrap_or_default(),
        },
    };

    let started = state
        .checkout
        .start_checkout(CheckoutRequest {
            listing_id: req.listing_id,
            coach_id: req.coach_id,
            buyer,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(started)))
}

/// GET /v1/bookings/{id}
/// Booking status as seen by its coach or buyer
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingStatusView>, AppError> {
    let viewer = claims.viewer()?;
    let view = state.bookings.get_status(booking_id, &viewer).await?;
    Ok(Json(view))
}

/// POST /v1/bookings/{id}/accept
pub async fn accept_review(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingStatusView>, AppError> {
    let coach_id = claims.require_coach()?;
    let booking = state.review_workflow.accept(booking_id, coach_id).await?;
    Ok(status_of(&booking))
}

/// POST /v1/bookings/{id}/decline
/// Declining refunds the buyer
pub async fn decline_review(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingStatusView>, AppError> {
    let coach_id = claims.require_coach()?;
    let booking = state.review_workflow.decline(booking_id, coach_id).await?;
    Ok(status_of(&booking))
}

/// POST /v1/bookings/{id}/deliver
pub async fn deliver_review(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<DeliverReviewRequest>,
) -> Result<Json<BookingStatusView>, AppError> {
    let coach_id = claims.require_coach()?;
    let booking = state
        .review_workflow
        .deliver(booking_id, coach_id, &req.review_url)
        .await?;
    Ok(status_of(&booking))
}

/// POST /v1/bookings/{id}/meeting
/// Link a live lesson to its video meeting
pub async fn attach_meeting(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<AttachMeetingRequest>,
) -> Result<Json<BookingStatusView>, AppError> {
    let coach_id = claims.require_coach()?;
    let booking = state
        .bookings
        .attach_meeting(booking_id, coach_id, req.meeting_id.trim())
        .await?;
    Ok(status_of(&booking))
}

/// POST /v1/bookings/{id}/conversation
pub async fn ensure_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, AppError> {
    let viewer = claims.viewer()?;
    let conversation_id = state
        .conversations
        .ensure_conversation(booking_id, Some(&viewer))
        .await?;
    Ok(Json(ConversationResponse { conversation_id }))
}

fn status_of(booking: &Booking) -> Json<BookingStatusView> {
    Json(BookingStatusView::from(booking))
}
