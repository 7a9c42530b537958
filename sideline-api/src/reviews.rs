use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use sideline_core::review::Review;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::ProfileClaims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i32,
    pub comment: Option<String>,
}

/// POST /v1/bookings/{id}/review
/// Rate a completed live lesson; one review per booking
pub async fn create_review(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    let rater = claims.rater()?;
    let review = state
        .review_gate
        .create_review(booking_id, &rater, req.rating, req.comment)
        .await?;

    tracing::info!(%booking_id, review_id = %review.id, "Lesson review recorded");
    Ok((StatusCode::CREATED, Json(review)))
}
