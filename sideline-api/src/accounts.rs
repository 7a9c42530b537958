use axum::{extract::State, Extension, Json};
use serde::Serialize;
use sideline_booking::accounts::OnboardingLink;
use sideline_booking::PaymentIdentity;

use crate::error::AppError;
use crate::middleware::ProfileClaims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PaymentAccountResponse {
    pub payment_account: Option<PaymentIdentity>,
    pub onboarding_required: bool,
}

/// POST /v1/coach/payment-account
/// Create the coach's payment account if needed and return an onboarding link
pub async fn ensure_payment_account(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
) -> Result<Json<OnboardingLink>, AppError> {
    let coach_id = claims.require_coach()?;
    let link = state.identities.ensure_onboarding_link(coach_id).await?;
    Ok(Json(link))
}

/// GET /v1/coach/payment-account
pub async fn get_payment_account(
    State(state): State<AppState>,
    Extension(claims): Extension<ProfileClaims>,
) -> Result<Json<PaymentAccountResponse>, AppError> {
    let coach_id = claims.require_coach()?;
    let payment_account = state.identities.status_for_coach(coach_id).await?;
    let onboarding_required = payment_account
        .as_ref()
        .map_or(true, |identity| identity.onboarding_required());

    Ok(Json(PaymentAccountResponse {
        payment_account,
        onboarding_required,
    }))
}
