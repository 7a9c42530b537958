use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sideline_booking::{Rater, Viewer};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_ATHLETE: &str = "ATHLETE";
pub const ROLE_COACH: &str = "COACH";

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProfileClaims {
    /// Profile id
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub role: String,
    /// Present when the profile owns a coach account
    pub coach_id: Option<Uuid>,
    pub exp: usize,
}

impl ProfileClaims {
    pub fn profile_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("token subject is not a profile".to_string()))
    }

    pub fn verified_email(&self) -> Option<String> {
        self.email.clone().filter(|_| self.email_verified)
    }

    pub fn require_coach(&self) -> Result<Uuid, AppError> {
        match (self.role.as_str(), self.coach_id) {
            (ROLE_COACH, Some(coach_id)) => Ok(coach_id),
            _ => Err(AppError::AuthorizationError("coach account required".to_string())),
        }
    }

    pub fn viewer(&self) -> Result<Viewer, AppError> {
        Ok(Viewer {
            profile_id: self.profile_id()?,
            coach_id: self.coach_id,
            verified_email: self.verified_email(),
        })
    }

    pub fn rater(&self) -> Result<Rater, AppError> {
        Ok(Rater {
            profile_id: self.profile_id()?,
            verified_email: self.verified_email(),
        })
    }
}

fn decode_bearer(state: &AppState, headers: &HeaderMap) -> Option<Result<ProfileClaims, StatusCode>> {
    let header = headers.get("Authorization")?;
    let token = match header.to_str().ok().and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return Some(Err(StatusCode::UNAUTHORIZED)),
    };
    let decoded = decode::<ProfileClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| StatusCode::UNAUTHORIZED);
    Some(decoded)
}

/// Claims when a valid token is present; a present but invalid token is still rejected.
pub fn optional_claims(state: &AppState, headers: &HeaderMap) -> Result<Option<ProfileClaims>, AppError> {
    match decode_bearer(state, headers) {
        None => Ok(None),
        Some(Ok(claims)) => Ok(Some(claims)),
        Some(Err(_)) => Err(AppError::AuthenticationError("invalid token".to_string())),
    }
}

// ============================================================================
// Profile Authentication Middleware
// ============================================================================

pub async fn profile_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = decode_bearer(&state, req.headers()).ok_or(StatusCode::UNAUTHORIZED)??;

    if claims.role != ROLE_ATHLETE && claims.role != ROLE_COACH {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
