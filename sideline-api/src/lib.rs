use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod accounts;
pub mod bookings;
pub mod error;
pub mod middleware;
pub mod reviews;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::{AppState, AuthConfig, ServiceSettings};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Signed-in routes
    let protected = Router::new()
        .route("/v1/bookings/{id}", get(bookings::get_booking))
        .route("/v1/bookings/{id}/accept", post(bookings::accept_review))
        .route("/v1/bookings/{id}/decline", post(bookings::decline_review))
        .route("/v1/bookings/{id}/deliver", post(bookings::deliver_review))
        .route("/v1/bookings/{id}/meeting", post(bookings::attach_meeting))
        .route("/v1/bookings/{id}/conversation", post(bookings::ensure_conversation))
        .route("/v1/bookings/{id}/review", post(reviews::create_review))
        .route(
            "/v1/coach/payment-account",
            post(accounts::ensure_payment_account).get(accounts::get_payment_account),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::profile_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/v1/checkout", post(bookings::start_checkout))
        .route("/v1/webhooks/payments", post(webhooks::handle_payment_webhook))
        .route("/v1/webhooks/video", post(webhooks::handle_video_webhook))
        .merge(protected)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::circuit_breaker_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Per-IP fixed window. Needs `ConnectInfo`, so the binary adds it when serving.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(req).await);
    };
    let key = format!("ratelimit:{}", addr.ip());

    match redis.check_rate_limit(&key, 100, 60).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")),
        Err(e) => {
            tracing::warn!(error = %e, "Rate limiter unavailable; allowing request");
            Ok(next.run(req).await)
        }
    }
}
