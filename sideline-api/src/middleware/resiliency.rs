use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::ProcessorFailure;
use crate::state::AppState;

const PAYMENT_ROUTES: [&str; 2] = ["/v1/checkout", "/v1/coach/payment-account"];

/// Breakers guarding the routes that call the payment processor
pub struct ResiliencyState {
    pub payments: ProcessorBreaker,
}

impl ResiliencyState {
    pub fn new() -> Self {
        Self {
            payments: ProcessorBreaker::new("payments", 5, Duration::from_secs(30)),
        }
    }
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakerState {
    Closed { consecutive_failures: u32 },
    /// Requests fail fast until `until`
    Open { until: Instant },
    /// One outcome decides between closing and reopening
    Trial,
}

/// What a guarded response tells the breaker about the processor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallOutcome {
    ProcessorFailed,
    Succeeded,
    /// A 5xx from somewhere other than the processor
    Unrelated,
}

impl CallOutcome {
    /// Only responses tagged by `AppError` as processor failures count against the breaker.
    pub fn of(response: &Response) -> Self {
        if response.extensions().get::<ProcessorFailure>().is_some() {
            CallOutcome::ProcessorFailed
        } else if response.status().is_server_error() {
            CallOutcome::Unrelated
        } else {
            CallOutcome::Succeeded
        }
    }
}

/// Counts consecutive processor failures. Store errors and client errors never reach it.
pub struct ProcessorBreaker {
    name: &'static str,
    threshold: u32,
    cool_down: Duration,
    state: Mutex<BreakerState>,
}

impl ProcessorBreaker {
    pub fn new(name: &'static str, threshold: u32, cool_down: Duration) -> Self {
        Self {
            name,
            threshold,
            cool_down,
            state: Mutex::new(BreakerState::Closed { consecutive_failures: 0 }),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub async fn state(&self) -> BreakerState {
        *self.state.lock().await
    }

    /// Whether a request may reach the processor at `now`
    pub async fn admit(&self, now: Instant) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            BreakerState::Open { until } if now < until => false,
            BreakerState::Open { .. } => {
                tracing::info!(breaker = self.name, "Circuit breaker letting a trial request through");
                *state = BreakerState::Trial;
                true
            }
            _ => true,
        }
    }

    pub async fn processor_succeeded(&self) {
        let mut state = self.state.lock().await;
        if *state == BreakerState::Trial {
            tracing::info!(breaker = self.name, "Circuit breaker closed");
        }
        *state = BreakerState::Closed { consecutive_failures: 0 };
    }

    pub async fn processor_failed(&self, now: Instant) {
        let mut state = self.state.lock().await;
        let failures = match *state {
            BreakerState::Closed { consecutive_failures } => consecutive_failures + 1,
            BreakerState::Trial => self.threshold,
            BreakerState::Open { .. } => return,
        };
        if failures >= self.threshold {
            tracing::error!(breaker = self.name, failures, "Circuit breaker opened");
            *state = BreakerState::Open { until: now + self.cool_down };
        } else {
            *state = BreakerState::Closed { consecutive_failures: failures };
        }
    }

    pub async fn observe(&self, outcome: CallOutcome, now: Instant) {
        match outcome {
            CallOutcome::ProcessorFailed => self.processor_failed(now).await,
            CallOutcome::Succeeded => self.processor_succeeded().await,
            CallOutcome::Unrelated => {}
        }
    }
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if !PAYMENT_ROUTES.iter().any(|route| path.starts_with(route)) {
        return next.run(req).await;
    }

    let breaker = &state.resiliency.payments;
    if !breaker.admit(Instant::now()).await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("{} temporarily unavailable", breaker.name()) })),
        )
            .into_response();
    }

    let response = next.run(req).await;
    breaker.observe(CallOutcome::of(&response), Instant::now()).await;
    response
}
