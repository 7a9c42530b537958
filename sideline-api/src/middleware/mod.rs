pub mod auth;
pub mod resiliency;

pub use auth::{optional_claims, profile_auth_middleware, ProfileClaims};
pub use resiliency::{circuit_breaker_middleware, BreakerState, CallOutcome, ProcessorBreaker, ResiliencyState};
