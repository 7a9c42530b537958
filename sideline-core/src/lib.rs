pub mod booking;
pub mod catalog;
pub mod effects;
pub mod notify;
pub mod payment;
pub mod repository;
pub mod review;
pub mod webhook;

pub use payment::ProcessorError;

/// Error taxonomy shared by every booking/payment operation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not authorized: {0}")]
    AuthorizationError(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Conflict: {0}")]
    ConflictError(String),
    /// The booking has not reached the state the operation needs yet
    #[error("Not allowed yet: {0}")]
    PreconditionFailed(String),
    #[error("This coach has not finished setting up payments yet")]
    PaymentSetupIncomplete,
    #[error("The buyer has not registered an account yet")]
    BuyerNotRegistered,
    #[error("Payment processor error: {0}")]
    ProcessorError(#[from] ProcessorError),
    #[error("Side effect failed: {0}")]
    SideEffectFailure(String),
    #[error("Store error: {0}")]
    StoreError(String),
}

impl CoreError {
    pub fn not_found(entity: &str) -> Self {
        CoreError::NotFoundError(format!("{} not found", entity))
    }

    /// Conflicts mean the requested state was already reached or lost to a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::ConflictError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
