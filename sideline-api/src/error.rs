use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sideline_core::CoreError;

/// Response extension marking a failed call to the payment processor
#[derive(Debug, Clone, Copy)]
pub struct ProcessorFailure;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

fn core_status(err: &CoreError) -> (StatusCode, String) {
    match err {
        CoreError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        CoreError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg.clone()),
        CoreError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        CoreError::ConflictError(msg) => (StatusCode::CONFLICT, msg.clone()),
        CoreError::PreconditionFailed(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
        CoreError::PaymentSetupIncomplete => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "This coach isn't accepting payments yet. Please check back soon.".to_string(),
        ),
        CoreError::BuyerNotRegistered => (StatusCode::CONFLICT, err.to_string()),
        CoreError::ProcessorError(e) => {
            tracing::error!(error = %e, "Payment processor failure");
            (StatusCode::BAD_GATEWAY, "Payment provider unavailable".to_string())
        }
        CoreError::SideEffectFailure(_) | CoreError::StoreError(_) => {
            tracing::error!(error = %err, "Internal Server Error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let processor_failed = matches!(
            &self,
            AppError::Anyhow(err) if matches!(err.downcast_ref::<CoreError>(), Some(CoreError::ProcessorError(_)))
        );
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => match err.downcast_ref::<CoreError>() {
                Some(core) => core_status(core),
                None => {
                    tracing::error!("Internal Server Error: {}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
                }
            },
        };

        let body = Json(json!({
            "error": error_message,
        }));

        let mut response = (status, body).into_response();
        if processor_failed {
            response.extensions_mut().insert(ProcessorFailure);
        }
        response
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideline_core::payment::ProcessorError;

    fn status_of(err: CoreError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_core_errors_map_to_distinct_statuses() {
        assert_eq!(status_of(CoreError::ValidationError("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(CoreError::AuthorizationError("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(CoreError::NotFoundError("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(CoreError::ConflictError("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(CoreError::PaymentSetupIncomplete), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(CoreError::StoreError("db down".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_only_processor_errors_are_tagged() {
        let processor = AppError::from(CoreError::ProcessorError(ProcessorError::Transient("503".into())))
            .into_response();
        assert_eq!(processor.status(), StatusCode::BAD_GATEWAY);
        assert!(processor.extensions().get::<ProcessorFailure>().is_some());

        let store = AppError::from(CoreError::StoreError("db down".into())).into_response();
        assert!(store.extensions().get::<ProcessorFailure>().is_none());
    }
}
