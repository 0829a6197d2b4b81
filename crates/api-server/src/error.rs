//! HTTP mapping for the engine error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tractstack_core::TractError;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

pub struct ApiError(pub TractError);

impl From<TractError> for ApiError {
    fn from(err: TractError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            TractError::TenantUnknown(_) => (StatusCode::NOT_FOUND, "tenant_unknown"),
            TractError::DomainForbidden(_) => (StatusCode::FORBIDDEN, "domain_forbidden"),
            TractError::SessionUnknown(_) => (StatusCode::UNAUTHORIZED, "session_unknown"),
            TractError::BeliefUnknown(_) => (StatusCode::NOT_FOUND, "belief_unknown"),
            TractError::InvalidEvent(_) => (StatusCode::BAD_REQUEST, "invalid_event"),
            TractError::CacheMissHard(_) => (StatusCode::NOT_FOUND, "not_found"),
            TractError::SubscriberLagging(_) => (StatusCode::TOO_MANY_REQUESTS, "subscriber_lagging"),
            TractError::Persistence(_)
            | TractError::Serialization(_)
            | TractError::Io(_)
            | TractError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            metrics::counter!("api_errors").increment(1);
        }
        (
            status,
            Json(ErrorBody {
                error,
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
