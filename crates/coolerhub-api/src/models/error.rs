//! HTTP error model.
//!
//! Every failure leaves the API as `{"status": "error", "error": "..."}`,
//! the same envelope the query responder publishes on the transport.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Result type of every handler.
pub type HandlerResult<T> = Result<Json<T>, ErrorResponse>;

/// Wrap a successful handler body.
pub fn ok<T>(data: T) -> HandlerResult<T> {
    Ok(Json(data))
}

/// An error with its HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<coolerhub_storage::Error> for ErrorResponse {
    fn from(e: coolerhub_storage::Error) -> Self {
        match e {
            coolerhub_storage::Error::InvalidInput(msg) => Self::bad_request(msg),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<coolerhub_core::Error> for ErrorResponse {
    fn from(e: coolerhub_core::Error) -> Self {
        use coolerhub_core::Error;
        match &e {
            Error::MalformedPayload(_)
            | Error::MissingField { .. }
            | Error::InvalidField { .. }
            | Error::UnrecognizedAction(_)
            | Error::UnrecognizedTopic(_) => Self::bad_request(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}
