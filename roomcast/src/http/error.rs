// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use roomcast_sfu::JoinError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    /// Machine readable failure kind, e.g. `invalid-offer`
    pub kind: Option<&'static str>,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            kind: self.kind.map(str::to_string),
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Client mistakes map to 400, server side failures to 500
impl From<JoinError> for AppError {
    fn from(err: JoinError) -> Self {
        let status = if err.kind.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(kind = %err.kind, step = ?err.step, "Join failed: {}", err.message);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        Self {
            status,
            kind: Some(err.kind.as_str()),
            message: err.message,
        }
    }
}
