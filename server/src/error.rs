//! API error type rendered as `{"error": {"code", "message"}}`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use callguard_license::protocol::{ErrorBody, ErrorCode, ErrorDetail};
use callguard_license::LicenseError;
use callguard_store::StoreError;
use thiserror::Error;

/// Result type for handlers and the license service.
pub type AppResult<T> = Result<T, AppError>;

/// Errors returned to API clients.
///
/// Internal details are logged and never sent to the client.
#[derive(Debug, Error)]
pub enum AppError {
    /// Unknown license key (404).
    #[error("license not found")]
    NotFound,

    /// License is past its expiration date (403).
    #[error("license has expired")]
    Expired,

    /// License was deactivated by an operator (403).
    #[error("license has been deactivated")]
    Deactivated,

    /// License is bound to a different machine (403).
    #[error("license is bound to different hardware")]
    UnauthorizedHardware,

    /// Malformed or out-of-range input (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or wrong admin credential (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Anything else (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            Self::Expired => (StatusCode::FORBIDDEN, ErrorCode::Expired),
            Self::Deactivated => (StatusCode::FORBIDDEN, ErrorCode::Deactivated),
            Self::UnauthorizedHardware => (StatusCode::FORBIDDEN, ErrorCode::UnauthorizedHardware),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::ValidationError),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::HardwareMismatch { .. } => Self::UnauthorizedHardware,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<LicenseError> for AppError {
    fn from(err: LicenseError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}
