// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::{models::attempt::AttemptStatus, services::results::ResultsGate};

/// Failures raised by the storage adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate record")]
    Duplicate,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Status changes only ever leave STARTED.
    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: AttemptStatus,
        to: AttemptStatus,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reasons a late code cannot be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LateCodeRejection {
    #[error("Invalid late code")]
    Invalid,
    #[error("Late code has expired")]
    Expired,
    #[error("Late code has been deactivated")]
    Deactivated,
    #[error("Late code has no remaining uses")]
    NoRemainingUses,
    #[error("Late code is assigned to another user")]
    AssignedToAnother,
    #[error("Late code already used by this user")]
    AlreadyUsed,
}

/// Error taxonomy of the attempt and late-code services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    /// Ownership or token mismatch.
    #[error("{0}")]
    Unauthorized(String),

    /// Role mismatch.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Expired(String),

    #[error("{0}")]
    WindowClosed(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    LateCode(#[from] LateCodeRejection),

    #[error("Results are not available yet")]
    ResultsWithheld(ResultsGate),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., late code exhausted between check and use)
    Conflict(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Default HTTP mapping of service failures.
/// Handlers that need a different status for one kind match on the
/// `ServiceError` before falling back to this conversion.
impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => AppError::NotFound(msg),
            ServiceError::Unauthorized(msg)
            | ServiceError::Forbidden(msg)
            | ServiceError::InvalidState(msg)
            | ServiceError::Expired(msg)
            | ServiceError::WindowClosed(msg) => AppError::Forbidden(msg),
            ServiceError::LateCode(rejection) => AppError::Forbidden(rejection.to_string()),
            ServiceError::ResultsWithheld(_) => {
                AppError::Forbidden("Results are not available yet".to_string())
            }
            ServiceError::Validation(msg) => AppError::BadRequest(msg),
            ServiceError::Conflict(msg) => AppError::Conflict(msg),
            ServiceError::Internal(msg) => AppError::InternalServerError(msg),
        }
    }
}

/// Converts `validator` failures into `AppError::BadRequest`.
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
