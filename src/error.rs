//! Error handling module
//!
//! Centralized error types, namespaced error codes and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::queue::QueueError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// A namespaced error definition (`FEATURE.REASON`).
///
/// `messages` holds language keys; the registry resolves them to localized
/// strings when the error is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub key: &'static str,
    pub status: StatusCode,
    pub messages: &'static [&'static str],
}

impl ErrorCode {
    pub const fn new(
        key: &'static str,
        status: StatusCode,
        messages: &'static [&'static str],
    ) -> Self {
        Self {
            key,
            status,
            messages,
        }
    }

    pub const fn bad_request(key: &'static str, messages: &'static [&'static str]) -> Self {
        Self::new(key, StatusCode::BAD_REQUEST, messages)
    }

    /// Namespace part of the key (`PROGRAM` for `PROGRAM.BAD_REQUEST_...`)
    pub fn prefix(&self) -> &'static str {
        self.key.split_once('.').map(|(prefix, _)| prefix).unwrap_or(self.key)
    }
}

/// Errors shared by every feature
pub mod global {
    use super::ErrorCode;
    use axum::http::StatusCode;

    pub const BAD_REQUEST_VALIDATION: ErrorCode =
        ErrorCode::bad_request("GLOBAL.BAD_REQUEST_VALIDATION", &["VALIDATION_FAILED"]);

    pub const UNAUTHORIZED: ErrorCode =
        ErrorCode::new("GLOBAL.UNAUTHORIZED", StatusCode::UNAUTHORIZED, &["UNAUTHORIZED"]);

    pub const FORBIDDEN: ErrorCode =
        ErrorCode::new("GLOBAL.FORBIDDEN", StatusCode::FORBIDDEN, &["FORBIDDEN"]);

    pub const NOT_FOUND: ErrorCode =
        ErrorCode::new("GLOBAL.NOT_FOUND", StatusCode::NOT_FOUND, &["NOT_FOUND"]);

    pub const INTERNAL_SERVER_ERROR: ErrorCode = ErrorCode::new(
        "GLOBAL.INTERNAL_SERVER_ERROR",
        StatusCode::INTERNAL_SERVER_ERROR,
        &["INTERNAL_SERVER_ERROR"],
    );

    pub const ERRORS: &[ErrorCode] = &[
        BAD_REQUEST_VALIDATION,
        UNAUTHORIZED,
        FORBIDDEN,
        NOT_FOUND,
        INTERNAL_SERVER_ERROR,
    ];

    pub const STRINGS: &[(&str, &str)] = &[
        ("VALIDATION_FAILED", "The request contains invalid fields."),
        ("UNAUTHORIZED", "You must be signed in to do that."),
        ("FORBIDDEN", "You do not have permission to do that."),
        ("NOT_FOUND", "The requested endpoint does not exist."),
        ("INTERNAL_SERVER_ERROR", "Something went wrong. Please try again later."),
    ];
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A registered, namespaced client error
    #[error("{}", .0.key)]
    Coded(ErrorCode),

    /// Every violation found while validating the request arguments
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ErrorCode> for AppError {
    fn from(code: ErrorCode) -> Self {
        AppError::Coded(code)
    }
}

impl AppError {
    /// The registered code this error renders as
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Coded(code) => *code,
            AppError::Validation(_) => global::BAD_REQUEST_VALIDATION,
            AppError::Unauthorized(_) => global::UNAUTHORIZED,
            AppError::Forbidden(_) => global::FORBIDDEN,
            AppError::Database(_) | AppError::Queue(_) | AppError::Internal(_) => {
                global::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub messages: Vec<String>,
}

impl ErrorBody {
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            status: code.status.as_u16(),
            error: code.key.to_string(),
            messages: code.messages.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Marks a response whose message keys should be localized by the registry
#[derive(Debug, Clone, Copy)]
pub struct LocalizeMessages(pub ErrorCode);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let localize = !matches!(self, AppError::Validation(_));

        let body = match self {
            AppError::Validation(violations) => ErrorBody {
                status: code.status.as_u16(),
                error: code.key.to_string(),
                messages: violations,
            },
            AppError::Unauthorized(reason) => {
                tracing::debug!(reason = %reason, "Rejected unauthenticated request");
                ErrorBody::from_code(code)
            }
            AppError::Forbidden(reason) => {
                tracing::debug!(reason = %reason, "Rejected forbidden request");
                ErrorBody::from_code(code)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                ErrorBody::from_code(code)
            }
            AppError::Queue(e) => {
                tracing::error!("Queue error: {}", e);
                ErrorBody::from_code(code)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorBody::from_code(code)
            }
            AppError::Coded(_) => ErrorBody::from_code(code),
        };

        let mut response = (code.status, Json(body)).into_response();
        if localize {
            response.extensions_mut().insert(LocalizeMessages(code));
        }
        response
    }
}
