use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message prefix the store uses when a procedure handle is not registered.
pub const NOSCRIPT_PREFIX: &str = "NOSCRIPT";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ThrottlerError {
    /// Malformed strategy identifier
    #[error("Format error: {0}")]
    Format(String),

    /// Well-formed strategy identifier with an unrecognized unit or period name
    #[error("Unknown period: {0}")]
    UnknownPeriod(String),

    /// Strategy id that the configured strategy set has no entry for
    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    /// Rejected caller input (identity, limit value)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store unreachable or failed at the transport level
    #[error("Store error: {0}")]
    Store(String),

    /// Store replied with an unexpected payload shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No live counter record for the identity/strategy pair
    #[error("No record for key '{0}'")]
    NoRecord(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl ThrottlerError {
    /// True when the store no longer recognizes the cached procedure handle.
    pub fn is_unknown_procedure(&self) -> bool {
        matches!(self, ThrottlerError::Store(msg) if msg.starts_with(NOSCRIPT_PREFIX))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::Format(_)
            | ThrottlerError::UnknownPeriod(_)
            | ThrottlerError::InvalidStrategy(_)
            | ThrottlerError::Validation(_) => StatusCode::BAD_REQUEST,
            ThrottlerError::NoRecord(_) => StatusCode::NOT_FOUND,
            ThrottlerError::Store(_) | ThrottlerError::Protocol(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ThrottlerError::Format(_) => "format_error",
            ThrottlerError::UnknownPeriod(_) => "unknown_period",
            ThrottlerError::InvalidStrategy(_) => "invalid_strategy",
            ThrottlerError::Validation(_) => "validation_error",
            ThrottlerError::Store(_) => "store_error",
            ThrottlerError::Protocol(_) => "protocol_error",
            ThrottlerError::NoRecord(_) => "no_record",
        }
    }
}

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::NoScriptError {
            ThrottlerError::Store(format!("{} {}", NOSCRIPT_PREFIX, err))
        } else {
            ThrottlerError::Store(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        Self::new(err.kind(), &err.to_string(), err.status_code().as_u16())
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(target: "fixed_window_limiter::error", error = %self, "Request failed");
        }
        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}
