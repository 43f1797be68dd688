use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::ledger::RoundNumber;
use crate::round::EngineError;

const LOG_TARGET: &str = "gem_roulette::server::error";

/// Wire-level failures. Every variant carries one code of the published
/// error taxonomy; the HTTP status follows the variant.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    BettingClosed,
    InsufficientFunds(String),
    BadSelection(String),
    OutOfRange(String),
    /// Validation failure on a mutating call (400).
    UnknownRound(RoundNumber),
    /// Lookup miss on a read (404).
    RoundNotFound(RoundNumber),
    Internal(String),
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    pub fn bad_selection(message: impl Into<String>) -> Self {
        ApiError::BadSelection(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::BettingClosed => StatusCode::CONFLICT,
            ApiError::InsufficientFunds(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::BadSelection(_) | ApiError::OutOfRange(_) | ApiError::UnknownRound(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::RoundNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::BettingClosed => "BETTING_CLOSED",
            ApiError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            ApiError::BadSelection(_) => "BAD_SELECTION",
            ApiError::OutOfRange(_) => "OUT_OF_RANGE",
            ApiError::UnknownRound(_) | ApiError::RoundNotFound(_) => "UNKNOWN_ROUND",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthenticated => "missing or invalid bearer token".into(),
            ApiError::BettingClosed => "betting is closed for the current round".into(),
            ApiError::InsufficientFunds(message)
            | ApiError::BadSelection(message)
            | ApiError::OutOfRange(message)
            | ApiError::Internal(message) => message.clone(),
            ApiError::UnknownRound(round) | ApiError::RoundNotFound(round) => {
                format!("round {round} is not available")
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::BettingClosed => ApiError::BettingClosed,
            EngineError::UnknownRound(round) => ApiError::UnknownRound(round),
            EngineError::BadSelection(message) => ApiError::BadSelection(message),
            EngineError::StakeOutOfRange { .. } => ApiError::OutOfRange(err.to_string()),
            EngineError::InsufficientFunds { .. } => ApiError::InsufficientFunds(err.to_string()),
            EngineError::Internal(message) => ApiError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(message) = &self {
            error!(target: LOG_TARGET, %message, "internal server error");
        }
        let body = ErrorBody {
            success: false,
            error: self.code(),
            message: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
