//! Custom error types for the guard service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::LockInfo;

/// Custom error type for the guard service
#[derive(Error, Debug)]
pub enum GuardError {
    /// Caller broke the call contract (missing user id, empty token, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    /// Policy outcome surfaced to the client, not an internal failure;
    /// `at` is the server time of the request that hit the lock
    #[error("Account locked until {}", .lock.until)]
    AccountLocked { lock: LockInfo, at: DateTime<Utc> },

    /// Device velocity could not be evaluated; the login must not proceed
    #[error("Lock evaluation failed: {0}")]
    LockEvaluation(#[source] DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            GuardError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            GuardError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }))
            }
            GuardError::Forbidden => (StatusCode::FORBIDDEN, json!({ "error": "Forbidden" })),
            GuardError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "Not found" })),
            GuardError::AccountLocked { lock, at } => (StatusCode::LOCKED, locked_body(lock, *at)),
            GuardError::LockEvaluation(e) => {
                error!("Refusing login, lock evaluation failed: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "Security check unavailable, try again shortly" }),
                )
            }
            GuardError::Store(e) => {
                error!("Store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Body for a 423 answer: enough for the client to explain the lock
pub fn locked_body(lock: &LockInfo, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "error": "account_locked",
        "lock_until": lock.until,
        "lock_reason": lock.reason,
        "remaining_seconds": lock.remaining_seconds(now),
    })
}

/// Type alias for guard results
pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn locked_body_counts_down_from_the_request_time() {
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap();
        let lock = LockInfo {
            until: at + Duration::hours(2),
            reason: "manual review".to_string(),
        };

        let body = locked_body(&lock, at);

        assert_eq!(body["error"], "account_locked");
        assert_eq!(body["remaining_seconds"], 7200);
        assert_eq!(body["lock_reason"], "manual review");
    }

    #[test]
    fn account_locked_answers_423() {
        let at = Utc::now();
        let error = GuardError::AccountLocked {
            lock: LockInfo {
                until: at + Duration::minutes(5),
                reason: "device limit".to_string(),
            },
            at,
        };

        assert_eq!(error.into_response().status(), StatusCode::LOCKED);
    }
}
