use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type CounterResult<T> = Result<T, CounterError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CounterError {
    #[error("remote store connection failed: {0}")]
    Connection(String),
    #[error("remote store command failed: {0}")]
    Command(String),
    #[error("remote store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("counter strategy failed: {0}")]
    Strategy(String),
    #[error("local counter store failed: {0}")]
    LocalStore(String),
    #[error("unknown period: {0}")]
    UnknownPeriod(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl CounterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Command(_) => "command_error",
            Self::Timeout(_) => "timeout",
            Self::Strategy(_) => "strategy_error",
            Self::LocalStore(_) => "local_store_error",
            Self::UnknownPeriod(_) => "unknown_period",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownPeriod(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Connection(_) | Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Command(_) | Self::Strategy(_) | Self::LocalStore(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CounterError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.code(),
            message: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

impl From<redis::RedisError> for CounterError {
    fn from(err: redis::RedisError) -> Self {
        let connection_failure = err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
            || err.kind() == redis::ErrorKind::AuthenticationFailed;
        if connection_failure {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CounterError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_http_status() {
        assert_eq!(
            CounterError::UnknownPeriod("week".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CounterError::Timeout(Duration::from_millis(50)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            CounterError::Strategy("disk full".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn classifies_redis_errors() {
        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(CounterError::from(io), CounterError::Connection(_)));

        let auth = redis::RedisError::from((redis::ErrorKind::AuthenticationFailed, "bad password"));
        assert!(matches!(CounterError::from(auth), CounterError::Connection(_)));

        let typed = redis::RedisError::from((redis::ErrorKind::TypeError, "not an integer"));
        assert!(matches!(CounterError::from(typed), CounterError::Command(_)));
    }
}
