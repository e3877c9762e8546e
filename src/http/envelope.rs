//! JSON envelopes shared by every endpoint.
//!
//! Success bodies are `{ "data": ... }`. Failures are
//! `{ "error": { "code", "message", "details" } }`, with `details` omitted
//! when there is nothing to add.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::guard::GuardError;
use crate::ratelimit::RateLimitDecision;

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

impl<T: Serialize> IntoResponse for Data<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Failed response body.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Errors surfaced at the HTTP edge.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Too many requests")]
    RateLimited(RateLimitDecision),

    /// Produced by embedders that run [`AccessGuard::login`](crate::guard::AccessGuard::login).
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    InvalidInput(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::RateLimited(decision) => serde_json::to_value(decision).ok(),
            ApiError::InvalidCredentials | ApiError::InvalidInput(_) => None,
        }
    }

    fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
                details: self.details(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.envelope())).into_response();

        if let ApiError::RateLimited(RateLimitDecision {
            retry_after_seconds: Some(secs),
            ..
        }) = self
        {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<GuardError> for ApiError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::RateLimited(decision) => ApiError::RateLimited(decision),
            GuardError::InvalidCredentials => ApiError::InvalidCredentials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rate_limited_envelope() {
        let err = ApiError::RateLimited(RateLimitDecision::deny(35));

        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(
            body,
            json!({
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "Too many requests",
                    "details": { "allowed": false, "remaining": 0, "retryAfterSeconds": 35 }
                }
            })
        );
    }

    #[test]
    fn test_invalid_credentials_envelope_has_no_details() {
        let err = ApiError::InvalidCredentials;

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let body = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(
            body,
            json!({ "error": { "code": "INVALID_CREDENTIALS", "message": "Invalid credentials" } })
        );
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::RateLimited(RateLimitDecision::deny(120)).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "120");
    }

    #[test]
    fn test_guard_error_conversion() {
        let err: ApiError = GuardError::InvalidCredentials.into();
        assert_eq!(err.code(), "INVALID_CREDENTIALS");
    }
}
