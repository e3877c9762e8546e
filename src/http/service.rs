//! HTTP handlers for the admission service.
//!
//! Route handlers of the API call these endpoints before doing any expensive
//! work, and report login outcomes back so failed attempts are slowed down.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};

use super::envelope::{ApiError, Data};
use crate::guard::AccessGuard;
use crate::ratelimit::{client_ip_from_headers, Flow, IdentityKey, RateLimitDecision, RateLimitRule};

/// Shared application state.
pub struct AppState {
    pub guard: AccessGuard,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Ad-hoc check against an arbitrary key.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub key: String,
    pub limit: u64,
    pub window_seconds: u64,
}

/// A request naming the identity it concerns.
#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct Admitted {
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub fail_count: u64,
    pub delay_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    pub cleared: bool,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ratelimit/check", post(check))
        .route("/v1/guard/signup", post(guard_signup))
        .route("/v1/guard/login", post(guard_login))
        .route("/v1/guard/login/failure", post(login_failure))
        .route("/v1/guard/login/success", post(login_success))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "turnstile",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn parse<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::InvalidInput(e.body_text()))
}

fn identity_of(req: &IdentityRequest) -> Result<IdentityKey, ApiError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidInput("email must be an email address".to_string()));
    }
    Ok(IdentityKey::from_email(email))
}

/// Count a request against an arbitrary key.
#[instrument(skip(state, payload))]
pub async fn check(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Data<RateLimitDecision>, ApiError> {
    let req = parse(payload)?;
    if req.key.trim().is_empty() {
        return Err(ApiError::InvalidInput("key is required".to_string()));
    }
    RateLimitRule::new(req.limit, req.window_seconds)
        .validate("request")
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let decision = state
        .guard
        .gate()
        .check(&req.key, req.limit, req.window_seconds)
        .await;

    debug!(key = %req.key, allowed = decision.allowed, "Rate limit decision made");
    if decision.allowed {
        Ok(Data { data: decision })
    } else {
        Err(ApiError::RateLimited(decision))
    }
}

async fn admit_flow(
    state: &AppState,
    flow: Flow,
    headers: &HeaderMap,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Data<Admitted>, ApiError> {
    let req = parse(payload)?;
    let identity = identity_of(&req)?;
    let ip = client_ip_from_headers(headers);

    state.guard.admit(flow, &ip, &identity).await?;
    Ok(Data {
        data: Admitted { allowed: true },
    })
}

/// Admission check for a signup attempt.
pub async fn guard_signup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Data<Admitted>, ApiError> {
    admit_flow(&state, Flow::Signup, &headers, payload).await
}

/// Admission check for a login attempt.
pub async fn guard_login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Data<Admitted>, ApiError> {
    admit_flow(&state, Flow::Login, &headers, payload).await
}

/// Record a failed login. The caller applies the returned delay before
/// answering its own client.
pub async fn login_failure(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Data<FailureReport>, ApiError> {
    let req = parse(payload)?;
    let identity = identity_of(&req)?;

    let failure = state.guard.report_login_failure(&identity).await;
    info!(fail_count = failure.fail_count, "Failed login recorded");

    Ok(Data {
        data: FailureReport {
            fail_count: failure.fail_count,
            delay_ms: failure.delay.as_millis() as u64,
        },
    })
}

/// Clear failed-login history after a successful login.
pub async fn login_success(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Data<Cleared>, ApiError> {
    let req = parse(payload)?;
    let identity = identity_of(&req)?;

    state.guard.report_login_success(&identity).await;
    Ok(Data {
        data: Cleared { cleared: true },
    })
}
