//! Admission flow for credential-bearing requests.
//!
//! Every signup or login is checked against an IP-scoped window and then an
//! identity-scoped window before the identity provider is called. Failed
//! logins are counted per identity and answered only after a growing delay.
//!
//! [`AccessGuard::login`] and [`AccessGuard::signup`] are for route handlers
//! that embed this crate and bring their own [`IdentityProvider`]. The HTTP
//! service only exposes the admission checks and the login reports.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::ratelimit::{
    FailedLoginTracker, Flow, IdentityKey, LimitPolicy, RateKey, RateLimitDecision, RateLimitGate,
};

/// A session issued by the identity provider. Its contents are opaque here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
}

/// Errors reported by an identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credentials rejected")]
    Rejected,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// The hosted authentication service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify credentials and issue a session.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Register a new account.
    async fn sign_up(&self, email: &str, password: &str) -> Result<(), IdentityError>;
}

/// Why a guarded request was turned away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    /// One of the windows is full. Which one is deliberately not reported.
    #[error("too many requests")]
    RateLimited(RateLimitDecision),

    /// The identity provider rejected the credentials.
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Result of a signup that passed the rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOutcome {
    /// The account was created.
    Created,
    /// The provider refused, but the caller is told the same thing as on
    /// success so existing accounts cannot be probed.
    Accepted,
}

/// Failure count and the delay the caller should wait before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginFailure {
    pub fail_count: u64,
    pub delay: Duration,
}

/// Rate limits, backoff and identity checks wired together.
#[derive(Clone)]
pub struct AccessGuard {
    gate: RateLimitGate,
    tracker: FailedLoginTracker,
    policy: Arc<LimitPolicy>,
}

impl AccessGuard {
    pub fn new(gate: RateLimitGate, tracker: FailedLoginTracker, policy: LimitPolicy) -> Self {
        Self {
            gate,
            tracker,
            policy: Arc::new(policy),
        }
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Check the IP window, then the identity window, for `flow`.
    ///
    /// The first denial short-circuits, so a denied IP never touches the
    /// identity window.
    pub async fn admit(
        &self,
        flow: Flow,
        ip: &str,
        identity: &IdentityKey,
    ) -> Result<(), GuardError> {
        let (ip_rule, email_rule) = self.policy.rules(flow);

        let ip_key = RateKey::ip(flow, ip);
        let decision = self.gate.check_rule(ip_key.as_str(), &ip_rule).await;
        if !decision.allowed {
            info!(flow = %flow, "Request rate limited");
            return Err(GuardError::RateLimited(decision));
        }

        let email_key = RateKey::email(flow, identity);
        let decision = self.gate.check_rule(email_key.as_str(), &email_rule).await;
        if !decision.allowed {
            info!(flow = %flow, "Request rate limited");
            return Err(GuardError::RateLimited(decision));
        }

        Ok(())
    }

    /// Count a failed login and compute the delay to apply before answering.
    pub async fn report_login_failure(&self, identity: &IdentityKey) -> LoginFailure {
        let (fail_count, delay) = self.tracker.record_and_delay(identity).await;
        LoginFailure { fail_count, delay }
    }

    /// Clear the failure history after a successful login.
    pub async fn report_login_success(&self, identity: &IdentityKey) {
        self.tracker.clear_failed_login(identity).await;
    }

    /// Run a full login: rate limits, credential check, backoff on failure.
    ///
    /// The response after a failed login is delayed and identical whether or
    /// not the account exists.
    pub async fn login(
        &self,
        provider: &dyn IdentityProvider,
        ip: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, GuardError> {
        let identity = IdentityKey::from_email(email);
        self.admit(Flow::Login, ip, &identity).await?;

        match provider.sign_in(email, password).await {
            Ok(session) => {
                self.report_login_success(&identity).await;
                Ok(session)
            }
            Err(e) => {
                let failure = self.report_login_failure(&identity).await;
                debug!(
                    error = %e,
                    fail_count = failure.fail_count,
                    delay_ms = failure.delay.as_millis() as u64,
                    "Login failed, backing off"
                );
                if !failure.delay.is_zero() {
                    tokio::time::sleep(failure.delay).await;
                }
                Err(GuardError::InvalidCredentials)
            }
        }
    }

    /// Run a signup: rate limits, then account creation.
    pub async fn signup(
        &self,
        provider: &dyn IdentityProvider,
        ip: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupOutcome, GuardError> {
        let identity = IdentityKey::from_email(email);
        self.admit(Flow::Signup, ip, &identity).await?;

        match provider.sign_up(email, password).await {
            Ok(()) => Ok(SignupOutcome::Created),
            Err(e) => {
                debug!(error = %e, "Signup refused by identity provider");
                Ok(SignupOutcome::Accepted)
            }
        }
    }
}
