//! Per-call-site limits.
//!
//! Each credential-bearing flow is guarded by two independently keyed
//! fixed windows, one per client address and one per identity. The
//! defaults below are the production limits; every value can be overridden
//! from the service configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::keys::Flow;
use crate::error::{Result, TurnstileError};

/// A limit and the window it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests admitted per window
    pub limit: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    /// Reject rules that would deny forever or never open a window.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.limit == 0 {
            return Err(TurnstileError::Config(format!(
                "{}: limit must be at least 1",
                name
            )));
        }
        if self.window_seconds == 0 {
            return Err(TurnstileError::Config(format!(
                "{}: window_seconds must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

/// Delay schedule applied after a failed login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Window the failure count accumulates in
    #[serde(default = "default_backoff_window")]
    pub window_seconds: u64,
    /// Delay added per failure
    #[serde(default = "default_backoff_step_ms")]
    pub step_ms: u64,
    /// Failure count at which the delay stops growing
    #[serde(default = "default_backoff_max_steps")]
    pub max_steps: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            window_seconds: default_backoff_window(),
            step_ms: default_backoff_step_ms(),
            max_steps: default_backoff_max_steps(),
        }
    }
}

fn default_backoff_window() -> u64 {
    600
}

fn default_backoff_step_ms() -> u64 {
    400
}

fn default_backoff_max_steps() -> u64 {
    6
}

impl BackoffPolicy {
    /// Linear delay for `fail_count` failures, capped at `max_steps` steps.
    pub fn delay_for(&self, fail_count: u64) -> Duration {
        let steps = fail_count.min(self.max_steps);
        Duration::from_millis(steps.saturating_mul(self.step_ms))
    }

    /// Longest delay this policy can produce.
    pub fn max_delay(&self) -> Duration {
        self.delay_for(self.max_steps)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_seconds == 0 {
            return Err(TurnstileError::Config(
                "failed_login: window_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Limits for every guarded call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    #[serde(default = "default_signup_ip")]
    pub signup_ip: RateLimitRule,
    #[serde(default = "default_signup_email")]
    pub signup_email: RateLimitRule,
    #[serde(default = "default_login_ip")]
    pub login_ip: RateLimitRule,
    #[serde(default = "default_login_email")]
    pub login_email: RateLimitRule,
    #[serde(default)]
    pub failed_login: BackoffPolicy,
}

fn default_signup_ip() -> RateLimitRule {
    RateLimitRule::new(5, 600)
}

fn default_signup_email() -> RateLimitRule {
    RateLimitRule::new(3, 3600)
}

fn default_login_ip() -> RateLimitRule {
    RateLimitRule::new(20, 600)
}

fn default_login_email() -> RateLimitRule {
    RateLimitRule::new(10, 600)
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            signup_ip: default_signup_ip(),
            signup_email: default_signup_email(),
            login_ip: default_login_ip(),
            login_email: default_login_email(),
            failed_login: BackoffPolicy::default(),
        }
    }
}

impl LimitPolicy {
    /// Load limits from a YAML string. Missing entries keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let policy: LimitPolicy = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse limit policy: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// The (ip, email) rules for a flow, in evaluation order.
    pub fn rules(&self, flow: Flow) -> (RateLimitRule, RateLimitRule) {
        match flow {
            Flow::Signup => (self.signup_ip, self.signup_email),
            Flow::Login => (self.login_ip, self.login_email),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.signup_ip.validate("signup_ip")?;
        self.signup_email.validate("signup_email")?;
        self.login_ip.validate("login_ip")?;
        self.login_email.validate("login_email")?;
        self.failed_login.validate()
    }
}
