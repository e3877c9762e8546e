//! Configuration management for Turnstile.
//!
//! Values come from an optional YAML file, then `TURNSTILE__*` environment
//! variables (`TURNSTILE__LIMITS__LOGIN_IP__LIMIT=50`), then defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::LimitPolicy;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Per-call-site limits
    #[serde(default)]
    pub limits: LimitPolicy,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which counter store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; counters are lost on restart
    Memory,
    /// SQLite database at `database_url`
    Sqlite,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Connection string for the SQLite backend
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Pool size for the SQLite backend
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_database_url() -> String {
    "sqlite://turnstile.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl TurnstileConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("TURNSTILE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Sqlite && self.store.database_url.trim().is_empty() {
            return Err(TurnstileError::Config(
                "store.database_url is required for the sqlite backend".to_string(),
            ));
        }
        self.limits.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateLimitRule;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.limits, LimitPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  bind_addr: "0.0.0.0:9000"
store:
  backend: sqlite
  database_url: "sqlite:///var/lib/turnstile/counters.db"
limits:
  signup_ip:
    limit: 10
    window_seconds: 900
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.limits.signup_ip, RateLimitRule::new(10, 900));
        assert_eq!(config.limits.signup_email, RateLimitRule::new(3, 3600));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let yaml = r#"
limits:
  login_email:
    limit: 0
    window_seconds: 600
"#;
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir()
            .join(format!("turnstile-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "limits:\n  login_ip:\n    limit: 42\n    window_seconds: 60").unwrap();
        drop(file);

        let config = TurnstileConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limits.login_ip, RateLimitRule::new(42, 60));
        assert_eq!(config.limits.login_email, RateLimitRule::new(10, 600));
    }
}
