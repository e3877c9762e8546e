//! Counter key derivation.
//!
//! Raw email addresses never reach the counter store: they are reduced to a
//! SHA-256 digest first. Client addresses come from the forwarding headers
//! set by the reverse proxy.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::fmt;

/// Bucket used for every client that arrives without forwarding headers.
pub const UNKNOWN_IP: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// One-way digest of a normalized email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Hash the trimmed, lower-cased email.
    pub fn from_email(email: &str) -> Self {
        let normalized = email.trim().to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        Self(hex::encode(digest))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the client address from forwarding header values.
///
/// Takes the first entry of a non-blank `X-Forwarded-For`, then `X-Real-IP`,
/// then falls back to [`UNKNOWN_IP`].
pub fn client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    if let Some(forwarded) = forwarded_for.filter(|v| !v.trim().is_empty()) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        return if first.is_empty() {
            UNKNOWN_IP.to_string()
        } else {
            first.to_string()
        };
    }

    match real_ip.map(str::trim) {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => UNKNOWN_IP.to_string(),
    }
}

/// Resolve the client address from request headers.
pub fn client_ip_from_headers(headers: &HeaderMap) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    client_ip(header(FORWARDED_FOR), header(REAL_IP))
}

/// Credential-bearing flow a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Signup,
    Login,
}

impl Flow {
    fn prefix(self) -> &'static str {
        match self {
            Flow::Signup => "signup",
            Flow::Login => "login",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A fully formed counter store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    /// `<flow>:ip:<ip>`
    pub fn ip(flow: Flow, ip: &str) -> Self {
        Self(format!("{}:ip:{}", flow.prefix(), ip))
    }

    /// `<flow>:email:<hash>`
    pub fn email(flow: Flow, identity: &IdentityKey) -> Self {
        Self(format!("{}:email:{}", flow.prefix(), identity))
    }

    /// `login:fail:<hash>`
    pub fn failed_login(identity: &IdentityKey) -> Self {
        Self(format!("login:fail:{}", identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
