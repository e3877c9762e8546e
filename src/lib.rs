//! Turnstile - signup and login admission control
//!
//! This crate implements the rate limiting and brute-force mitigation core of
//! the contact-management API: fixed-window counters keyed by client address
//! or hashed identity, kept in a shared counter store, plus an escalating
//! delay for repeated failed logins. Store faults never block the endpoints
//! being protected; the gate fails open.

pub mod config;
pub mod error;
pub mod guard;
pub mod http;
pub mod ratelimit;
pub mod store;
