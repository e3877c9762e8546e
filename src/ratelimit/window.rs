//! Fixed-window evaluation.
//!
//! Everything in this module is pure: it takes the stored window (if any)
//! and the current time, and returns the decision together with the state
//! that should be written back. Reading and writing the store is the
//! caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One counter row, keyed by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    /// Unique key, e.g. `login:ip:203.0.113.4`
    pub key: String,
    /// Events observed in the current window (always >= 1)
    pub count: u64,
    /// When the current window opened
    pub window_start: DateTime<Utc>,
    /// Window length chosen when the window was last opened
    pub window_seconds: u64,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl RateWindow {
    /// Open a fresh window with a count of one.
    pub fn open(key: impl Into<String>, now: DateTime<Utc>, window_seconds: u64) -> Self {
        Self {
            key: key.into(),
            count: 1,
            window_start: now,
            window_seconds,
            updated_at: now,
        }
    }

    /// Whole seconds since the window opened, floored. Negative if the clock
    /// moved backwards.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.window_start).num_milliseconds().div_euclid(1000)
    }

    /// Whether the window has run its full stored length.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = self.elapsed_seconds(now);
        elapsed >= 0 && elapsed as u64 >= self.window_seconds
    }

    /// Seconds left until the window expires, never more than its length.
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = self.elapsed_seconds(now).max(0) as u64;
        self.window_seconds.saturating_sub(elapsed)
    }

    fn reopened(&self, now: DateTime<Utc>, window_seconds: u64) -> Self {
        Self::open(self.key.clone(), now, window_seconds)
    }

    fn incremented(&self, now: DateTime<Utc>) -> Self {
        Self {
            count: self.count.saturating_add(1),
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Quota left in the current window after this request
    pub remaining: u64,
    /// Seconds until a denied caller may retry
    pub retry_after_seconds: Option<u64>,
}

impl Verdict {
    /// An admitted request.
    pub fn admit(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_seconds: None,
        }
    }

    /// A denied request.
    pub fn deny(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

/// The store mutation implied by an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// No row existed; insert this one.
    Open(RateWindow),
    /// The stored row expired; overwrite it with this fresh window.
    Reopen(RateWindow),
    /// The stored row is live; overwrite it with the incremented count.
    Increment(RateWindow),
    /// Nothing changed.
    Unchanged,
}

impl Transition {
    /// The window to persist, if any.
    pub fn window(&self) -> Option<&RateWindow> {
        match self {
            Transition::Open(w) | Transition::Reopen(w) | Transition::Increment(w) => Some(w),
            Transition::Unchanged => None,
        }
    }

    /// The count the key holds once this transition is applied.
    pub fn count(&self) -> Option<u64> {
        self.window().map(|w| w.count)
    }
}

/// Decide a request against the stored window for `key`.
///
/// Expiry is judged against the stored window length. The requested
/// `window_seconds` only applies when a window is (re)opened. Denials leave
/// the stored state untouched.
pub fn evaluate(
    existing: Option<&RateWindow>,
    key: &str,
    now: DateTime<Utc>,
    limit: u64,
    window_seconds: u64,
) -> (Verdict, Transition) {
    let Some(window) = existing else {
        return (
            Verdict::admit(limit.saturating_sub(1)),
            Transition::Open(RateWindow::open(key, now, window_seconds)),
        );
    };

    if window.is_expired(now) {
        return (
            Verdict::admit(limit.saturating_sub(1)),
            Transition::Reopen(window.reopened(now, window_seconds)),
        );
    }

    if window.count >= limit {
        return (
            Verdict::deny(window.seconds_until_reset(now)),
            Transition::Unchanged,
        );
    }

    let next = window.incremented(now);
    (
        Verdict::admit(limit.saturating_sub(next.count)),
        Transition::Increment(next),
    )
}

/// Count an event against `key` with no limit attached.
///
/// Same open and reopen rules as [`evaluate`], but a live window is always
/// incremented.
pub fn touch(
    existing: Option<&RateWindow>,
    key: &str,
    now: DateTime<Utc>,
    window_seconds: u64,
) -> Transition {
    match existing {
        None => Transition::Open(RateWindow::open(key, now, window_seconds)),
        Some(window) if window.is_expired(now) => {
            Transition::Reopen(window.reopened(now, window_seconds))
        }
        Some(window) => Transition::Increment(window.incremented(now)),
    }
}
