//! Failed-login backoff tracking.
//!
//! Failures are counted per identity in a fixed window. The count never
//! denies anything by itself; callers turn it into a delay that slows down
//! repeated guessing against the same account.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::clock::Clock;
use super::gate::persist;
use super::keys::{IdentityKey, RateKey};
use super::policy::BackoffPolicy;
use super::window::touch;
use crate::store::CounterStore;

/// Per-identity failure counter.
#[derive(Clone)]
pub struct FailedLoginTracker {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
}

impl FailedLoginTracker {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, policy: BackoffPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Count one failed login and return the failures in the current window.
    ///
    /// Best-effort: if the store cannot be read the failure is treated as the
    /// first one, and a failed write still returns the computed count.
    pub async fn record_failed_login(&self, identity: &IdentityKey) -> u64 {
        let key = RateKey::failed_login(identity);

        let existing = match self.store.get(key.as_str()).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter store read failed, backoff under-counts");
                return 1;
            }
        };

        let now = self.clock.now();
        let transition = touch(existing.as_ref(), key.as_str(), now, self.policy.window_seconds);
        let fail_count = transition.count().unwrap_or(1);
        debug!(key = %key, fail_count, "Recorded failed login");

        if let Err(e) = persist(&self.store, transition).await {
            warn!(key = %key, error = %e, "Failed to persist failed login");
        }

        fail_count
    }

    /// Record a failure and return the count together with the delay to apply.
    pub async fn record_and_delay(&self, identity: &IdentityKey) -> (u64, Duration) {
        let fail_count = self.record_failed_login(identity).await;
        (fail_count, self.policy.delay_for(fail_count))
    }

    /// Forget every failure recorded for this identity.
    pub async fn clear_failed_login(&self, identity: &IdentityKey) {
        let key = RateKey::failed_login(identity);

        match self.store.delete(key.as_str()).await {
            Ok(()) => debug!(key = %key, "Cleared failed logins"),
            Err(e) => warn!(key = %key, error = %e, "Failed to clear failed logins"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, FailedLoginTracker) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let tracker =
            FailedLoginTracker::new(store.clone(), clock.clone(), BackoffPolicy::default());
        (store, clock, tracker)
    }

    #[tokio::test]
    async fn test_counts_and_delays_escalate() {
        let (_store, clock, tracker) = setup();
        let identity = IdentityKey::from_email("eve@example.com");

        let mut counts = Vec::new();
        let mut delays = Vec::new();
        for _ in 0..7 {
            let (count, delay) = tracker.record_and_delay(&identity).await;
            counts.push(count);
            delays.push(delay.as_millis() as u64);
            clock.advance_secs(5);
        }

        assert_eq!(counts, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(delays, vec![400, 800, 1200, 1600, 2000, 2400, 2400]);
    }

    #[tokio::test]
    async fn test_clear_starts_fresh_window() {
        let (store, _clock, tracker) = setup();
        let identity = IdentityKey::from_email("eve@example.com");

        for _ in 0..4 {
            tracker.record_failed_login(&identity).await;
        }
        tracker.clear_failed_login(&identity).await;
        assert!(store.is_empty());

        assert_eq!(tracker.record_failed_login(&identity).await, 1);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let (store, clock, tracker) = setup();
        let identity = IdentityKey::from_email("eve@example.com");

        tracker.record_failed_login(&identity).await;
        tracker.record_failed_login(&identity).await;
        clock.advance_secs(600);

        assert_eq!(tracker.record_failed_login(&identity).await, 1);
        let key = RateKey::failed_login(&identity);
        let stored = store.get(key.as_str()).await.unwrap().unwrap();
        assert_eq!(stored.window_seconds, 600);
        assert_eq!(stored.window_start, clock.now());
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (_store, _clock, tracker) = setup();
        let alice = IdentityKey::from_email("alice@example.com");
        let bob = IdentityKey::from_email("bob@example.com");

        tracker.record_failed_login(&alice).await;
        tracker.record_failed_login(&alice).await;

        assert_eq!(tracker.record_failed_login(&bob).await, 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_not_fatal() {
        let (store, _clock, tracker) = setup();
        let identity = IdentityKey::from_email("eve@example.com");

        store.set_unavailable(true);
        assert_eq!(tracker.record_failed_login(&identity).await, 1);
        tracker.clear_failed_login(&identity).await;

        store.set_unavailable(false);
        store.set_write_failure(true);
        assert_eq!(tracker.record_failed_login(&identity).await, 1);
        assert!(store.is_empty());
    }
}
