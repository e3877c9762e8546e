//! Request-facing fixed-window gate.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::policy::RateLimitRule;
use super::window::{evaluate, Transition, Verdict};
use crate::store::{CounterStore, StoreError};

/// Result returned to callers of [`RateLimitGate::check`].
pub type RateLimitDecision = Verdict;

/// Apply a transition to the store on a detached task.
///
/// The spawned task owns everything it needs, so the write completes even if
/// the caller's future is dropped while awaiting it.
pub(crate) async fn persist(
    store: &Arc<dyn CounterStore>,
    transition: Transition,
) -> Result<(), StoreError> {
    if matches!(transition, Transition::Unchanged) {
        return Ok(());
    }

    let store = Arc::clone(store);
    let write = tokio::spawn(async move {
        match transition {
            Transition::Open(window) => store.insert(&window).await,
            Transition::Reopen(window) | Transition::Increment(window) => {
                store.update(&window).await
            }
            Transition::Unchanged => Ok(()),
        }
    });

    write
        .await
        .map_err(|e| StoreError::Unavailable(format!("store write task failed: {}", e)))?
}

/// Admission gate over a shared counter store.
///
/// Each check is a single read followed by at most one write, with no
/// transaction around them. Concurrent checks on the same key can both read
/// the same count, so under contention the limit is a soft ceiling.
#[derive(Clone)]
pub struct RateLimitGate {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimitGate {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count a request against `key` and decide whether to admit it.
    ///
    /// Never fails: if the store cannot be read the request is admitted with
    /// the full quota reported.
    pub async fn check(&self, key: &str, limit: u64, window_seconds: u64) -> RateLimitDecision {
        trace!(key = %key, limit, window_seconds, "Checking rate limit");

        let existing = match self.store.get(key).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter store read failed, admitting request");
                return Verdict::admit(limit);
            }
        };

        let now = self.clock.now();
        let (verdict, transition) = evaluate(existing.as_ref(), key, now, limit, window_seconds);

        match &transition {
            Transition::Open(_) => debug!(key = %key, window_seconds, "Opening rate limit window"),
            Transition::Reopen(_) => {
                debug!(key = %key, window_seconds, "Reopening expired rate limit window")
            }
            Transition::Increment(w) => {
                trace!(key = %key, count = w.count, "Incrementing rate limit window")
            }
            Transition::Unchanged => debug!(
                key = %key,
                limit,
                retry_after_seconds = ?verdict.retry_after_seconds,
                "Rate limit exceeded"
            ),
        }

        if let Err(e) = persist(&self.store, transition).await {
            warn!(key = %key, error = %e, "Counter store write failed, decision stands");
        }

        verdict
    }

    /// [`RateLimitGate::check`] with a configured rule.
    pub async fn check_rule(&self, key: &str, rule: &RateLimitRule) -> RateLimitDecision {
        self.check(key, rule.limit, rule.window_seconds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::window::RateWindow;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    /// Memory store whose writes take `delay` to land.
    struct SlowWrites {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CounterStore for SlowWrites {
        async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError> {
            self.inner.get(key).await
        }

        async fn insert(&self, window: &RateWindow) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert(window).await
        }

        async fn update(&self, window: &RateWindow) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.update(window).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, RateLimitGate) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let gate = RateLimitGate::new(store.clone(), clock.clone());
        (store, clock, gate)
    }

    #[tokio::test]
    async fn test_first_call_admits_and_opens() {
        let (store, _clock, gate) = setup();

        let decision = gate.check("k", 5, 60).await;

        assert_eq!(decision, Verdict::admit(4));
        assert_eq!(store.get("k").await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_remaining_decreases_to_zero() {
        let (store, clock, gate) = setup();

        for n in 1..=5u64 {
            let decision = gate.check("k", 5, 60).await;
            assert!(decision.allowed, "Request {} should be admitted", n);
            assert_eq!(decision.remaining, 5 - n);
            clock.advance_secs(1);
        }
        assert_eq!(store.get("k").await.unwrap().unwrap().count, 5);
    }

    #[tokio::test]
    async fn test_over_limit_does_not_mutate() {
        let (store, clock, gate) = setup();

        for _ in 0..3 {
            gate.check("k", 3, 60).await;
        }
        clock.advance_secs(25);
        let before = store.get("k").await.unwrap().unwrap();

        let decision = gate.check("k", 3, 60).await;

        assert_eq!(decision, Verdict::deny(35));
        assert_eq!(store.get("k").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_fixed_window_scenario() {
        let (store, clock, gate) = setup();

        // t=0, 10, 20
        for _ in 0..3 {
            assert!(gate.check("k", 3, 60).await.allowed);
            clock.advance_secs(10);
        }
        // t=25
        clock.advance_secs(-5);
        let denied = gate.check("k", 3, 60).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_seconds, Some(35));

        // t=70
        clock.advance_secs(45);
        let reopened = gate.check("k", 3, 60).await;
        assert_eq!(reopened, Verdict::admit(2));
        assert_eq!(store.get("k").await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_read_failure_fails_open() {
        let (store, _clock, gate) = setup();
        for _ in 0..3 {
            gate.check("k", 3, 60).await;
        }

        store.set_read_failure(true);
        let decision = gate.check("k", 3, 60).await;

        assert_eq!(
            decision,
            RateLimitDecision {
                allowed: true,
                remaining: 3,
                retry_after_seconds: None,
            }
        );
    }

    #[tokio::test]
    async fn test_write_failure_keeps_admit() {
        let (store, _clock, gate) = setup();
        store.set_write_failure(true);

        let decision = gate.check("k", 3, 60).await;

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_store, _clock, gate) = setup();

        gate.check("a", 1, 60).await;
        assert!(!gate.check("a", 1, 60).await.allowed);
        assert!(gate.check("b", 1, 60).await.allowed);
    }

    #[tokio::test]
    async fn test_check_rule() {
        let (_store, _clock, gate) = setup();
        let rule = RateLimitRule::new(2, 600);

        assert_eq!(gate.check_rule("k", &rule).await.remaining, 1);
        assert_eq!(gate.check_rule("k", &rule).await.remaining, 0);
        assert_eq!(gate.check_rule("k", &rule).await.retry_after_seconds, Some(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_lands_after_caller_is_dropped() {
        let store = Arc::new(SlowWrites {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(50),
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let gate = RateLimitGate::new(store.clone(), clock);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(5), gate.check("k", 3, 60)).await;
        assert!(timed_out.is_err());
        assert!(store.inner.get("k").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.inner.get("k").await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_burst_is_a_soft_ceiling() {
        let (store, _clock, gate) = setup();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.check("shared", 8, 60).await })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;

        let admitted = results.iter().filter(|r| r.as_ref().unwrap().allowed).count();
        assert!(admitted >= 8, "at least the limit must be admitted, got {}", admitted);

        // Lost updates can leave the count low, but a write never pushes it past the limit.
        let stored = store.get("shared").await.unwrap().unwrap().count;
        assert!((1..=8).contains(&stored), "stored count {} outside 1..=8", stored);

        // Once contention ends, the ceiling holds again.
        let mut later = 0u64;
        for _ in 0..8 {
            if gate.check("shared", 8, 60).await.allowed {
                later += 1;
            }
        }
        assert_eq!(later, 8 - stored);
        assert_eq!(store.get("shared").await.unwrap().unwrap().count, 8);
    }
}
