//! In-process counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{CounterStore, StoreError};
use crate::ratelimit::RateWindow;

/// A counter store held in a concurrent map.
///
/// Suitable for a single instance or for tests. Reads and writes can be
/// switched to fail, which simulates a backend outage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, RateWindow>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_reads.store(unavailable, Ordering::SeqCst);
        self.fail_writes.store(unavailable, Ordering::SeqCst);
    }

    /// Make reads fail while writes keep working.
    pub fn set_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make inserts, updates and deletes fail while reads keep working.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError> {
        self.check_reads()?;
        Ok(self.windows.get(key).map(|w| w.value().clone()))
    }

    async fn insert(&self, window: &RateWindow) -> Result<(), StoreError> {
        self.check_writes()?;
        match self.windows.entry(window.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(window.key.clone())),
            Entry::Vacant(slot) => {
                slot.insert(window.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, window: &RateWindow) -> Result<(), StoreError> {
        self.check_writes()?;
        match self.windows.get_mut(&window.key) {
            Some(mut stored) => {
                *stored = window.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(window.key.clone())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_writes()?;
        self.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_insert_get_delete() {
        let store = MemoryStore::new();
        let window = RateWindow::open("login:ip:10.0.0.1", Utc::now(), 600);

        assert!(store.get(&window.key).await.unwrap().is_none());

        store.insert(&window).await.unwrap();
        assert_eq!(store.get(&window.key).await.unwrap(), Some(window.clone()));
        assert_eq!(store.len(), 1);

        store.delete(&window.key).await.unwrap();
        assert!(store.is_empty());

        // Deleting again is fine.
        store.delete(&window.key).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let window = RateWindow::open("k", Utc::now(), 60);

        store.insert(&window).await.unwrap();
        let err = store.insert(&window).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(key) if key == "k"));
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let store = MemoryStore::new();
        let mut window = RateWindow::open("k", Utc::now(), 60);

        assert!(matches!(store.update(&window).await, Err(StoreError::Missing(_))));

        store.insert(&window).await.unwrap();
        window.count = 4;
        store.update(&window).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().count, 4);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        let window = RateWindow::open("k", Utc::now(), 60);

        store.set_unavailable(true);
        assert!(matches!(store.get("k").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.insert(&window).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.delete("k").await, Err(StoreError::Unavailable(_))));

        store.set_unavailable(false);
        tokio_test::assert_ok!(store.insert(&window).await);
    }

    #[tokio::test]
    async fn test_partial_failures() {
        let store = MemoryStore::new();
        let window = RateWindow::open("k", Utc::now(), 60);

        store.set_write_failure(true);
        assert!(store.insert(&window).await.is_err());
        assert!(store.get("k").await.unwrap().is_none());

        store.set_write_failure(false);
        store.set_read_failure(true);
        store.insert(&window).await.unwrap();
        assert!(store.get("k").await.is_err());
    }
}
