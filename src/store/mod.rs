//! Counter store backends.
//!
//! The store is a plain key-value table of [`RateWindow`] rows. Its four
//! operations are independent and non-transactional: callers read, decide,
//! then write, and accept that concurrent writers on the same key may
//! overwrite each other.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::RateWindow;

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// An insert raced with another writer for the same key.
    #[error("window already exists for key {0}")]
    Duplicate(String),

    /// An update targeted a key with no row.
    #[error("no window stored for key {0}")]
    Missing(String),

    /// A stored row could not be decoded.
    #[error("corrupt window row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage for rate windows, one row per key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the window stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError>;

    /// Insert a new window. Fails with [`StoreError::Duplicate`] if the key exists.
    async fn insert(&self, window: &RateWindow) -> Result<(), StoreError>;

    /// Overwrite the mutable fields of the window stored under `window.key`.
    async fn update(&self, window: &RateWindow) -> Result<(), StoreError>;

    /// Remove the window stored under `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
