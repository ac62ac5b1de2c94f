//! Storage backends for participant records.
//!
//! A [`RecordBackend`] is a flat string-to-string map scoped to the users
//! collection. The [`UserStore`](crate::UserStore) handles encoding,
//! get-or-create, and locking; backends only move bytes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::StoreError;

/// A key-value collection holding one serialized record per key.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Read the raw value stored under `key`, if any.
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite the value stored under `key`.
    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-process backend used by tests and by replays without Redis.
///
/// The backend can be switched into an unavailable state, in which every
/// call fails with [`StoreError::Unavailable`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored key-value pair.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(String::from(
                "memory backend marked unavailable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("poisoned memory backend: {e}")))?;
        Ok(entries.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("poisoned memory backend: {e}")))?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_fetch() {
        let backend = MemoryBackend::new();
        backend.store("1", "{}").await.unwrap();
        assert_eq!(backend.fetch("1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(backend.fetch("2").await.unwrap(), None);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_rejects_calls() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        assert!(matches!(
            backend.fetch("1").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(backend.store("1", "{}").await.is_err());

        backend.set_unavailable(false);
        assert!(backend.store("1", "{}").await.is_ok());
    }
}
