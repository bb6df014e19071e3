//! Per-key mutual exclusion for cache slots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::CacheKey;

/// Held for the duration of one cycle on a key.
///
/// Dropping the guard releases the in-process lock and removes the lock
/// file, if one was taken.
#[derive(Debug)]
pub struct KeyGuard {
    key: CacheKey,
    _local: OwnedMutexGuard<()>,
    lock_file: Option<PathBuf>,
}

impl KeyGuard {
    pub(crate) fn new(key: CacheKey, local: OwnedMutexGuard<()>) -> Self {
        Self {
            key,
            _local: local,
            lock_file: None,
        }
    }

    pub(crate) fn with_lock_file(mut self, path: PathBuf) -> Self {
        self.lock_file = Some(path);
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        if let Some(path) = self.lock_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove lock file {}: {}", path.display(), e);
            }
        }
    }
}

/// Table of async mutexes, one per key, created on first use.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    slots: Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key` within this process.
    pub async fn acquire(&self, key: &CacheKey) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        KeyGuard::new(key.clone(), slot.lock_owned().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyLocks::new();
        let key = CacheKey::new("NGO", Direction::Departure);

        let guard = locks.acquire(&key).await;
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&key)).await;
        assert!(waiting.is_err());

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&key)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_directions_do_not_block_each_other() {
        let locks = KeyLocks::new();
        let _dep = locks
            .acquire(&CacheKey::new("NGO", Direction::Departure))
            .await;
        let arr = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&CacheKey::new("NGO", Direction::Arrival)),
        )
        .await;
        assert!(arr.is_ok());
    }
}
