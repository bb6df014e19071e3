//! In-memory snapshot store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Direction, Snapshot};
use crate::storage::{CacheKey, KeyGuard, KeyLocks, SnapshotStore, ensure_key};

/// Store that keeps baselines in process memory.
///
/// Clones share the same slots, so a test can hand one clone to a cycle and
/// inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<BTreeMap<CacheKey, Snapshot>>>,
    locks: KeyLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, BTreeMap<CacheKey, Snapshot>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current baseline for a key, if any.
    pub fn get(&self, airport: &str, direction: Direction) -> Option<Snapshot> {
        self.slots().get(&CacheKey::new(airport, direction)).cloned()
    }

    /// Seed a baseline directly.
    pub fn insert(&self, snapshot: Snapshot) {
        self.slots().insert(CacheKey::of(&snapshot), snapshot);
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, airport: &str, direction: Direction) -> Result<Option<Snapshot>> {
        Ok(self.get(airport, direction))
    }

    async fn save(&self, airport: &str, direction: Direction, snapshot: &Snapshot) -> Result<()> {
        let key = CacheKey::new(airport, direction);
        ensure_key(&key, snapshot)?;
        self.slots().insert(key, snapshot.clone());
        Ok(())
    }

    async fn lock(&self, airport: &str, direction: Direction) -> Result<KeyGuard> {
        Ok(self.locks.acquire(&CacheKey::new(airport, direction)).await)
    }
}
