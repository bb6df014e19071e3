//! Snapshot persistence for change detection.
//!
//! One cache slot per (airport, direction) holds the last snapshot that
//! completed a cycle. Departure and arrival slots never interfere.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml
//! └── cache/
//!     ├── NGO_departure.json    # Baseline for NGO departures
//!     ├── NGO_departure.lock    # Present while a cycle holds the key
//!     └── NGO_arrival.json
//! ```

pub mod local;
pub mod lock;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::models::{Direction, FlightRecord, Snapshot};

// Re-export for convenience
pub use local::LocalStorage;
pub use lock::{KeyGuard, KeyLocks};
pub use memory::MemoryStore;

/// Current on-disk cache format.
pub const CACHE_VERSION: u32 = 1;

/// Address of one cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub airport: String,
    pub direction: Direction,
}

impl CacheKey {
    pub fn new(airport: &str, direction: Direction) -> Self {
        Self {
            airport: airport.trim().to_uppercase(),
            direction,
        }
    }

    /// Key of an existing snapshot.
    pub fn of(snapshot: &Snapshot) -> Self {
        Self::new(&snapshot.airport, snapshot.direction)
    }

    /// File stem used by file-backed stores.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.airport, self.direction)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.airport, self.direction)
    }
}

/// Persisted form of a baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub key: CacheKey,
    /// Hex SHA-256 over the serialized records
    pub checksum: String,
    pub saved_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

impl CacheEntry {
    pub fn new(snapshot: Snapshot) -> Result<Self> {
        Ok(Self {
            version: CACHE_VERSION,
            key: CacheKey::of(&snapshot),
            checksum: checksum(&snapshot.records)?,
            saved_at: Utc::now(),
            snapshot,
        })
    }

    /// Check format version, key and checksum.
    pub fn verify(&self, expected: &CacheKey) -> Result<()> {
        if self.version != CACHE_VERSION {
            return Err(AppError::store(format!(
                "cache entry for {} has unsupported version {}",
                expected, self.version
            )));
        }
        if &self.key != expected || CacheKey::of(&self.snapshot) != *expected {
            return Err(AppError::store(format!(
                "cache entry for {} is keyed as {}",
                expected, self.key
            )));
        }
        let actual = checksum(&self.snapshot.records)?;
        if actual != self.checksum {
            return Err(AppError::store(format!(
                "cache entry for {} failed checksum verification",
                expected
            )));
        }
        Ok(())
    }
}

/// Fingerprint of a record list.
pub fn checksum(records: &[FlightRecord]) -> Result<String> {
    let bytes = serde_json::to_vec(records)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Reject a snapshot that does not belong to the slot it is saved under.
pub(crate) fn ensure_key(key: &CacheKey, snapshot: &Snapshot) -> Result<()> {
    let own = CacheKey::of(snapshot);
    if own != *key {
        return Err(AppError::validation(format!(
            "snapshot for {own} cannot be saved under {key}"
        )));
    }
    Ok(())
}

/// Keyed store of the last seen snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the baseline for a key.
    ///
    /// `None` means the key was never saved, which is different from a
    /// saved snapshot with no records.
    async fn load(&self, airport: &str, direction: Direction) -> Result<Option<Snapshot>>;

    /// Replace the baseline for a key. Readers never see a partial write.
    async fn save(&self, airport: &str, direction: Direction, snapshot: &Snapshot) -> Result<()>;

    /// Take exclusive use of a key for one load-diff-save sequence.
    async fn lock(&self, airport: &str, direction: Direction) -> Result<KeyGuard>;
}
