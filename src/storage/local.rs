//! Local filesystem snapshot store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── {AIRPORT}_{direction}.json   # CacheEntry
//! └── {AIRPORT}_{direction}.lock   # Cross-process cycle lock
//! ```
//!
//! Writes go to `{stem}.tmp` and are renamed into place, so a reader sees
//! either the previous entry or the new one.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{Direction, Snapshot};
use crate::storage::{CacheEntry, CacheKey, KeyGuard, KeyLocks, SnapshotStore, ensure_key};

/// Default age after which a lock file is treated as abandoned.
const DEFAULT_LOCK_STALE: Duration = Duration::from_secs(900);

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    locks: KeyLocks,
    lock_stale: Duration,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            locks: KeyLocks::new(),
            lock_stale: DEFAULT_LOCK_STALE,
        }
    }

    /// Override how old a lock file must be before it is broken.
    pub fn with_lock_stale(mut self, lock_stale: Duration) -> Self {
        self.lock_stale = lock_stale;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn entry_key(key: &CacheKey) -> String {
        format!("{}.json", key.file_stem())
    }

    fn lock_key(key: &CacheKey) -> String {
        format!("{}.lock", key.file_stem())
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the raw cache entry, verified, without unwrapping the snapshot.
    pub async fn load_entry(&self, airport: &str, direction: Direction) -> Result<Option<CacheEntry>> {
        let key = CacheKey::new(airport, direction);
        let entry: Option<CacheEntry> = self
            .read_json(&Self::entry_key(&key))
            .await
            .map_err(|e| AppError::store(format!("cannot read cache for {key}: {e}")))?;

        match entry {
            Some(entry) => {
                entry.verify(&key)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Create the lock file, breaking it if abandoned.
    async fn acquire_lock_file(&self, key: &CacheKey) -> Result<PathBuf> {
        let path = self.path(&Self::lock_key(key));
        self.ensure_dir(&path).await?;

        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let owner = format!("pid={} at={}\n", std::process::id(), Utc::now().to_rfc3339());
                    file.write_all(owner.as_bytes()).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale(&path).await? && self.break_stale_lock(&path).await? {
                        continue;
                    }
                    return Err(AppError::store(format!(
                        "{key} is locked by another run ({})",
                        path.display()
                    )));
                }
                Err(e) => return Err(AppError::Io(e)),
            }
        }

        Err(AppError::store(format!("could not take lock for {key}")))
    }

    /// Move an abandoned lock aside and delete it.
    ///
    /// Rename is atomic, so of several runs breaking the same lock only one
    /// gets the file. The moved file keeps its mtime; if it turns out to be
    /// a live lock taken since the staleness check, it is linked back and
    /// `false` is returned.
    async fn break_stale_lock(&self, path: &Path) -> Result<bool> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let aside = path.with_extension(format!("lock.{}-{}.stale", std::process::id(), nanos));

        match tokio::fs::rename(path, &aside).await {
            Ok(()) => {}
            // Another run broke it first.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(AppError::Io(e)),
        }

        let stale = self.is_stale(&aside).await?;
        if stale {
            log::warn!("Broke abandoned lock {}", path.display());
        } else {
            match tokio::fs::hard_link(&aside, path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(AppError::Io(e)),
            }
        }

        match tokio::fs::remove_file(&aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Io(e)),
        }
        Ok(stale)
    }

    async fn is_stale(&self, path: &Path) -> Result<bool> {
        let modified = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(AppError::Io(e)),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age >= self.lock_stale)
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn load(&self, airport: &str, direction: Direction) -> Result<Option<Snapshot>> {
        let entry = self.load_entry(airport, direction).await?;
        if entry.is_none() {
            log::debug!("No cache entry for {}", CacheKey::new(airport, direction));
        }
        Ok(entry.map(|e| e.snapshot))
    }

    async fn save(&self, airport: &str, direction: Direction, snapshot: &Snapshot) -> Result<()> {
        let key = CacheKey::new(airport, direction);
        ensure_key(&key, snapshot)?;

        let entry = CacheEntry::new(snapshot.clone())?;
        self.write_json(&Self::entry_key(&key), &entry)
            .await
            .map_err(|e| AppError::store(format!("cannot write cache for {key}: {e}")))?;

        log::info!(
            "Cache saved: {} records for {} ({})",
            snapshot.len(),
            key,
            &entry.checksum[..12]
        );
        Ok(())
    }

    async fn lock(&self, airport: &str, direction: Direction) -> Result<KeyGuard> {
        let key = CacheKey::new(airport, direction);
        let guard = self.locks.acquire(&key).await;
        let lock_file = self.acquire_lock_file(&key).await?;
        Ok(guard.with_lock_file(lock_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateRange, FlightRecord, RawRow, fields};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, d).unwrap()
    }

    fn sample_snapshot(direction: Direction) -> Snapshot {
        let mut row = RawRow::new();
        row.insert(fields::FLIGHT_NUMBER.into(), "KE123".into());
        row.insert(fields::SCHEDULED_TIME.into(), "10:00".into());
        row.insert(fields::ACTUAL_TIME.into(), "10:25".into());
        row.insert(fields::LOCATION.into(), "NAGOYA".into());
        row.insert(fields::GATE.into(), "601".into());
        row.insert("Remarks".into(), "Charter".into());
        let record = FlightRecord::from_raw(row, day(1), direction, "NGO").unwrap();

        Snapshot::new("NGO", direction, DateRange::starting(day(1), 7), vec![record])
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!tmp.path().join("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_unseen_is_none() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let loaded = storage.load("NGO", Direction::Departure).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let snapshot = sample_snapshot(Direction::Departure);

        storage
            .save("NGO", Direction::Departure, &snapshot)
            .await
            .unwrap();
        let loaded = storage.load("NGO", Direction::Departure).await.unwrap();

        assert_eq!(loaded, Some(snapshot));
        assert!(tmp.path().join("NGO_departure.json").exists());
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_not_absent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let empty = Snapshot::new("NGO", Direction::Arrival, DateRange::single(day(1)), vec![]);

        storage.save("NGO", Direction::Arrival, &empty).await.unwrap();
        let loaded = storage.load("NGO", Direction::Arrival).await.unwrap();
        assert_eq!(loaded, Some(empty));
    }

    #[tokio::test]
    async fn test_directions_are_separate() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage
            .save("NGO", Direction::Departure, &sample_snapshot(Direction::Departure))
            .await
            .unwrap();

        assert!(storage.load("NGO", Direction::Arrival).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_mismatched_key() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let result = storage
            .save("NGO", Direction::Arrival, &sample_snapshot(Direction::Departure))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage
            .write_bytes("NGO_departure.json", b"{ not json")
            .await
            .unwrap();

        let result = storage.load("NGO", Direction::Departure).await;
        assert!(matches!(result, Err(AppError::Store(_))));
    }

    #[tokio::test]
    async fn test_lock_file_blocks_second_holder() {
        let tmp = TempDir::new().unwrap();
        let first = LocalStorage::new(tmp.path());
        // A second process shares the directory but not the in-memory table.
        let second = LocalStorage::new(tmp.path());

        let guard = first.lock("NGO", Direction::Departure).await.unwrap();
        assert!(tmp.path().join("NGO_departure.lock").exists());

        let blocked = second.lock("NGO", Direction::Departure).await;
        assert!(matches!(blocked, Err(AppError::Store(_))));

        drop(guard);
        assert!(!tmp.path().join("NGO_departure.lock").exists());
        assert!(second.lock("NGO", Direction::Departure).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("NGO_arrival.lock"), "pid=1\n").unwrap();

        let storage = LocalStorage::new(tmp.path()).with_lock_stale(Duration::ZERO);
        let guard = storage.lock("NGO", Direction::Arrival).await;
        assert!(guard.is_ok());

        let owner = std::fs::read_to_string(tmp.path().join("NGO_arrival.lock")).unwrap();
        assert!(owner.starts_with(&format!("pid={} ", std::process::id())));
        // Only the lock itself is left behind.
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_breaking_a_live_lock_restores_it() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("NGO_arrival.lock");
        std::fs::write(&path, "pid=1\n").unwrap();

        // The lock was retaken between the staleness check and the break.
        let storage = LocalStorage::new(tmp.path());
        assert!(!storage.break_stale_lock(&path).await.unwrap());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "pid=1\n");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);

        let blocked = storage.lock("NGO", Direction::Arrival).await;
        assert!(matches!(blocked, Err(AppError::Store(_))));
    }
}
