// src/pipeline/cycle.rs

//! Per-key check and listing cycles.
//!
//! A cycle holds the key lock for its whole run, loads the baseline, fetches
//! the window, notifies if there is something to say and saves the fetched
//! snapshot as the new baseline. Nothing is saved unless the fetch succeeded.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::models::{DateRange, Direction};
use crate::services::{Notifier, ScheduleSource};
use crate::storage::{CacheKey, SnapshotStore};
use crate::utils::log;

use super::classify::{NotificationPayload, PayloadKind, classify, full_listing};
use super::collect::fetch_snapshot;
use super::diff::diff;

/// Whether a key had a baseline when the cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    Unseen,
    Baselined,
    /// The stored entry could not be read; the listing path overwrites it
    Unreadable,
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyState::Unseen => write!(f, "unseen"),
            KeyState::Baselined => write!(f, "baselined"),
            KeyState::Unreadable => write!(f, "unreadable"),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub key: CacheKey,
    pub kind: PayloadKind,
    pub state_before: KeyState,
    /// Records in the fetched snapshot
    pub record_count: usize,
    pub added: usize,
    pub changed: usize,
    /// Removals seen by the diff; never notified
    pub removed: usize,
    /// Entries handed to the notifier
    pub notified: usize,
    pub dispatch_error: Option<String>,
}

impl CycleReport {
    fn new(key: CacheKey, kind: PayloadKind, state_before: KeyState, record_count: usize) -> Self {
        Self {
            key,
            kind,
            state_before,
            record_count,
            added: 0,
            changed: 0,
            removed: 0,
            notified: 0,
            dispatch_error: None,
        }
    }

    fn log_summary(&self) {
        log::summary(
            &format!("{} ({})", self.key, self.state_before),
            &[
                ("Records", self.record_count.to_string()),
                ("Added", self.added.to_string()),
                ("Changed", self.changed.to_string()),
                ("Removed", self.removed.to_string()),
                ("Notified", self.notified.to_string()),
            ],
        );
    }
}

/// Collaborators and parameters shared by every cycle of one run.
pub struct CycleContext<'a> {
    pub source: &'a dyn ScheduleSource,
    pub store: &'a dyn SnapshotStore,
    pub notifier: &'a dyn Notifier,
    pub airport: String,
    pub range: DateRange,
    pub request_delay: Duration,
}

impl CycleContext<'_> {
    /// Diff the fetched window against the baseline and notify changes.
    pub async fn run_check(&self, direction: Direction) -> Result<CycleReport> {
        self.run(direction, PayloadKind::Changes).await
    }

    /// Notify the whole fetched window.
    pub async fn run_full_listing(&self, direction: Direction) -> Result<CycleReport> {
        self.run(direction, PayloadKind::FullListing).await
    }

    /// Run one cycle of the given kind for one direction.
    pub async fn run(&self, direction: Direction, kind: PayloadKind) -> Result<CycleReport> {
        let key = CacheKey::new(&self.airport, direction);
        let _guard = self.store.lock(&self.airport, direction).await?;

        let (previous, state_before) = match self.store.load(&self.airport, direction).await {
            Ok(Some(previous)) => (Some(previous), KeyState::Baselined),
            Ok(None) => (None, KeyState::Unseen),
            // The listing does not compare, so a bad entry only needs replacing.
            Err(e) if kind == PayloadKind::FullListing => {
                log::warn!("{}: {}; the listing will replace it", key, e);
                (None, KeyState::Unreadable)
            }
            Err(e) => return Err(e),
        };

        let current = fetch_snapshot(
            self.source,
            &self.airport,
            direction,
            self.range,
            self.request_delay,
        )
        .await?;

        let mut report = CycleReport::new(key, kind, state_before, current.len());

        let payload = match (kind, &previous) {
            (PayloadKind::FullListing, _) => Some(full_listing(&current)),
            (PayloadKind::Changes, Some(previous)) => {
                let result = diff(previous, &current);
                report.added = result.added.len();
                report.changed = result.changed.len();
                report.removed = result.removed.len();
                if !result.has_changes() {
                    log::debug!("{}: schedule unchanged", report.key);
                } else if report.removed > 0 {
                    log::debug!("{}: {} flights no longer listed", report.key, report.removed);
                }
                Some(classify(&result))
            }
            (PayloadKind::Changes, None) => {
                log::info!("{}: no baseline yet, saving without comparison", report.key);
                None
            }
        };

        if let Some(payload) = payload {
            self.deliver(&payload, &mut report).await;
        }

        self.store.save(&self.airport, direction, &current).await?;
        report.log_summary();
        Ok(report)
    }

    /// Hand a payload to the notifier. Any notifier error is recorded in
    /// the report and never prevents the save.
    async fn deliver(&self, payload: &NotificationPayload, report: &mut CycleReport) {
        if payload.is_empty() {
            log::info!("{}: nothing to notify", report.key);
            return;
        }

        match self.notifier.dispatch(payload).await {
            Ok(()) => report.notified = payload.len(),
            Err(e) => {
                log::error!("{}: {}", report.key, e);
                report.dispatch_error = Some(e.to_string());
            }
        }
    }

    /// Run one cycle per direction, in order.
    ///
    /// A failing direction is logged and does not stop the others.
    pub async fn run_directions(
        &self,
        directions: &[Direction],
        kind: PayloadKind,
    ) -> Vec<(Direction, Result<CycleReport>)> {
        let mut outcomes = Vec::with_capacity(directions.len());
        for (i, &direction) in directions.iter().enumerate() {
            log::step(
                i + 1,
                directions.len(),
                &format!("{} {} {}", direction, self.airport, self.range),
            );
            let outcome = self.run(direction, kind).await;
            if let Err(e) = &outcome {
                log::error!("{} {} cycle failed: {}", direction, self.airport, e);
            }
            outcomes.push((direction, outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{FlightRecord, RawRow, Snapshot, fields};
    use crate::pipeline::EntryTag;
    use crate::storage::{LocalStorage, MemoryStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, d).unwrap()
    }

    fn range() -> DateRange {
        DateRange::new(day(1), day(2))
    }

    fn record(number: &str, d: u32, time: &str, direction: Direction) -> FlightRecord {
        let mut row = RawRow::new();
        row.insert(fields::FLIGHT_NUMBER.into(), number.into());
        row.insert(fields::SCHEDULED_TIME.into(), time.into());
        FlightRecord::from_raw(row, day(d), direction, "NGO").unwrap()
    }

    fn baseline(direction: Direction, flights: &[(&str, u32, &str)]) -> Snapshot {
        let records = flights
            .iter()
            .map(|(n, d, t)| record(n, *d, t, direction))
            .collect();
        Snapshot::new("NGO", direction, range(), records)
    }

    /// Serves a fixed schedule per date, or fails every fetch.
    #[derive(Default)]
    struct FakeSource {
        days: HashMap<NaiveDate, Vec<(&'static str, &'static str)>>,
        fail: bool,
        unparsable: bool,
    }

    impl FakeSource {
        fn with(flights: &[(&'static str, u32, &'static str)]) -> Self {
            let mut days: HashMap<NaiveDate, Vec<_>> = HashMap::new();
            for (number, d, time) in flights {
                days.entry(day(*d)).or_default().push((*number, *time));
            }
            Self {
                days,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn unparsable() -> Self {
            Self {
                unparsable: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ScheduleSource for FakeSource {
        async fn fetch(
            &self,
            _airport: &str,
            date: NaiveDate,
            _direction: Direction,
        ) -> Result<Vec<RawRow>> {
            if self.fail {
                return Err(AppError::fetch("fake", "connection refused"));
            }
            if self.unparsable {
                return Err(AppError::parse("fake", "empty response body"));
            }
            Ok(self
                .days
                .get(&date)
                .into_iter()
                .flatten()
                .map(|(number, time)| {
                    let mut row = RawRow::new();
                    row.insert(fields::FLIGHT_NUMBER.into(), number.to_string());
                    row.insert(fields::SCHEDULED_TIME.into(), time.to_string());
                    row
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<NotificationPayload>>,
        fail: bool,
        broken_pipe: bool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn broken_pipe() -> Self {
            Self {
                broken_pipe: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<NotificationPayload> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn dispatch(&self, payload: &NotificationPayload) -> Result<()> {
            if self.fail {
                return Err(AppError::dispatch("webhook returned 500"));
            }
            if self.broken_pipe {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "notifier pipe closed",
                )));
            }
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn context<'a>(
        source: &'a FakeSource,
        store: &'a dyn SnapshotStore,
        notifier: &'a RecordingNotifier,
    ) -> CycleContext<'a> {
        CycleContext {
            source,
            store,
            notifier,
            airport: "NGO".into(),
            range: range(),
            request_delay: Duration::ZERO,
        }
    }

    fn saved_numbers(store: &MemoryStore, direction: Direction) -> Vec<(String, String)> {
        store
            .get("NGO", direction)
            .unwrap()
            .records
            .into_iter()
            .map(|r| (r.flight_number, r.scheduled_time))
            .collect()
    }

    #[tokio::test]
    async fn test_unseen_key_saves_baseline_without_notifying() {
        let source = FakeSource::with(&[("KE123", 1, "10:00")]);
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        let report = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await
            .unwrap();

        assert_eq!(report.state_before, KeyState::Unseen);
        assert_eq!(report.record_count, 1);
        assert!(notifier.sent().is_empty());
        assert_eq!(saved_numbers(&store, Direction::Departure).len(), 1);
    }

    #[tokio::test]
    async fn test_time_change_is_notified() {
        let source = FakeSource::with(&[("KE123", 1, "11:00")]);
        let store = MemoryStore::new();
        store.insert(baseline(Direction::Departure, &[("KE123", 1, "10:00")]));
        let notifier = RecordingNotifier::default();

        let report = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await
            .unwrap();

        assert_eq!(report.state_before, KeyState::Baselined);
        assert_eq!((report.added, report.changed, report.notified), (0, 1, 1));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].entries[0].tag,
            EntryTag::TimeChanged {
                previous_time: "10:00".into()
            }
        );
        assert_eq!(
            saved_numbers(&store, Direction::Departure),
            vec![("KE123".to_string(), "11:00".to_string())]
        );
    }

    #[tokio::test]
    async fn test_known_flight_on_new_date_is_quiet() {
        let source = FakeSource::with(&[("KE123", 1, "10:00"), ("KE123", 2, "10:00")]);
        let store = MemoryStore::new();
        store.insert(baseline(Direction::Departure, &[("KE123", 1, "10:00")]));
        let notifier = RecordingNotifier::default();

        let report = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await
            .unwrap();

        assert_eq!((report.added, report.changed), (0, 0));
        assert!(notifier.sent().is_empty());
        assert_eq!(saved_numbers(&store, Direction::Departure).len(), 2);
    }

    #[tokio::test]
    async fn test_removal_is_counted_not_notified() {
        let source = FakeSource::with(&[("KE123", 1, "10:00")]);
        let store = MemoryStore::new();
        store.insert(baseline(
            Direction::Departure,
            &[("KE123", 1, "10:00"), ("KE999", 1, "09:00")],
        ));
        let notifier = RecordingNotifier::default();

        let report = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await
            .unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.notified, 0);
        assert!(notifier.sent().is_empty());
        assert_eq!(saved_numbers(&store, Direction::Departure).len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_still_saves() {
        let source = FakeSource::with(&[("KE123", 1, "10:00"), ("CX777", 2, "08:00")]);
        let store = MemoryStore::new();
        store.insert(baseline(Direction::Arrival, &[("KE123", 1, "10:00")]));
        let notifier = RecordingNotifier::failing();

        let report = context(&source, &store, &notifier)
            .run_check(Direction::Arrival)
            .await
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.notified, 0);
        assert!(report.dispatch_error.as_deref().unwrap().contains("500"));
        assert_eq!(saved_numbers(&store, Direction::Arrival).len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_baseline() {
        let source = FakeSource::failing();
        let store = MemoryStore::new();
        let seeded = baseline(Direction::Departure, &[("KE123", 1, "10:00")]);
        store.insert(seeded.clone());
        let notifier = RecordingNotifier::default();

        let result = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await;

        assert!(matches!(result, Err(AppError::Fetch { .. })));
        assert_eq!(store.get("NGO", Direction::Departure), Some(seeded));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_unseen_key_unseen() {
        let source = FakeSource::failing();
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        let result = context(&source, &store, &notifier)
            .run_full_listing(Direction::Arrival)
            .await;

        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_full_listing_notifies_everything_and_saves() {
        let source = FakeSource::with(&[("KE123", 1, "10:00"), ("OZ456", 2, "12:00")]);
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        let report = context(&source, &store, &notifier)
            .run_full_listing(Direction::Departure)
            .await
            .unwrap();

        assert_eq!(report.kind, PayloadKind::FullListing);
        assert_eq!(report.notified, 2);
        let sent = notifier.sent();
        assert_eq!(sent[0].kind, PayloadKind::FullListing);
        assert!(sent[0].entries.iter().all(|e| e.tag == EntryTag::Listed));
        assert!(store.get("NGO", Direction::Departure).is_some());
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_dispatched() {
        let source = FakeSource::default();
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();

        let report = context(&source, &store, &notifier)
            .run_full_listing(Direction::Departure)
            .await
            .unwrap();

        assert_eq!(report.record_count, 0);
        assert!(notifier.sent().is_empty());
        // An empty schedule is still a baseline.
        assert_eq!(store.get("NGO", Direction::Departure).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_aborts_cycle() {
        let tmp = TempDir::new().unwrap();
        let other_process = LocalStorage::new(tmp.path());
        let store = LocalStorage::new(tmp.path());
        let _held = other_process.lock("NGO", Direction::Departure).await.unwrap();

        let source = FakeSource::with(&[("KE123", 1, "10:00")]);
        let notifier = RecordingNotifier::default();

        let result = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await;

        assert!(matches!(result, Err(AppError::Store(_))));
        assert!(store.load("NGO", Direction::Departure).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directions_run_independently() {
        let source = FakeSource::with(&[("KE123", 1, "10:00")]);
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let ctx = context(&source, &store, &notifier);

        let outcomes = ctx
            .run_directions(&Direction::ALL, PayloadKind::Changes)
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(store.len(), 2);
        // Directions never mix.
        let arrival = store.get("NGO", Direction::Arrival).unwrap();
        assert!(arrival.records.iter().all(|r| r.direction == Direction::Arrival));
    }

    #[tokio::test]
    async fn test_any_notifier_error_still_saves() {
        let source = FakeSource::with(&[("CX777", 1, "08:00")]);
        let store = MemoryStore::new();
        store.insert(baseline(Direction::Departure, &[("KE123", 1, "10:00")]));
        let notifier = RecordingNotifier::broken_pipe();

        let report = context(&source, &store, &notifier)
            .run_check(Direction::Departure)
            .await
            .unwrap();

        assert!(report.dispatch_error.as_deref().unwrap().contains("pipe closed"));
        assert_eq!(
            saved_numbers(&store, Direction::Departure),
            vec![("CX777".to_string(), "08:00".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unparsable_window_keeps_baseline() {
        let source = FakeSource::unparsable();
        let store = MemoryStore::new();
        let seeded = baseline(Direction::Arrival, &[("KE123", 1, "10:00")]);
        store.insert(seeded.clone());
        let notifier = RecordingNotifier::default();

        let result = context(&source, &store, &notifier)
            .run_check(Direction::Arrival)
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Parse { .. }));
        assert!(err.is_fatal());
        assert_eq!(store.get("NGO", Direction::Arrival), Some(seeded));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_listing_replaces_corrupt_cache_entry() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("NGO_departure.json"), "{ not json").unwrap();
        let store = LocalStorage::new(tmp.path());
        let source = FakeSource::with(&[("KE123", 1, "10:00")]);
        let notifier = RecordingNotifier::default();
        let ctx = context(&source, &store, &notifier);

        // The check path cannot trust the entry.
        let check = ctx.run_check(Direction::Departure).await;
        assert!(matches!(check, Err(AppError::Store(_))));

        let report = ctx.run_full_listing(Direction::Departure).await.unwrap();
        assert_eq!(report.state_before, KeyState::Unreadable);
        assert_eq!(report.notified, 1);
        assert_eq!(notifier.sent().len(), 1);

        let saved = store.load("NGO", Direction::Departure).await.unwrap().unwrap();
        assert_eq!(saved.len(), 1);

        // Checks work again once the entry is replaced.
        let check = ctx.run_check(Direction::Departure).await.unwrap();
        assert_eq!(check.state_before, KeyState::Baselined);
    }
}
