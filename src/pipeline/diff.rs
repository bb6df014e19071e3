//! Diff calculation between schedule snapshots.
//!
//! Identity is asymmetric. A record counts as *added* only when its flight
//! number has never been seen in the previous snapshot, on any date, so that
//! recurring flights rolling onto new days stay quiet. Time changes and
//! removals are matched on the exact (flight number, date) pair.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{DateRange, Direction, FlightRecord, Snapshot};

/// A flight whose scheduled time moved on the same date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeChange {
    pub previous: FlightRecord,
    pub current: FlightRecord,
}

/// Differences between a baseline and a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub airport: String,
    pub direction: Direction,
    /// Range of the current snapshot
    pub range: DateRange,
    /// Records whose flight number is entirely new
    pub added: Vec<FlightRecord>,
    /// Same (flight number, date), different scheduled time
    pub changed: Vec<TimeChange>,
    /// Previous (flight number, date) pairs missing from current
    pub removed: Vec<FlightRecord>,
}

impl DiffResult {
    /// Check if there are any changes, removals included.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty() || !self.removed.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }
}

/// Compare `current` against the `previous` baseline.
///
/// Both snapshots must describe the same airport and direction. Duplicate
/// (flight number, date) rows are kept, but only the first occurrence on
/// each side takes part in pair matching, so results follow source order.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> DiffResult {
    debug_assert_eq!(previous.direction, current.direction);
    debug_assert_eq!(previous.airport, current.airport);

    // Flight-number universe, date-agnostic
    let known: HashSet<&str> = previous
        .records
        .iter()
        .map(|r| r.flight_number.as_str())
        .collect();

    // Exact-pair index, first occurrence wins
    let mut by_pair: HashMap<(&str, NaiveDate), &FlightRecord> = HashMap::new();
    for record in &previous.records {
        by_pair.entry(record.pair_key()).or_insert(record);
    }

    let current_pairs: HashSet<(&str, NaiveDate)> =
        current.records.iter().map(FlightRecord::pair_key).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    let mut matched = HashSet::new();

    for record in &current.records {
        if !known.contains(record.flight_number.as_str()) {
            added.push(record.clone());
        } else if !matched.insert(record.pair_key()) {
            // Later duplicate of a pair already compared
            continue;
        } else if let Some(prev) = by_pair.get(&record.pair_key()) {
            if prev.scheduled_time != record.scheduled_time {
                changed.push(TimeChange {
                    previous: (*prev).clone(),
                    current: record.clone(),
                });
            }
        }
    }

    let mut reported = HashSet::new();
    let removed = previous
        .records
        .iter()
        .filter(|r| !current_pairs.contains(&r.pair_key()))
        .filter(|r| reported.insert(r.pair_key()))
        .cloned()
        .collect();

    DiffResult {
        airport: current.airport.clone(),
        direction: current.direction,
        range: current.range,
        added,
        changed,
        removed,
    }
}
