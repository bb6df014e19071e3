//! Notification policy on top of diff output.
//!
//! New flight numbers and same-day time changes are reported. Removals are
//! never reported.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DateRange, Direction, FlightRecord, Snapshot};

use super::diff::DiffResult;

/// How an entry came to be notifiable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum EntryTag {
    /// Flight number not seen in the baseline
    New,
    /// Scheduled time moved on the same date
    TimeChanged { previous_time: String },
    /// Part of a full listing, not compared
    Listed,
}

impl EntryTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryTag::New => "new",
            EntryTag::TimeChanged { .. } => "time-changed",
            EntryTag::Listed => "listed",
        }
    }
}

/// One notifiable flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEntry {
    #[serde(flatten)]
    pub tag: EntryTag,
    /// The record as currently published
    pub record: FlightRecord,
}

impl NotificationEntry {
    /// Scheduled time before the change, if this is a time change.
    pub fn previous_time(&self) -> Option<&str> {
        match &self.tag {
            EntryTag::TimeChanged { previous_time } => Some(previous_time),
            _ => None,
        }
    }
}

/// Which path produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadKind {
    /// Hourly diff against the baseline
    Changes,
    /// Daily listing of the whole window
    FullListing,
}

/// Everything a dispatcher needs to render one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: PayloadKind,
    pub airport: String,
    pub direction: Direction,
    pub range: DateRange,
    pub entries: Vec<NotificationEntry>,
    pub generated_at: DateTime<Utc>,
}

impl NotificationPayload {
    /// An empty payload must not be dispatched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries carrying the given tag name.
    pub fn count(&self, tag: &str) -> usize {
        self.entries.iter().filter(|e| e.tag.as_str() == tag).count()
    }

    /// Entries grouped by date, dates ascending, source order within a date.
    pub fn by_date(&self) -> BTreeMap<NaiveDate, Vec<&NotificationEntry>> {
        let mut groups: BTreeMap<NaiveDate, Vec<&NotificationEntry>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.record.date).or_default().push(entry);
        }
        groups
    }
}

/// Group payloads by direction, keeping their order within each direction.
pub fn group_by_direction(
    payloads: &[NotificationPayload],
) -> BTreeMap<Direction, Vec<&NotificationPayload>> {
    let mut groups: BTreeMap<Direction, Vec<&NotificationPayload>> = BTreeMap::new();
    for payload in payloads {
        groups.entry(payload.direction).or_default().push(payload);
    }
    groups
}

/// Turn a diff into a change notification.
///
/// Added records come first, then time changes, each in diff order.
/// `diff.removed` is never consulted.
pub fn classify(diff: &DiffResult) -> NotificationPayload {
    let added = diff.added.iter().map(|record| NotificationEntry {
        tag: EntryTag::New,
        record: record.clone(),
    });

    let changed = diff.changed.iter().map(|change| NotificationEntry {
        tag: EntryTag::TimeChanged {
            previous_time: change.previous.scheduled_time.clone(),
        },
        record: change.current.clone(),
    });

    NotificationPayload {
        kind: PayloadKind::Changes,
        airport: diff.airport.clone(),
        direction: diff.direction,
        range: diff.range,
        entries: added.chain(changed).collect(),
        generated_at: Utc::now(),
    }
}

/// List a whole snapshot without comparing it to anything.
pub fn full_listing(snapshot: &Snapshot) -> NotificationPayload {
    NotificationPayload {
        kind: PayloadKind::FullListing,
        airport: snapshot.airport.clone(),
        direction: snapshot.direction,
        range: snapshot.range,
        entries: snapshot
            .records
            .iter()
            .map(|record| NotificationEntry {
                tag: EntryTag::Listed,
                record: record.clone(),
            })
            .collect(),
        generated_at: Utc::now(),
    }
}
