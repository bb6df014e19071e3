//! Change detection pipeline.
//!
//! - `diff`: compare two snapshots of one key
//! - `classify`: decide which differences are worth a notification
//! - `collect`: fetch a multi-date window into a snapshot
//! - `cycle`: lock, load, fetch, notify and save for one key
//! - `daemon`: daily and periodic triggers

pub mod classify;
pub mod collect;
pub mod cycle;
pub mod daemon;
pub mod diff;

pub use classify::{
    EntryTag, NotificationEntry, NotificationPayload, PayloadKind, classify, full_listing,
    group_by_direction,
};
pub use collect::fetch_snapshot;
pub use cycle::{CycleContext, CycleReport, KeyState};
pub use daemon::{DaemonSchedule, Trigger, next_daily_run, run_daemon};
pub use diff::{DiffResult, TimeChange, diff};
