// src/models/mod.rs

//! Domain models for the schedule watcher.
//!
//! Flight records and snapshots live in `flight`, file-backed settings in
//! `config`.

mod config;
mod flight;

// Re-export all public types
pub use config::{
    Config, FetcherConfig, LoggingConfig, MAX_CHECK_INTERVAL_MINS, MAX_DAYS, NotifierConfig,
    ScheduleConfig, StorageConfig, WEBHOOK_ENV,
};
pub use flight::{DateRange, Direction, FlightRecord, RawRow, Snapshot, fields, yyyymmdd};
