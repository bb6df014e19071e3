// src/pipeline/collect.rs

//! Multi-date schedule collection.

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{DateRange, Direction, FlightRecord, Snapshot, yyyymmdd};
use crate::services::ScheduleSource;

/// Fetch every date in `range` and assemble one snapshot.
///
/// Dates are fetched in order with `delay` between successive requests.
/// A parse failure counts as an empty day; any other error aborts. If no
/// date in the window parsed, the window itself is a parse failure.
pub async fn fetch_snapshot(
    source: &dyn ScheduleSource,
    airport: &str,
    direction: Direction,
    range: DateRange,
    delay: Duration,
) -> Result<Snapshot> {
    let mut records = Vec::new();
    let mut unparsed = 0;

    for (i, date) in range.days().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let rows = match source.fetch(airport, date, direction).await {
            Ok(rows) => rows,
            Err(err @ AppError::Parse { .. }) => {
                log::warn!("{}; treating as no flights", err);
                unparsed += 1;
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let total = rows.len();
        let before = records.len();
        records.extend(
            rows.into_iter()
                .filter_map(|row| FlightRecord::from_raw(row, date, direction, airport)),
        );
        let kept = records.len() - before;

        if kept < total {
            log::warn!(
                "{} {} {}: dropped {} rows without a flight number",
                direction,
                airport,
                date.format(yyyymmdd::FORMAT),
                total - kept
            );
        }
        log::info!(
            "{} {} {}: {} flights",
            direction,
            airport,
            date.format(yyyymmdd::FORMAT),
            kept
        );
    }

    if unparsed > 0 && unparsed == range.len() {
        return Err(AppError::parse(
            format!("{} {} {}", direction, airport, range),
            "no date in the window could be parsed",
        ));
    }

    Ok(Snapshot::new(airport, direction, range, records))
}
