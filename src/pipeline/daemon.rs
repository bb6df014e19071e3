// src/pipeline/daemon.rs

//! In-process trigger loop for the daily listing and the periodic check.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};

/// Which cycle a tick should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Full listing at the configured time of day
    Daily,
    /// Diff check every interval
    Check,
}

/// When the triggers fire.
#[derive(Debug, Clone, Copy)]
pub struct DaemonSchedule {
    /// Local time of day for the full listing
    pub daily_at: NaiveTime,
    pub check_interval: Duration,
}

/// First occurrence of `at` strictly after `now`.
pub fn next_daily_run(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// Pick the next trigger. The daily listing wins a tie.
pub fn next_trigger(
    now: NaiveDateTime,
    next_check: NaiveDateTime,
    daily_at: NaiveTime,
) -> (Trigger, NaiveDateTime) {
    let daily = next_daily_run(now, daily_at);
    if daily <= next_check {
        (Trigger::Daily, daily)
    } else {
        (Trigger::Check, next_check)
    }
}

/// Run `tick` for each trigger until it breaks.
///
/// Ticks run one at a time; a trigger due while another tick is running
/// fires as soon as that tick returns.
pub async fn run_daemon<F, Fut>(schedule: DaemonSchedule, mut tick: F)
where
    F: FnMut(Trigger) -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    let interval = TimeDelta::from_std(schedule.check_interval).unwrap_or(TimeDelta::hours(1));
    let mut next_check = Local::now().naive_local() + interval;

    loop {
        let now = Local::now().naive_local();
        let (trigger, when) = next_trigger(now, next_check, schedule.daily_at);
        log::info!("Next {:?} run at {}", trigger, when.format("%Y-%m-%d %H:%M"));

        let wait = (when - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        if tick(trigger).await.is_break() {
            break;
        }
        if trigger == Trigger::Check {
            next_check = Local::now().naive_local() + interval;
        }
    }
}
