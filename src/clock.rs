use std::time::Duration;

use chrono::{DateTime, Local};

/// Source of "now" for every scheduling decision. Components never cache or
/// increment time; they re-read the clock on each tick so delays in wakeup
/// scheduling are corrected instead of accumulated.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Delay until the next `interval_ms` boundary of the wall clock, so a
/// per-minute watch wakes at :00 of each minute and a per-second countdown
/// wakes on whole seconds regardless of when the process started.
pub fn boundary_delay(now_unix_ms: i64, interval_ms: u64) -> Duration {
    let interval = interval_ms.max(1) as i64;
    let rem = now_unix_ms.rem_euclid(interval);
    Duration::from_millis((interval - rem) as u64)
}

/// Renders a countdown as `MM:SS`, spilling into `H:MM:SS` past an hour.
pub fn format_clock(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
