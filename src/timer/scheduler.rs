use chrono::{DateTime, Days, Local, NaiveTime};

use crate::error::{TimerError, TimerResult};
use crate::notify::ledger::{FireKey, FireLedger};
use crate::reminder::model::{Reminder, ReminderKind, TimeOfDay};

/// One reminder becoming due. Carries everything the notifier needs; the
/// dedup decision has already been made by the time this exists.
#[derive(Debug, Clone, PartialEq)]
pub struct FireEvent {
    pub reminder_id: String,
    pub label: String,
    pub slot: String,
}

/// Per-minute evaluation over a snapshot of active calendar reminders.
///
/// Snapshot-at-start semantics: reminders added to the registry after the
/// watch begins are not picked up until the watch is restarted.
#[derive(Debug, Clone)]
pub struct CalendarWatch {
    reminders: Vec<Reminder>,
}

impl CalendarWatch {
    pub fn new(snapshot: Vec<Reminder>) -> Self {
        let reminders = snapshot
            .into_iter()
            .filter(|reminder| {
                reminder.is_active && matches!(reminder.kind, ReminderKind::Calendar { .. })
            })
            .collect();
        Self { reminders }
    }

    pub fn reminder_count(&self) -> usize {
        self.reminders.len()
    }

    /// One evaluation pass. Each due `(reminder, slot)` pair goes through
    /// the ledger's test-and-set; only first-time matches become events.
    /// Evaluation is per-reminder isolated, so one reminder never blocks
    /// the rest of the pass.
    pub fn evaluate(&self, now: DateTime<Local>, ledger: &mut FireLedger) -> Vec<FireEvent> {
        let today = now.date_naive();
        let now_ms = now.timestamp_millis();
        let mut events = Vec::new();

        for reminder in &self.reminders {
            let ReminderKind::Calendar { times_of_day } = &reminder.kind else {
                continue;
            };
            for slot in times_of_day {
                if !slot.matches(&now) {
                    continue;
                }
                let slot_text = slot.to_string();
                let key = FireKey::calendar(&reminder.id, today, &slot_text);
                if ledger.try_record(key, now_ms) {
                    events.push(FireEvent {
                        reminder_id: reminder.id.clone(),
                        label: reminder.label.clone(),
                        slot: slot_text,
                    });
                }
            }
        }

        events
    }

    /// Earliest upcoming slot across all watched reminders, for status
    /// reporting. Daily recurrence means the answer is always within the
    /// next 24 hours once any reminder is watched.
    pub fn next_due(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut earliest: Option<DateTime<Local>> = None;
        for reminder in &self.reminders {
            let ReminderKind::Calendar { times_of_day } = &reminder.kind else {
                continue;
            };
            for slot in times_of_day {
                if let Some(candidate) = next_slot_occurrence(*slot, &now)
                    && earliest.is_none_or(|current| candidate < current)
                {
                    earliest = Some(candidate);
                }
            }
        }
        earliest
    }
}

fn next_slot_occurrence(slot: TimeOfDay, now: &DateTime<Local>) -> Option<DateTime<Local>> {
    let time = NaiveTime::from_hms_opt(slot.hour, slot.minute, 0)?;
    // Two days is enough to skip over a DST gap on the first day.
    for day_offset in 0_u64..2 {
        let date = now.date_naive().checked_add_days(Days::new(day_offset))?;
        let naive = date.and_time(time);
        let candidate = match naive.and_local_timezone(Local) {
            chrono::LocalResult::Single(dt) => dt,
            chrono::LocalResult::Ambiguous(first, _second) => first,
            chrono::LocalResult::None => continue,
        };
        if candidate > *now {
            return Some(candidate);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CountdownPhase {
    /// Not ticking; `remaining_seconds` is authoritative.
    Paused,
    /// Ticking toward `end_instant`.
    Running,
    Completed,
}

/// Outcome of one countdown tick. `Complete` is produced exactly once per
/// session; later ticks are `Noop`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CountdownTick {
    Tick { remaining_seconds: u64 },
    Complete,
    Noop,
}

/// Live state of one countdown. The remaining time is always recomputed
/// from the absolute end instant, never decremented, so a delayed or
/// throttled wakeup corrects itself on the next tick.
#[derive(Debug, Clone)]
pub struct CountdownSession {
    configured_seconds: u64,
    remaining_seconds: u64,
    end_instant: Option<DateTime<Local>>,
    phase: CountdownPhase,
}

impl CountdownSession {
    pub fn start(duration_seconds: u64, now: DateTime<Local>) -> TimerResult<Self> {
        if duration_seconds == 0 {
            return Err(TimerError::InvalidDuration(duration_seconds));
        }
        Ok(Self {
            configured_seconds: duration_seconds,
            remaining_seconds: duration_seconds,
            end_instant: Some(now + chrono::Duration::seconds(duration_seconds as i64)),
            phase: CountdownPhase::Running,
        })
    }

    pub fn tick(&mut self, now: DateTime<Local>) -> CountdownTick {
        if self.phase != CountdownPhase::Running {
            return CountdownTick::Noop;
        }
        let Some(end) = self.end_instant else {
            return CountdownTick::Noop;
        };

        self.remaining_seconds = remaining_from_end(end, now);
        if self.remaining_seconds == 0 {
            self.phase = CountdownPhase::Completed;
            self.end_instant = None;
            return CountdownTick::Complete;
        }
        CountdownTick::Tick {
            remaining_seconds: self.remaining_seconds,
        }
    }

    /// Freezes the remaining time and stops the end instant from mattering.
    pub fn pause(&mut self, now: DateTime<Local>) {
        if self.phase != CountdownPhase::Running {
            return;
        }
        if let Some(end) = self.end_instant {
            self.remaining_seconds = remaining_from_end(end, now);
        }
        self.end_instant = None;
        self.phase = CountdownPhase::Paused;
    }

    /// Recomputes the end instant from the frozen remaining time.
    pub fn resume(&mut self, now: DateTime<Local>) {
        if self.phase != CountdownPhase::Paused || self.remaining_seconds == 0 {
            return;
        }
        self.end_instant = Some(now + chrono::Duration::seconds(self.remaining_seconds as i64));
        self.phase = CountdownPhase::Running;
    }

    /// Back to a fresh non-running session. The duration may only change
    /// through a reset, never while running; omitting it restores the
    /// configured duration.
    pub fn reset(&mut self, new_duration_seconds: Option<u64>) -> TimerResult<()> {
        let duration = new_duration_seconds.unwrap_or(self.configured_seconds);
        if duration == 0 {
            return Err(TimerError::InvalidDuration(duration));
        }
        self.configured_seconds = duration;
        self.remaining_seconds = duration;
        self.end_instant = None;
        self.phase = CountdownPhase::Paused;
        Ok(())
    }

    pub fn configured_seconds(&self) -> u64 {
        self.configured_seconds
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn formatted_time(&self) -> String {
        crate::clock::format_clock(self.remaining_seconds)
    }

    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == CountdownPhase::Running
    }

    pub fn is_paused(&self) -> bool {
        self.phase == CountdownPhase::Paused
    }
}

fn remaining_from_end(end: DateTime<Local>, now: DateTime<Local>) -> u64 {
    let millis = (end - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1_000) as u64
    }
}
