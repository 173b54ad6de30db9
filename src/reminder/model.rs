use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Timelike};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{TimerError, TimerResult};

/// Canonical time-of-day slot. Parsing is tolerant of loosely formatted
/// input (`"8:0"`, `"8"`, `"08:00:30"`); display is always zero-padded
/// `HH:MM`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn parse(raw: &str) -> TimerResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TimerError::Format(raw.to_string()));
        }
        let mut parts = trimmed.split(':');
        let hour = parse_component(parts.next(), raw)?;
        let minute = match parts.next() {
            Some(text) => parse_component(Some(text), raw)?,
            None => 0,
        };
        if let Some(seconds) = parts.next() {
            // Seconds are discarded, but garbage after the second colon is
            // still a malformed time.
            parse_component(Some(seconds), raw)?;
        }
        if parts.next().is_some() || hour > 23 || minute > 59 {
            return Err(TimerError::Format(raw.to_string()));
        }
        Ok(Self { hour, minute })
    }

    /// True when `now` falls anywhere inside this slot's minute.
    pub fn matches(&self, now: &DateTime<Local>) -> bool {
        now.hour() == self.hour && now.minute() == self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

fn parse_component(part: Option<&str>, raw: &str) -> TimerResult<u32> {
    let text = part.ok_or_else(|| TimerError::Format(raw.to_string()))?;
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimerError::Format(raw.to_string()));
    }
    text.parse::<u32>()
        .map_err(|_| TimerError::Format(raw.to_string()))
}

/// String-level normalization: `"8:0"` -> `"08:00"`.
pub fn normalize_time(raw: &str) -> TimerResult<String> {
    Ok(TimeOfDay::parse(raw)?.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReminderKind {
    /// Fires every day at each listed time until deactivated.
    Calendar { times_of_day: Vec<TimeOfDay> },
    /// Fires once when the duration elapses from a start instant.
    Countdown { duration_seconds: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub kind: ReminderKind,
    /// Opaque display text forwarded to the notification, e.g.
    /// "Aspirin 500mg".
    pub label: String,
    pub is_active: bool,
}

/// Input to `ReminderRegistry::add`; the registry owns id assignment.
#[derive(Debug, Clone)]
pub struct ReminderDraft {
    pub kind: ReminderKind,
    pub label: String,
}

/// Partial update; only `Some` fields are applied.
#[derive(Debug, Clone, Default)]
pub struct ReminderPatch {
    pub kind: Option<ReminderKind>,
    pub label: Option<String>,
    pub is_active: Option<bool>,
}

/// Invariants hold only while a reminder is active; inactive reminders are
/// retained as-is and never evaluated.
pub fn validate_reminder(reminder: &Reminder) -> TimerResult<()> {
    if !reminder.is_active {
        return Ok(());
    }
    match &reminder.kind {
        ReminderKind::Calendar { times_of_day } => {
            if times_of_day.is_empty() {
                return Err(TimerError::Validation(format!(
                    "calendar reminder '{}' has no times of day",
                    reminder.id
                )));
            }
        }
        ReminderKind::Countdown { duration_seconds } => {
            if *duration_seconds == 0 {
                return Err(TimerError::Validation(format!(
                    "countdown reminder '{}' has zero duration",
                    reminder.id
                )));
            }
        }
    }
    Ok(())
}

pub fn load_reminder_file(path: &Path) -> Result<Vec<Reminder>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read reminder file {}", path.display()))?;
    parse_reminder_file_text(&content)
}

pub fn parse_reminder_file_text(content: &str) -> Result<Vec<Reminder>> {
    let raw = serde_json::from_str::<ReminderFileV1>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported reminder file version {}; expected version 1",
            raw.version
        );
    }

    let mut ids = HashSet::new();
    let mut reminders = Vec::with_capacity(raw.reminders.len());
    for entry in raw.reminders {
        if !ids.insert(entry.id.clone()) {
            bail!("duplicate reminder id found: {}", entry.id);
        }

        let kind = match entry.kind {
            ReminderKindFile::Calendar { times_of_day } => {
                let mut parsed = Vec::with_capacity(times_of_day.len());
                for time in &times_of_day {
                    let slot = TimeOfDay::parse(time).with_context(|| {
                        format!("reminder '{}' has invalid time '{}'", entry.id, time)
                    })?;
                    parsed.push(slot);
                }
                parsed.sort();
                parsed.dedup();
                ReminderKind::Calendar {
                    times_of_day: parsed,
                }
            }
            ReminderKindFile::Countdown { duration_seconds } => {
                ReminderKind::Countdown { duration_seconds }
            }
        };

        let reminder = Reminder {
            id: entry.id,
            kind,
            label: entry.label,
            is_active: entry.is_active,
        };
        validate_reminder(&reminder)
            .with_context(|| format!("reminder '{}' failed validation", reminder.id))?;
        reminders.push(reminder);
    }

    Ok(reminders)
}

pub fn save_reminder_file(path: &Path, reminders: &[Reminder]) -> Result<()> {
    let mut serialized = Vec::with_capacity(reminders.len());
    for reminder in reminders {
        let mut obj = Map::new();
        obj.insert("id".to_string(), Value::String(reminder.id.clone()));
        obj.insert("label".to_string(), Value::String(reminder.label.clone()));
        obj.insert("is_active".to_string(), Value::Bool(reminder.is_active));

        match &reminder.kind {
            ReminderKind::Calendar { times_of_day } => {
                obj.insert("kind".to_string(), Value::String("calendar".to_string()));
                let times = times_of_day
                    .iter()
                    .map(|slot| Value::String(slot.to_string()))
                    .collect::<Vec<_>>();
                obj.insert("times_of_day".to_string(), Value::Array(times));
            }
            ReminderKind::Countdown { duration_seconds } => {
                obj.insert("kind".to_string(), Value::String("countdown".to_string()));
                obj.insert(
                    "duration_seconds".to_string(),
                    Value::Number((*duration_seconds).into()),
                );
            }
        }

        serialized.push(Value::Object(obj));
    }

    let payload = json!({
        "version": 1,
        "reminders": serialized,
    });
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write reminder file {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ReminderFileV1 {
    version: u32,
    reminders: Vec<ReminderEntryFile>,
}

#[derive(Debug, Deserialize)]
struct ReminderEntryFile {
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(flatten)]
    kind: ReminderKindFile,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReminderKindFile {
    Calendar { times_of_day: Vec<String> },
    Countdown { duration_seconds: u64 },
}

fn default_active() -> bool {
    true
}
