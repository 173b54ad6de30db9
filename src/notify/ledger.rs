use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Occurrence key for a countdown; a countdown fires once ever per run.
pub const COUNTDOWN_OCCURRENCE: &str = "countdown";
pub const COUNTDOWN_SLOT: &str = "done";

/// Dedup key: one logical occurrence of one reminder. For calendar
/// reminders the occurrence is the calendar date and the slot the `HH:MM`
/// it was due; for countdowns both are synthetic constants.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FireKey {
    pub reminder_id: String,
    pub occurrence: String,
    pub slot: String,
}

impl FireKey {
    pub fn calendar(reminder_id: &str, date: NaiveDate, slot: &str) -> Self {
        Self {
            reminder_id: reminder_id.to_string(),
            occurrence: date.format("%Y-%m-%d").to_string(),
            slot: slot.to_string(),
        }
    }

    pub fn countdown(reminder_id: &str) -> Self {
        Self {
            reminder_id: reminder_id.to_string(),
            occurrence: COUNTDOWN_OCCURRENCE.to_string(),
            slot: COUNTDOWN_SLOT.to_string(),
        }
    }
}

/// Insert-if-absent ledger that makes duplicate ticks, overlapping watch
/// restarts and process reloads safe. At most one fire per key, ever.
#[derive(Debug, Default)]
pub struct FireLedger {
    fires: HashMap<FireKey, i64>,
}

impl FireLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-set: records the fire and returns true only if the key was
    /// absent. A false return means this occurrence already notified and
    /// the caller must treat the match as a no-op.
    pub fn try_record(&mut self, key: FireKey, fired_unix_ms: i64) -> bool {
        use std::collections::hash_map::Entry;
        match self.fires.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(fired_unix_ms);
                true
            }
        }
    }

    pub fn contains(&self, key: &FireKey) -> bool {
        self.fires.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fires.is_empty()
    }

    /// Count of calendar fires recorded for the given date.
    pub fn fires_on(&self, date: NaiveDate) -> usize {
        let occurrence = date.format("%Y-%m-%d").to_string();
        self.fires
            .keys()
            .filter(|key| key.occurrence == occurrence)
            .count()
    }

    /// Drops entries for past dates. Countdown entries are per-run and are
    /// dropped too, so a fresh run can fire again.
    pub fn prune(&mut self, today: NaiveDate) {
        self.fires.retain(|key, _| {
            NaiveDate::parse_from_str(&key.occurrence, "%Y-%m-%d")
                .map(|date| date >= today)
                .unwrap_or(false)
        });
    }

    /// Missing file is an empty ledger, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read fire ledger {}", path.display()))?;
        Self::parse_text(&content)
    }

    pub fn parse_text(content: &str) -> Result<Self> {
        let raw = serde_json::from_str::<LedgerFileV1>(content).map_err(|err| {
            let line = err.line();
            let column = err.column();
            anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
        })?;
        if raw.version != 1 {
            bail!(
                "unsupported fire ledger version {}; expected version 1",
                raw.version
            );
        }

        let mut fires = HashMap::with_capacity(raw.fires.len());
        for entry in raw.fires {
            fires.insert(
                FireKey {
                    reminder_id: entry.reminder_id,
                    occurrence: entry.occurrence,
                    slot: entry.slot,
                },
                entry.fired_unix_ms,
            );
        }
        Ok(Self { fires })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut entries = self.fires.iter().collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| {
            a.occurrence
                .cmp(&b.occurrence)
                .then_with(|| a.reminder_id.cmp(&b.reminder_id))
                .then_with(|| a.slot.cmp(&b.slot))
        });

        let mut serialized = Vec::with_capacity(entries.len());
        for (key, fired_unix_ms) in entries {
            let mut obj = Map::new();
            obj.insert(
                "reminder_id".to_string(),
                Value::String(key.reminder_id.clone()),
            );
            obj.insert(
                "occurrence".to_string(),
                Value::String(key.occurrence.clone()),
            );
            obj.insert("slot".to_string(), Value::String(key.slot.clone()));
            obj.insert(
                "fired_unix_ms".to_string(),
                Value::Number((*fired_unix_ms).into()),
            );
            serialized.push(Value::Object(obj));
        }

        let payload = json!({
            "version": 1,
            "fires": serialized,
        });
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(path, format!("{text}\n"))
            .with_context(|| format!("unable to write fire ledger {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LedgerFileV1 {
    version: u32,
    #[serde(default)]
    fires: Vec<LedgerEntryFile>,
}

#[derive(Debug, Deserialize)]
struct LedgerEntryFile {
    reminder_id: String,
    occurrence: String,
    slot: String,
    #[serde(default)]
    fired_unix_ms: i64,
}
