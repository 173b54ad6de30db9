use crate::error::{TimerError, TimerResult};
use crate::reminder::model::{Reminder, ReminderDraft, ReminderPatch, validate_reminder};

/// Owns the canonical copy of every reminder. The scheduler and notifier
/// only ever see snapshots; all mutation happens here.
#[derive(Debug, Default)]
pub struct ReminderRegistry {
    reminders: Vec<Reminder>,
    next_id: u64,
}

impl ReminderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the registry from a loaded file. Ids in the file are kept;
    /// freshly added reminders continue after the highest `rem-N` seen.
    pub fn from_reminders(reminders: Vec<Reminder>) -> Self {
        let next_id = reminders
            .iter()
            .filter_map(|reminder| reminder.id.strip_prefix("rem-"))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(1);
        Self { reminders, next_id }
    }

    pub fn add(&mut self, draft: ReminderDraft) -> TimerResult<Reminder> {
        let reminder = Reminder {
            id: format!("rem-{}", self.next_id),
            kind: draft.kind,
            label: draft.label,
            is_active: true,
        };
        validate_reminder(&reminder)?;
        self.next_id += 1;
        self.reminders.push(reminder.clone());
        Ok(reminder)
    }

    pub fn update(&mut self, id: &str, patch: ReminderPatch) -> TimerResult<Reminder> {
        let index = self
            .reminders
            .iter()
            .position(|reminder| reminder.id == id)
            .ok_or_else(|| TimerError::NotFound(id.to_string()))?;

        let mut updated = self.reminders[index].clone();
        if let Some(kind) = patch.kind {
            updated.kind = kind;
        }
        if let Some(label) = patch.label {
            updated.label = label;
        }
        if let Some(is_active) = patch.is_active {
            updated.is_active = is_active;
        }
        validate_reminder(&updated)?;

        self.reminders[index] = updated.clone();
        Ok(updated)
    }

    /// Idempotent; removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &str) {
        self.reminders.retain(|reminder| reminder.id != id);
    }

    /// Snapshot of active reminders; caller mutation of the returned vec
    /// never touches the registry.
    pub fn list_active(&self) -> Vec<Reminder> {
        self.reminders
            .iter()
            .filter(|reminder| reminder.is_active)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Reminder] {
        &self.reminders
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::model::{ReminderKind, TimeOfDay};

    fn calendar_draft(label: &str) -> ReminderDraft {
        ReminderDraft {
            kind: ReminderKind::Calendar {
                times_of_day: vec![TimeOfDay { hour: 8, minute: 0 }],
            },
            label: label.to_string(),
        }
    }

    #[test]
    fn add_assigns_sequential_ids() {
        let mut registry = ReminderRegistry::new();
        let first = registry.add(calendar_draft("Aspirin 500mg")).expect("add");
        let second = registry.add(calendar_draft("Metformin 850mg")).expect("add");
        assert_eq!(first.id, "rem-1");
        assert_eq!(second.id, "rem-2");
    }

    #[test]
    fn add_rejects_empty_calendar() {
        let mut registry = ReminderRegistry::new();
        let err = registry
            .add(ReminderDraft {
                kind: ReminderKind::Calendar {
                    times_of_day: Vec::new(),
                },
                label: String::new(),
            })
            .expect_err("empty calendar should fail");
        assert!(matches!(err, TimerError::Validation(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn add_rejects_zero_duration_countdown() {
        let mut registry = ReminderRegistry::new();
        let err = registry
            .add(ReminderDraft {
                kind: ReminderKind::Countdown {
                    duration_seconds: 0,
                },
                label: String::new(),
            })
            .expect_err("zero duration should fail");
        assert!(matches!(err, TimerError::Validation(_)));
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let mut registry = ReminderRegistry::new();
        let err = registry
            .update("rem-99", ReminderPatch::default())
            .expect_err("unknown id should fail");
        assert!(matches!(err, TimerError::NotFound(_)));
    }

    #[test]
    fn update_revalidates_invariants() {
        let mut registry = ReminderRegistry::new();
        let reminder = registry.add(calendar_draft("Aspirin 500mg")).expect("add");

        let err = registry
            .update(
                &reminder.id,
                ReminderPatch {
                    kind: Some(ReminderKind::Calendar {
                        times_of_day: Vec::new(),
                    }),
                    ..ReminderPatch::default()
                },
            )
            .expect_err("emptying times of an active reminder should fail");
        assert!(matches!(err, TimerError::Validation(_)));

        // Failed update leaves the stored reminder untouched.
        assert_eq!(registry.list_active()[0], reminder);
    }

    #[test]
    fn deactivated_reminders_are_retained_but_not_listed() {
        let mut registry = ReminderRegistry::new();
        let reminder = registry.add(calendar_draft("Aspirin 500mg")).expect("add");
        registry
            .update(
                &reminder.id,
                ReminderPatch {
                    is_active: Some(false),
                    ..ReminderPatch::default()
                },
            )
            .expect("deactivate");

        assert!(registry.list_active().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = ReminderRegistry::new();
        let reminder = registry.add(calendar_draft("Aspirin 500mg")).expect("add");
        registry.remove(&reminder.id);
        registry.remove(&reminder.id);
        assert!(registry.is_empty());
    }

    #[test]
    fn list_active_is_a_snapshot() {
        let mut registry = ReminderRegistry::new();
        registry.add(calendar_draft("Aspirin 500mg")).expect("add");

        let mut snapshot = registry.list_active();
        snapshot.clear();
        assert_eq!(registry.list_active().len(), 1);
    }

    #[test]
    fn seeded_registry_continues_id_sequence() {
        let mut registry = ReminderRegistry::from_reminders(vec![Reminder {
            id: "rem-7".to_string(),
            kind: ReminderKind::Calendar {
                times_of_day: vec![TimeOfDay { hour: 8, minute: 0 }],
            },
            label: "Aspirin 500mg".to_string(),
            is_active: true,
        }]);
        let added = registry.add(calendar_draft("Metformin 850mg")).expect("add");
        assert_eq!(added.id, "rem-8");
    }
}
