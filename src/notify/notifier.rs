use anyhow::Result;

/// Default tone: short mid-range beep, synthesized by the sink so no sound
/// asset is needed.
pub const TONE_FREQUENCY_HZ: u32 = 880;
pub const TONE_DURATION_MS: u64 = 400;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PermissionState {
    Undetermined,
    Granted,
    Denied,
}

/// The platform collaborators behind the notifier. Each method may fail
/// independently; the notifier never lets one sink failure suppress the
/// others.
pub trait NotifySink {
    fn play_tone(&self, frequency_hz: u32, duration_ms: u64) -> Result<()>;
    fn show_os_notification(&self, title: &str, body: &str) -> Result<()>;
    fn show_toast(&self, title: &str, body: &str) -> Result<()>;
    fn request_permission(&self) -> PermissionState;
}

/// Converts a scheduler match into side effects: tone, OS notification,
/// in-app toast, in that order. The dedup decision has already happened in
/// the scheduler's evaluation turn; `fire` assumes validated, deduplicated
/// input.
pub struct Notifier<S: NotifySink> {
    sink: S,
    sound_enabled: bool,
    os_notifications_wanted: bool,
    permission: PermissionState,
}

impl<S: NotifySink> Notifier<S> {
    pub fn new(sink: S, sound_enabled: bool, os_notifications_wanted: bool) -> Self {
        Self {
            sink,
            sound_enabled,
            os_notifications_wanted,
            permission: PermissionState::Undetermined,
        }
    }

    /// Explicit capability negotiation, invoked once before the watch
    /// starts and never from inside the tick loop. Denial degrades to tone
    /// plus toast with a console-observable warning.
    pub fn negotiate_permission(&mut self) -> PermissionState {
        if !self.os_notifications_wanted {
            self.permission = PermissionState::Denied;
            return self.permission;
        }
        if self.permission == PermissionState::Undetermined {
            self.permission = self.sink.request_permission();
            if self.permission == PermissionState::Denied {
                eprintln!("warning: notification permission denied, using tone and toast only");
            }
        }
        self.permission
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// Fires all side effects for one occurrence. Failures in the tone or
    /// OS notification are logged and swallowed; the toast is always
    /// attempted so the user sees an in-app indication no matter what.
    pub fn fire(&self, title: &str, body: &str) {
        if self.sound_enabled
            && let Err(err) = self.sink.play_tone(TONE_FREQUENCY_HZ, TONE_DURATION_MS)
        {
            eprintln!("warning: reminder tone failed: {err:#}");
        }

        if self.permission == PermissionState::Granted
            && let Err(err) = self.sink.show_os_notification(title, body)
        {
            eprintln!("warning: OS notification failed: {err:#}");
        }

        if let Err(err) = self.sink.show_toast(title, body) {
            eprintln!("warning: toast failed: {err:#}");
        }
    }
}

/// Terminal-backed sink used by the binary: the tone is the terminal bell,
/// the toast is a stdout line, and OS notifications are granted purely by
/// the opt-in flag.
pub struct ConsoleSink {
    os_granted: bool,
}

impl ConsoleSink {
    pub fn new(os_granted: bool) -> Self {
        Self { os_granted }
    }
}

impl NotifySink for ConsoleSink {
    fn play_tone(&self, _frequency_hz: u32, _duration_ms: u64) -> Result<()> {
        print!("\u{7}");
        Ok(())
    }

    fn show_os_notification(&self, title: &str, body: &str) -> Result<()> {
        println!("[notify] {title}: {body}");
        Ok(())
    }

    fn show_toast(&self, title: &str, body: &str) -> Result<()> {
        println!("[toast] {title}: {body}");
        Ok(())
    }

    fn request_permission(&self) -> PermissionState {
        if self.os_granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
        fail_tone: bool,
        fail_os: bool,
        permission: Option<PermissionState>,
        permission_requests: Mutex<usize>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl NotifySink for &RecordingSink {
        fn play_tone(&self, frequency_hz: u32, _duration_ms: u64) -> Result<()> {
            self.calls.lock().unwrap().push(format!("tone:{frequency_hz}"));
            if self.fail_tone {
                bail!("audio device unavailable");
            }
            Ok(())
        }

        fn show_os_notification(&self, _title: &str, body: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("os:{body}"));
            if self.fail_os {
                bail!("notification daemon not running");
            }
            Ok(())
        }

        fn show_toast(&self, _title: &str, body: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("toast:{body}"));
            Ok(())
        }

        fn request_permission(&self) -> PermissionState {
            *self.permission_requests.lock().unwrap() += 1;
            self.permission.unwrap_or(PermissionState::Denied)
        }
    }

    #[test]
    fn fire_runs_tone_os_toast_in_order() {
        let sink = RecordingSink {
            permission: Some(PermissionState::Granted),
            ..RecordingSink::default()
        };
        let mut notifier = Notifier::new(&sink, true, true);
        notifier.negotiate_permission();

        notifier.fire("Medication due", "Aspirin 500mg");
        assert_eq!(
            sink.calls(),
            [
                "tone:880",
                "os:Aspirin 500mg",
                "toast:Aspirin 500mg"
            ]
        );
    }

    #[test]
    fn tone_failure_never_suppresses_toast() {
        let sink = RecordingSink {
            fail_tone: true,
            fail_os: true,
            permission: Some(PermissionState::Granted),
            ..RecordingSink::default()
        };
        let mut notifier = Notifier::new(&sink, true, true);
        notifier.negotiate_permission();

        notifier.fire("Medication due", "Aspirin 500mg");
        let calls = sink.calls();
        assert_eq!(calls.last().map(String::as_str), Some("toast:Aspirin 500mg"));
        assert_eq!(calls.len(), 3);
    }

    #[test]
    fn denied_permission_degrades_to_tone_and_toast() {
        let sink = RecordingSink {
            permission: Some(PermissionState::Denied),
            ..RecordingSink::default()
        };
        let mut notifier = Notifier::new(&sink, true, true);
        assert_eq!(notifier.negotiate_permission(), PermissionState::Denied);

        notifier.fire("Medication due", "Aspirin 500mg");
        assert_eq!(sink.calls(), ["tone:880", "toast:Aspirin 500mg"]);
    }

    #[test]
    fn sound_disabled_skips_the_tone() {
        let sink = RecordingSink::default();
        let notifier = Notifier::new(&sink, false, false);

        notifier.fire("Medication due", "Aspirin 500mg");
        assert_eq!(sink.calls(), ["toast:Aspirin 500mg"]);
    }

    #[test]
    fn permission_is_requested_once_and_only_when_wanted() {
        let sink = RecordingSink {
            permission: Some(PermissionState::Granted),
            ..RecordingSink::default()
        };
        let mut notifier = Notifier::new(&sink, true, true);
        notifier.negotiate_permission();
        notifier.negotiate_permission();
        assert_eq!(*sink.permission_requests.lock().unwrap(), 1);

        let opted_out_sink = RecordingSink::default();
        let mut opted_out = Notifier::new(&opted_out_sink, true, false);
        assert_eq!(opted_out.negotiate_permission(), PermissionState::Denied);
        assert_eq!(*opted_out_sink.permission_requests.lock().unwrap(), 0);
    }
}
