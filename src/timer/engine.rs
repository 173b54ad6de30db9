use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use crate::clock::{Clock, boundary_delay};
use crate::error::{TimerError, TimerResult};
use crate::notify::ledger::FireLedger;
use crate::reminder::model::Reminder;
use crate::timer::scheduler::{CalendarWatch, CountdownSession, CountdownTick, FireEvent};

const CALENDAR_INTERVAL_MS: u64 = 60_000;
const COUNTDOWN_INTERVAL_MS: u64 = 1_000;

/// Handle into the engine's timer arena.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Commands accepted by a running timer. Calendar watches ignore the
/// countdown-only commands. A `Reset` without a duration restarts the
/// session at its configured duration.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Pause,
    Resume,
    Reset { duration_seconds: Option<u64> },
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One completed evaluation pass. For countdowns `remaining_seconds`
    /// is the time left; for calendar watches it is the time until the
    /// next due slot (zero when nothing is scheduled).
    Tick {
        timer_id: TimerId,
        remaining_seconds: u64,
    },
    Fire {
        timer_id: TimerId,
        event: FireEvent,
    },
    Complete {
        timer_id: TimerId,
    },
}

struct Worker {
    cmd_tx: Sender<Command>,
    events_rx: Receiver<EngineEvent>,
    cancelled: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Single authoritative scheduler. Each timer runs on its own worker
/// thread; callers talk to it only through the command/event envelope, and
/// all fire/dedup decisions happen inside the worker's evaluation turn, so
/// no two passes for one timer can ever overlap.
pub struct TimerEngine {
    clock: Arc<dyn Clock>,
    next_id: u64,
    workers: HashMap<TimerId, Worker>,
    calendar_watch: Option<TimerId>,
    calendar_interval_ms: u64,
}

impl TimerEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::new_with_calendar_interval(clock, CALENDAR_INTERVAL_MS)
    }

    /// Production always watches on minute boundaries; the interval is
    /// injectable so cadence behavior is observable in tests.
    pub fn new_with_calendar_interval(clock: Arc<dyn Clock>, calendar_interval_ms: u64) -> Self {
        Self {
            clock,
            next_id: 1,
            workers: HashMap::new(),
            calendar_watch: None,
            calendar_interval_ms: calendar_interval_ms.max(1),
        }
    }

    /// Begins per-minute evaluation over a snapshot of the given reminders.
    /// Idempotent: an already-running watch is cancelled and restarted with
    /// the fresh snapshot.
    pub fn start_calendar_watch(
        &mut self,
        snapshot: Vec<Reminder>,
        ledger: Arc<Mutex<FireLedger>>,
    ) -> TimerResult<TimerId> {
        if let Some(previous) = self.calendar_watch.take() {
            self.cancel(previous);
        }

        let timer_id = self.allocate_id();
        let watch = CalendarWatch::new(snapshot);
        let clock = Arc::clone(&self.clock);
        let interval_ms = self.calendar_interval_ms;
        let (cmd_tx, cmd_rx) = channel();
        let (events_tx, events_rx) = channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_flag = Arc::clone(&cancelled);

        let join = Builder::new()
            .name(format!("medtick-watch-{}", timer_id.value()))
            .spawn(move || {
                run_calendar_worker(
                    timer_id,
                    watch,
                    ledger,
                    clock,
                    interval_ms,
                    cmd_rx,
                    events_tx,
                    thread_flag,
                );
            })
            .map_err(|err| TimerError::ContextUnavailable(err.to_string()))?;

        self.workers.insert(
            timer_id,
            Worker {
                cmd_tx,
                events_rx,
                cancelled,
                join: Some(join),
            },
        );
        self.calendar_watch = Some(timer_id);
        Ok(timer_id)
    }

    /// Begins a per-second countdown toward `now + duration_seconds`.
    pub fn start_countdown(&mut self, duration_seconds: u64) -> TimerResult<TimerId> {
        if duration_seconds == 0 {
            return Err(TimerError::InvalidDuration(duration_seconds));
        }

        let timer_id = self.allocate_id();
        let clock = Arc::clone(&self.clock);
        let (cmd_tx, cmd_rx) = channel();
        let (events_tx, events_rx) = channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_flag = Arc::clone(&cancelled);

        let join = Builder::new()
            .name(format!("medtick-countdown-{}", timer_id.value()))
            .spawn(move || {
                run_countdown_worker(
                    timer_id,
                    duration_seconds,
                    clock,
                    cmd_rx,
                    events_tx,
                    thread_flag,
                );
            })
            .map_err(|err| TimerError::ContextUnavailable(err.to_string()))?;

        self.workers.insert(
            timer_id,
            Worker {
                cmd_tx,
                events_rx,
                cancelled,
                join: Some(join),
            },
        );
        Ok(timer_id)
    }

    pub fn command(&self, timer_id: TimerId, command: Command) -> TimerResult<()> {
        // Invalid durations surface synchronously at the boundary; the
        // worker never sees them.
        if let Command::Reset {
            duration_seconds: Some(0),
        } = command
        {
            return Err(TimerError::InvalidDuration(0));
        }
        let worker = self
            .workers
            .get(&timer_id)
            .ok_or_else(|| TimerError::NotFound(format!("timer-{}", timer_id.value())))?;
        // A worker that already exited treats any further command as a no-op.
        let _ = worker.cmd_tx.send(command);
        Ok(())
    }

    /// Blocks up to `timeout` for the next event from one timer. `None`
    /// means the timeout elapsed or the worker has exited.
    pub fn poll_event(&self, timer_id: TimerId, timeout: Duration) -> TimerResult<Option<EngineEvent>> {
        let worker = self
            .workers
            .get(&timer_id)
            .ok_or_else(|| TimerError::NotFound(format!("timer-{}", timer_id.value())))?;
        match worker.events_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    /// Synchronous cancel: the worker is stopped and joined, and every
    /// already-queued event is discarded, so nothing for this timer is
    /// observable after this returns.
    pub fn cancel(&mut self, timer_id: TimerId) {
        let Some(mut worker) = self.workers.remove(&timer_id) else {
            return;
        };
        worker.cancelled.store(true, Ordering::SeqCst);
        let _ = worker.cmd_tx.send(Command::Cancel);
        if let Some(join) = worker.join.take() {
            let _ = join.join();
        }
        while worker.events_rx.try_recv().is_ok() {}
        if self.calendar_watch == Some(timer_id) {
            self.calendar_watch = None;
        }
    }

    pub fn active_timers(&self) -> usize {
        self.workers.len()
    }

    fn allocate_id(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        let ids = self.workers.keys().copied().collect::<Vec<_>>();
        for id in ids {
            self.cancel(id);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_calendar_worker(
    timer_id: TimerId,
    watch: CalendarWatch,
    ledger: Arc<Mutex<FireLedger>>,
    clock: Arc<dyn Clock>,
    interval_ms: u64,
    cmd_rx: Receiver<Command>,
    events_tx: Sender<EngineEvent>,
    cancelled: Arc<AtomicBool>,
) {
    // Align to the next interval boundary, then wake once per interval;
    // the delay is recomputed from a fresh clock read after every pass.
    let mut delay = boundary_delay(clock.now().timestamp_millis(), interval_ms);
    loop {
        match cmd_rx.recv_timeout(delay) {
            Ok(Command::Cancel) | Err(RecvTimeoutError::Disconnected) => return,
            Ok(_) => {
                // A command consumed mid-wait must not re-arm the stale
                // delay, or it would push the next wake past the boundary.
                delay = boundary_delay(clock.now().timestamp_millis(), interval_ms);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let now = clock.now();
        let fires = {
            let mut ledger = ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            watch.evaluate(now, &mut ledger)
        };
        for event in fires {
            if events_tx.send(EngineEvent::Fire { timer_id, event }).is_err() {
                return;
            }
        }

        let until_next = watch
            .next_due(now)
            .map(|due| (due - now).num_seconds().max(0) as u64)
            .unwrap_or(0);
        if events_tx
            .send(EngineEvent::Tick {
                timer_id,
                remaining_seconds: until_next,
            })
            .is_err()
        {
            return;
        }

        delay = boundary_delay(clock.now().timestamp_millis(), interval_ms);
    }
}

fn run_countdown_worker(
    timer_id: TimerId,
    duration_seconds: u64,
    clock: Arc<dyn Clock>,
    cmd_rx: Receiver<Command>,
    events_tx: Sender<EngineEvent>,
    cancelled: Arc<AtomicBool>,
) {
    let mut session = match CountdownSession::start(duration_seconds, clock.now()) {
        Ok(session) => session,
        // Duration was validated before spawn; a failure here means the
        // caller raced a reset to zero, which start_countdown forbids.
        Err(_) => return,
    };

    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let wait = if session.is_running() {
            // Second-boundary alignment keeps displayed ticks landing on
            // whole seconds.
            Some(boundary_delay(
                clock.now().timestamp_millis(),
                COUNTDOWN_INTERVAL_MS,
            ))
        } else {
            // Paused or completed: nothing to do until a command arrives.
            None
        };

        let command = match wait {
            Some(delay) => match cmd_rx.recv_timeout(delay) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match cmd_rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            Some(Command::Cancel) => return,
            Some(Command::Pause) => {
                session.pause(clock.now());
                continue;
            }
            Some(Command::Resume) => {
                session.resume(clock.now());
                continue;
            }
            Some(Command::Reset { duration_seconds }) => {
                // Zero durations were rejected at the engine boundary.
                let _ = session.reset(duration_seconds);
                continue;
            }
            None => {}
        }

        match session.tick(clock.now()) {
            CountdownTick::Tick { remaining_seconds } => {
                if events_tx
                    .send(EngineEvent::Tick {
                        timer_id,
                        remaining_seconds,
                    })
                    .is_err()
                {
                    return;
                }
            }
            CountdownTick::Complete => {
                let _ = events_tx.send(EngineEvent::Complete { timer_id });
                return;
            }
            CountdownTick::Noop => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::clock::SystemClock;
    use crate::reminder::model::{Reminder, ReminderKind, TimeOfDay};

    fn engine() -> TimerEngine {
        TimerEngine::new(Arc::new(SystemClock))
    }

    #[test]
    fn zero_duration_countdown_is_rejected() {
        let mut engine = engine();
        let err = engine.start_countdown(0).expect_err("zero should fail");
        assert!(matches!(err, TimerError::InvalidDuration(0)));
        assert_eq!(engine.active_timers(), 0);
    }

    #[test]
    fn countdown_ticks_then_completes_exactly_once() {
        let mut engine = engine();
        let timer_id = engine.start_countdown(2).expect("start");

        let mut ticks = 0;
        let mut completes = 0;
        let deadline = std::time::Instant::now() + Duration::from_secs(6);
        while std::time::Instant::now() < deadline {
            match engine
                .poll_event(timer_id, Duration::from_millis(500))
                .expect("known timer")
            {
                Some(EngineEvent::Tick { .. }) => ticks += 1,
                Some(EngineEvent::Complete { .. }) => completes += 1,
                Some(EngineEvent::Fire { .. }) => panic!("countdown never fires calendar events"),
                None => {
                    if completes > 0 {
                        break;
                    }
                }
            }
        }

        assert_eq!(completes, 1);
        assert!(ticks >= 1, "expected at least one tick before completion");
    }

    #[test]
    fn cancel_produces_no_further_events() {
        let mut engine = engine();
        let timer_id = engine.start_countdown(2).expect("start");
        engine.cancel(timer_id);

        // Well past the original due time.
        thread::sleep(Duration::from_millis(2_500));
        let err = engine
            .poll_event(timer_id, Duration::from_millis(10))
            .expect_err("cancelled timer leaves the arena");
        assert!(matches!(err, TimerError::NotFound(_)));
        assert_eq!(engine.active_timers(), 0);
    }

    #[test]
    fn paused_countdown_stops_ticking() {
        let mut engine = engine();
        let timer_id = engine.start_countdown(30).expect("start");
        engine.command(timer_id, Command::Pause).expect("pause");

        // Give the worker time to process the pause, then drain.
        thread::sleep(Duration::from_millis(200));
        while engine
            .poll_event(timer_id, Duration::from_millis(50))
            .expect("known timer")
            .is_some()
        {}

        // No ticks arrive while paused.
        let quiet = engine
            .poll_event(timer_id, Duration::from_millis(1_500))
            .expect("known timer");
        assert_eq!(quiet, None);

        engine.command(timer_id, Command::Resume).expect("resume");
        let resumed = engine
            .poll_event(timer_id, Duration::from_secs(3))
            .expect("known timer");
        assert!(matches!(resumed, Some(EngineEvent::Tick { .. })));
    }

    #[test]
    fn calendar_watch_restart_is_idempotent() {
        let mut engine = engine();
        let ledger = Arc::new(Mutex::new(FireLedger::new()));
        let snapshot = vec![Reminder {
            id: "rem-1".to_string(),
            kind: ReminderKind::Calendar {
                times_of_day: vec![TimeOfDay { hour: 8, minute: 0 }],
            },
            label: "Aspirin 500mg".to_string(),
            is_active: true,
        }];

        let first = engine
            .start_calendar_watch(snapshot.clone(), Arc::clone(&ledger))
            .expect("first watch");
        let second = engine
            .start_calendar_watch(snapshot, ledger)
            .expect("second watch");

        assert_ne!(first, second);
        assert_eq!(engine.active_timers(), 1);
        let err = engine
            .poll_event(first, Duration::from_millis(10))
            .expect_err("first watch was cancelled");
        assert!(matches!(err, TimerError::NotFound(_)));
    }

    #[test]
    fn command_on_unknown_timer_is_not_found() {
        let engine = engine();
        let err = engine
            .command(TimerId(99), Command::Pause)
            .expect_err("unknown timer");
        assert!(matches!(err, TimerError::NotFound(_)));
    }

    #[test]
    fn zero_duration_reset_is_rejected_at_the_boundary() {
        let mut engine = engine();
        let timer_id = engine.start_countdown(5).expect("start");

        let err = engine
            .command(
                timer_id,
                Command::Reset {
                    duration_seconds: Some(0),
                },
            )
            .expect_err("zero reset should fail synchronously");
        assert!(matches!(err, TimerError::InvalidDuration(0)));

        // A bare reset is still accepted.
        engine
            .command(
                timer_id,
                Command::Reset {
                    duration_seconds: None,
                },
            )
            .expect("bare reset");
        engine.cancel(timer_id);
    }

    #[test]
    fn bare_reset_restarts_at_configured_duration() {
        let mut engine = engine();
        let timer_id = engine.start_countdown(30).expect("start");

        // Let at least one tick shrink the remaining time, then reset
        // without a duration and resume.
        let first = engine
            .poll_event(timer_id, Duration::from_secs(3))
            .expect("known timer");
        assert!(matches!(first, Some(EngineEvent::Tick { .. })));

        engine
            .command(
                timer_id,
                Command::Reset {
                    duration_seconds: None,
                },
            )
            .expect("reset");
        thread::sleep(Duration::from_millis(100));
        while engine
            .poll_event(timer_id, Duration::from_millis(50))
            .expect("known timer")
            .is_some()
        {}

        engine.command(timer_id, Command::Resume).expect("resume");
        let resumed = engine
            .poll_event(timer_id, Duration::from_secs(3))
            .expect("known timer");
        match resumed {
            Some(EngineEvent::Tick { remaining_seconds, .. }) => {
                // Back at the full configured duration, give or take the
                // first second-boundary wake.
                assert!(
                    (29..=30).contains(&remaining_seconds),
                    "expected a restarted countdown, got {remaining_seconds}"
                );
            }
            other => panic!("expected a tick after resume, got {other:?}"),
        }
        engine.cancel(timer_id);
    }

    #[test]
    fn ignored_commands_do_not_postpone_calendar_ticks() {
        let mut engine =
            TimerEngine::new_with_calendar_interval(Arc::new(SystemClock), 200);
        let ledger = Arc::new(Mutex::new(FireLedger::new()));
        let timer_id = engine
            .start_calendar_watch(Vec::new(), ledger)
            .expect("watch");

        // Commands arriving faster than the interval must not keep
        // re-arming the wait and starving the evaluation passes.
        for _ in 0..20 {
            engine.command(timer_id, Command::Pause).expect("command");
            thread::sleep(Duration::from_millis(50));
        }

        let mut ticks = 0;
        while let Some(event) = engine
            .poll_event(timer_id, Duration::from_millis(10))
            .expect("known timer")
        {
            if matches!(event, EngineEvent::Tick { .. }) {
                ticks += 1;
            }
        }
        assert!(ticks >= 2, "expected ticks to keep their cadence, got {ticks}");
    }
}
