mod api;
mod clock;
mod error;
mod notify;
mod reminder;
mod timer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Parser;

use crate::api::{ApiServer, ApiServerConfig, ReminderView};
use crate::clock::{SystemClock, boundary_delay, format_clock};
use crate::error::TimerError;
use crate::notify::ledger::FireLedger;
use crate::notify::notifier::{ConsoleSink, Notifier};
use crate::reminder::model::{Reminder, ReminderKind, load_reminder_file};
use crate::reminder::registry::ReminderRegistry;
use crate::timer::engine::{EngineEvent, TimerEngine};
use crate::timer::scheduler::{CalendarWatch, CountdownSession, CountdownTick, FireEvent};

const CALENDAR_INTERVAL_MS: u64 = 60_000;
const COUNTDOWN_INTERVAL_MS: u64 = 1_000;

#[derive(Parser, Debug)]
#[command(
    name = "medtick",
    version,
    about = "Medication reminder daemon with a drift-corrected wall-clock scheduler"
)]
struct Cli {
    /// Reminder file (JSON, version 1).
    #[arg(long, default_value = "reminders.json")]
    reminders: PathBuf,

    /// Fire ledger file; keeps reloads from double-notifying.
    #[arg(long, default_value = "fires.json")]
    ledger: PathBuf,

    /// Validate the reminder file, print a summary and exit.
    #[arg(long)]
    check: bool,

    /// Run a one-off countdown for this many seconds instead of the
    /// calendar watch.
    #[arg(long)]
    countdown: Option<u64>,

    /// Label shown when a countdown completes.
    #[arg(long, default_value = "Countdown")]
    label: String,

    #[arg(long, default_value = "127.0.0.1")]
    api_bind: String,

    #[arg(long, default_value_t = 8820)]
    api_port: u16,

    /// Disable the status API.
    #[arg(long)]
    no_api: bool,

    /// Opt in to OS-level notifications (triggers permission negotiation).
    #[arg(long)]
    os_notifications: bool,

    /// Disable the reminder tone.
    #[arg(long)]
    quiet: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.check {
        return run_check(&cli);
    }

    let mut notifier = Notifier::new(
        ConsoleSink::new(cli.os_notifications),
        !cli.quiet,
        cli.os_notifications,
    );
    notifier.negotiate_permission();

    if let Some(duration_seconds) = cli.countdown {
        return run_countdown(duration_seconds, &cli.label, &notifier);
    }
    run_calendar_watch(&cli, &notifier)
}

fn run_check(cli: &Cli) -> Result<()> {
    let reminders = load_reminder_file(&cli.reminders)
        .with_context(|| format!("failed to load {}", cli.reminders.display()))?;
    let active = reminders.iter().filter(|reminder| reminder.is_active).count();
    println!(
        "Reminder file OK: {} reminders ({} active)",
        reminders.len(),
        active
    );
    for reminder in &reminders {
        match &reminder.kind {
            ReminderKind::Calendar { times_of_day } => {
                let slots = times_of_day
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("  {} '{}' daily at {}", reminder.id, reminder.label, slots);
            }
            ReminderKind::Countdown { duration_seconds } => {
                println!(
                    "  {} '{}' countdown {}",
                    reminder.id,
                    reminder.label,
                    format_clock(*duration_seconds)
                );
            }
        }
    }
    Ok(())
}

/// A missing worker thread degrades to the inline timer on the calling
/// thread; any other startup error is fatal to the caller.
fn inline_fallback_reason(err: TimerError) -> Result<String> {
    match err {
        TimerError::ContextUnavailable(reason) => Ok(reason),
        other => Err(other.into()),
    }
}

fn run_countdown(
    duration_seconds: u64,
    label: &str,
    notifier: &Notifier<ConsoleSink>,
) -> Result<()> {
    if duration_seconds == 0 {
        bail!("--countdown must be greater than zero");
    }

    let mut engine = TimerEngine::new(Arc::new(SystemClock));
    let timer_id = match engine.start_countdown(duration_seconds) {
        Ok(timer_id) => timer_id,
        Err(err) => {
            let reason = inline_fallback_reason(err)?;
            eprintln!("warning: timer worker unavailable ({reason}); running countdown inline");
            return run_countdown_inline(duration_seconds, label, notifier);
        }
    };
    println!("Countdown started: {}", format_clock(duration_seconds));

    loop {
        match engine.poll_event(timer_id, Duration::from_secs(2))? {
            Some(EngineEvent::Tick {
                remaining_seconds, ..
            }) => {
                println!("  {}", format_clock(remaining_seconds));
            }
            Some(EngineEvent::Complete { .. }) => {
                notifier.fire("Time is up", label);
                return Ok(());
            }
            Some(EngineEvent::Fire { .. }) => {}
            // Worker exited without completing; treat as cancelled.
            None => return Ok(()),
        }
    }
}

fn run_countdown_inline(
    duration_seconds: u64,
    label: &str,
    notifier: &Notifier<ConsoleSink>,
) -> Result<()> {
    let mut session = CountdownSession::start(duration_seconds, Local::now())?;
    println!("Countdown started: {}", format_clock(duration_seconds));

    loop {
        let delay = boundary_delay(Local::now().timestamp_millis(), COUNTDOWN_INTERVAL_MS);
        thread::sleep(delay);
        match session.tick(Local::now()) {
            CountdownTick::Tick { remaining_seconds } => {
                println!("  {}", format_clock(remaining_seconds));
            }
            CountdownTick::Complete => {
                notifier.fire("Time is up", label);
                return Ok(());
            }
            CountdownTick::Noop => {}
        }
    }
}

fn run_calendar_watch(cli: &Cli, notifier: &Notifier<ConsoleSink>) -> Result<()> {
    let reminders = load_reminder_file(&cli.reminders)
        .with_context(|| format!("failed to load {}", cli.reminders.display()))?;
    let registry = ReminderRegistry::from_reminders(reminders);

    let mut ledger = FireLedger::load(&cli.ledger)
        .with_context(|| format!("failed to load {}", cli.ledger.display()))?;
    ledger.prune(Local::now().date_naive());
    let ledger = Arc::new(Mutex::new(ledger));

    let api_server = if cli.no_api {
        None
    } else {
        let server = ApiServer::start(ApiServerConfig {
            bind_addr: cli.api_bind.clone(),
            port: cli.api_port,
        })
        .with_context(|| {
            format!("failed to start status API at {}:{}", cli.api_bind, cli.api_port)
        })?;
        {
            let mut state = server.state.lock().unwrap_or_else(|p| p.into_inner());
            state.reminders = registry.all().iter().map(reminder_view).collect();
        }
        Some(server)
    };

    let snapshot = registry.list_active();
    let watched = snapshot
        .iter()
        .filter(|reminder| matches!(reminder.kind, ReminderKind::Calendar { .. }))
        .count();
    if watched == 0 {
        eprintln!("warning: no active calendar reminders to watch");
    }

    let mut engine = TimerEngine::new(Arc::new(SystemClock));
    let watch_id = match engine.start_calendar_watch(snapshot.clone(), Arc::clone(&ledger)) {
        Ok(watch_id) => watch_id,
        Err(err) => {
            let reason = inline_fallback_reason(err)?;
            eprintln!("warning: timer worker unavailable ({reason}); running watch inline");
            return run_calendar_inline(cli, notifier, snapshot, ledger, api_server, watched);
        }
    };
    println!("Watching {watched} reminders ({} loaded)", registry.len());

    loop {
        match engine.poll_event(watch_id, Duration::from_secs(5))? {
            Some(EngineEvent::Fire { event, .. }) => {
                fire_and_persist(notifier, &ledger, &cli.ledger, &event);
            }
            Some(EngineEvent::Tick {
                remaining_seconds, ..
            }) => {
                let next_due = (remaining_seconds > 0)
                    .then(|| Local::now() + chrono::Duration::seconds(remaining_seconds as i64));
                refresh_watch_snapshot(api_server.as_ref(), &ledger, watched, next_due);
            }
            Some(EngineEvent::Complete { .. }) => {}
            None => continue,
        }
    }
}

fn run_calendar_inline(
    cli: &Cli,
    notifier: &Notifier<ConsoleSink>,
    snapshot: Vec<Reminder>,
    ledger: Arc<Mutex<FireLedger>>,
    api_server: Option<ApiServer>,
    watched: usize,
) -> Result<()> {
    let watch = CalendarWatch::new(snapshot);
    println!("Watching {watched} reminders (inline)");

    loop {
        let delay = boundary_delay(Local::now().timestamp_millis(), CALENDAR_INTERVAL_MS);
        thread::sleep(delay);

        let now = Local::now();
        let fires = {
            let mut guard = ledger.lock().unwrap_or_else(|p| p.into_inner());
            watch.evaluate(now, &mut guard)
        };
        for event in fires {
            fire_and_persist(notifier, &ledger, &cli.ledger, &event);
        }
        refresh_watch_snapshot(api_server.as_ref(), &ledger, watched, watch.next_due(now));
    }
}

fn fire_and_persist(
    notifier: &Notifier<ConsoleSink>,
    ledger: &Arc<Mutex<FireLedger>>,
    ledger_path: &Path,
    event: &FireEvent,
) {
    let body = format!("{} ({})", event.label, event.slot);
    notifier.fire("Medication due", &body);
    let guard = ledger.lock().unwrap_or_else(|p| p.into_inner());
    if let Err(err) = guard.save(ledger_path) {
        eprintln!("warning: could not persist fire ledger: {err:#}");
    }
}

fn refresh_watch_snapshot(
    api_server: Option<&ApiServer>,
    ledger: &Arc<Mutex<FireLedger>>,
    watched: usize,
    next_due: Option<DateTime<Local>>,
) {
    let Some(server) = api_server else {
        return;
    };
    let fires_today = {
        let guard = ledger.lock().unwrap_or_else(|p| p.into_inner());
        guard.fires_on(Local::now().date_naive())
    };
    let next = next_due.map(|due| due.format("%Y-%m-%d %H:%M").to_string());
    api::refresh_snapshot(&server.state, watched, fires_today, next);
}

fn reminder_view(reminder: &Reminder) -> ReminderView {
    let (kind, times_of_day) = match &reminder.kind {
        ReminderKind::Calendar { times_of_day } => (
            "calendar".to_string(),
            times_of_day.iter().map(ToString::to_string).collect(),
        ),
        ReminderKind::Countdown { .. } => ("countdown".to_string(), Vec::new()),
    };
    ReminderView {
        id: reminder.id.clone(),
        label: reminder.label.clone(),
        kind,
        times_of_day,
        is_active: reminder.is_active,
    }
}
