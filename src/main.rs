pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod error;
pub mod exercise;
pub mod history;
pub mod records;
pub mod runner;
pub mod runtime;
pub mod session;
pub mod workout;

use crate::clock::{SystemTicker, TickerSource};
use crate::config::{Config, ConfigStore, FileConfigStore};
use crate::error::RepsError;
use crate::history::HistoryLog;
use crate::records::{reconcile_and_commit, RecordStore, SqliteRecordStore};
use crate::runner::{SessionRunner, TickOutcome};
use crate::runtime::{spawn_key_reader, ChannelEventSource, EventSource, SessionEvent};
use crate::session::{Phase, SessionSummary};
use crate::workout::WorkoutLibrary;
use chrono::Local;
use clap::Parser;
use crossterm::{
    cursor::MoveToColumn,
    event::{DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers},
    execute, queue,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
};
use itertools::Itertools;
use std::error::Error;
use std::io::Write;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use time_humanize::HumanTime;

/// terminal workout session runner with timed phases and personal records
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Runs timed workout sessions in the terminal: ready/active/rest phases across sets and exercises, rep tracking for scored drills, and a personal-record store that only moves when you beat your best."
)]
pub struct Cli {
    /// workout to run (falls back to the configured one)
    workout: Option<String>,

    /// list available workouts
    #[clap(short, long)]
    list: bool,

    /// show personal records
    #[clap(short, long)]
    records: bool,

    /// show completed session history
    #[clap(long)]
    history: bool,

    /// record snapshots are kept per user
    #[clap(short, long)]
    user: Option<String>,

    /// silence the cue when a capped timer runs out
    #[clap(long)]
    no_cue: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let library = WorkoutLibrary::load()?;

    let config_store = FileConfigStore::new();
    let mut config = config_store.load();
    if let Some(user) = &cli.user {
        config.user = user.clone();
    }
    if cli.no_cue {
        config.cue = false;
    }

    if cli.list {
        print_workouts(&library);
        return Ok(());
    }
    if cli.records {
        return print_records(&config);
    }
    if cli.history {
        return print_history();
    }

    let workout_id = match cli.workout.clone().or_else(|| config.workout.clone()) {
        Some(id) => id,
        None => {
            print_workouts(&library);
            println!("\npick one: reps <workout>");
            return Ok(());
        }
    };

    // Remember the choice for next time
    config.workout = Some(workout_id.clone());
    let _ = config_store.save(&config);

    run_session(&library, &config, &workout_id)
}

fn print_workouts(library: &WorkoutLibrary) {
    println!("workouts:");
    for workout in library.workouts() {
        let exercises = library.workout_exercises(workout);
        let sets: u32 = exercises.iter().map(|e| e.sets).sum();
        println!(
            "  {:<16} {} ({} exercises, {} sets)",
            workout.id,
            workout.name,
            exercises.len(),
            sets
        );
    }
}

fn print_records(config: &Config) -> Result<(), Box<dyn Error>> {
    let store = SqliteRecordStore::open_default()?;
    let Some(snapshot) = store.get(&config.user)? else {
        println!("no records yet for {}", config.user);
        return Ok(());
    };

    println!("personal records for {}:", config.user);
    let names: std::collections::HashMap<_, _> = snapshot
        .exercises
        .iter()
        .map(|m| (m.id.clone(), m.name.clone()))
        .collect();
    for (id, entry) in snapshot.records.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        let age_secs = Local::now().signed_duration_since(entry.at).num_seconds();
        println!(
            "  {:<24} {:>5}   {}",
            names.get(id).unwrap_or(id),
            entry.value,
            HumanTime::from(-age_secs)
        );
    }
    Ok(())
}

fn print_history() -> Result<(), Box<dyn Error>> {
    let Some(log) = HistoryLog::new() else {
        println!("no session history");
        return Ok(());
    };
    let rows = log.read_all()?;
    if rows.is_empty() {
        println!("no session history");
        return Ok(());
    }
    for row in rows {
        println!(
            "{}  {:<16} {} exercises / {} sets, {} improvement(s)",
            row.date, row.workout, row.exercises, row.total_sets, row.improvements
        );
    }
    Ok(())
}

enum SessionEnd {
    Completed,
    Abandoned,
}

fn run_session(
    library: &WorkoutLibrary,
    config: &Config,
    workout_id: &str,
) -> Result<(), Box<dyn Error>> {
    let (tx, source) = ChannelEventSource::pair();
    spawn_key_reader(tx.clone());
    let ticker = SystemTicker::new(tx, Duration::from_secs(1));
    let mut runner = SessionRunner::start(library, workout_id, ticker)?;

    println!(
        "{}  ({} exercises)  [space: next, b: back, p: pause, f: finish, q: quit]",
        runner.workout().name,
        runner.summary(vec![]).exercise_count
    );

    enable_raw_mode()?;
    execute!(std::io::stdout(), EnableFocusChange)?;
    let outcome = session_loop(&mut runner, &source, config.cue);
    execute!(std::io::stdout(), DisableFocusChange)?;
    disable_raw_mode()?;
    println!();

    match outcome? {
        SessionEnd::Abandoned => {
            // No partial write: abandoning discards the session outright
            println!("session abandoned, nothing saved");
            Ok(())
        }
        SessionEnd::Completed => conclude(&runner, library, config),
    }
}

fn conclude<T: TickerSource>(
    runner: &SessionRunner<T>,
    library: &WorkoutLibrary,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    let results = runner.results().clone();

    let mut store = SqliteRecordStore::open_default()?;
    let reconciliation = match reconcile_and_commit(&mut store, library, &config.user, &results) {
        Ok(rec) => rec,
        Err(e) => {
            // The session's results live in memory; show them so a failed
            // store write loses nothing the user typed in
            for (id, value) in results.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                println!("  {id}: {value}");
            }
            return Err(e.into());
        }
    };

    let summary = runner.summary(reconciliation.improved.clone());
    print_summary(library, &summary);

    if let Some(log) = HistoryLog::new() {
        log.append(&summary)?;
    }
    Ok(())
}

fn print_summary(library: &WorkoutLibrary, summary: &SessionSummary) {
    println!(
        "done: {} exercises, {} sets",
        summary.exercise_count, summary.total_sets
    );
    for (id, value) in summary.results.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        let name = library
            .exercise(id)
            .map(|e| e.name.as_str())
            .unwrap_or(id.as_str());
        let marker = if summary.improved.contains(id) {
            "  new record!"
        } else {
            ""
        };
        println!("  {name}: {value}{marker}");
    }
    if summary.results.is_empty() {
        println!("  (no tracked results this session)");
    }
}

fn session_loop<T: TickerSource>(
    runner: &mut SessionRunner<T>,
    source: &ChannelEventSource,
    cue: bool,
) -> Result<SessionEnd, Box<dyn Error>> {
    draw(runner)?;

    loop {
        match source.recv_timeout(Duration::from_millis(250)) {
            Ok(SessionEvent::Tick) => {
                match runner.tick()? {
                    TickOutcome::CueFired => {
                        if cue {
                            ring_bell()?;
                        }
                    }
                    TickOutcome::SessionCompleted => {
                        draw(runner)?;
                        return Ok(SessionEnd::Completed);
                    }
                    _ => {}
                }
                draw(runner)?;
            }
            Ok(SessionEvent::Key(key)) => {
                if let Some(end) = handle_key(runner, key)? {
                    return Ok(end);
                }
                draw(runner)?;
            }
            Ok(SessionEvent::FocusLost) => {
                // Treated as an implicit pause (except during Ready)
                runner.background();
                draw(runner)?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(SessionEnd::Abandoned),
        }
    }
}

fn handle_key<T: TickerSource>(
    runner: &mut SessionRunner<T>,
    key: KeyEvent,
) -> Result<Option<SessionEnd>, Box<dyn Error>> {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => return Ok(Some(SessionEnd::Abandoned)),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return Ok(Some(SessionEnd::Abandoned));
        }
        KeyCode::Char('f') => {
            runner.finish()?;
            return Ok(Some(SessionEnd::Completed));
        }
        KeyCode::Char(' ') => {
            runner.next()?;
            if runner.is_completed() {
                return Ok(Some(SessionEnd::Completed));
            }
        }
        KeyCode::Char('b') => runner.previous()?,
        KeyCode::Char('p') => {
            if runner.state().paused {
                runner.resume()?;
            } else {
                runner.pause();
            }
        }
        KeyCode::Backspace => runner.backspace(),
        KeyCode::Enter => match runner.submit_result() {
            // Expected user behavior, not a fault: keep waiting for digits
            Err(RepsError::InvalidInput(_)) => {}
            other => other?,
        },
        KeyCode::Char(c) => runner.push_digit(c),
        _ => {}
    }
    Ok(None)
}

fn ring_bell() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "\x07")?;
    stdout.flush()
}

fn draw<T: TickerSource>(runner: &SessionRunner<T>) -> std::io::Result<()> {
    let state = runner.state();
    let exercise = runner.exercise();

    let mut line = format!(
        "{}  set {}/{}",
        exercise.name,
        state.set_index + 1,
        exercise.sets
    );
    if let Some(variant) = runner.video_variant() {
        line.push_str(&format!(" [{variant}]"));
    }

    match state.phase {
        Phase::Completed => line.push_str("  done"),
        Phase::Active if exercise.uses_tracking => {
            if runner.cue_fired() || exercise.set_duration.is_none() {
                line.push_str(&format!("  enter result: {}_", state.entry));
            } else {
                line.push_str(&format!(
                    "  {} {}s  result: {}_",
                    state.phase, state.remaining, state.entry
                ));
            }
        }
        phase => line.push_str(&format!("  {} {}s", phase, state.remaining)),
    }
    if state.paused {
        line.push_str("  (paused)");
    }

    let mut stdout = std::io::stdout();
    // Raw mode: redraw the status in place
    queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    write!(stdout, "{line}")?;
    stdout.flush()
}
