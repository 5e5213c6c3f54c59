use crate::clock::TickerSource;
use crate::error::RepsError;
use crate::exercise::Exercise;
use crate::session::{Foot, Phase, SessionState, SessionSummary, READY_SECS};
use crate::workout::{Workout, WorkoutLibrary};
use std::collections::HashMap;

/// Longest accepted result entry, in digits.
const MAX_ENTRY_DIGITS: usize = 5;

/// What one countdown tick did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick ignored: paused, untimed phase, or countdown already spent.
    Idle,
    /// Countdown decremented, phase unchanged.
    Counted,
    /// A capped tracked timer hit zero; the set still waits for its result.
    CueFired,
    /// The countdown completed its phase edge.
    PhaseAdvanced,
    SessionCompleted,
}

/// Drives one workout attempt through its Ready -> Active -> Rest cycles.
///
/// Owns the ephemeral `SessionState` and the single live ticker guard; every
/// phase entry releases the previous guard before installing a new one, and
/// pause/teardown release it outright. All mutation goes through the methods
/// below — the shell only reads state and reacts to outcomes.
pub struct SessionRunner<T: TickerSource> {
    workout: Workout,
    exercises: Vec<Exercise>,
    state: SessionState,
    ticker: T,
    guard: Option<T::Guard>,
    cue_fired: bool,
}

impl<T: TickerSource> std::fmt::Debug for SessionRunner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("workout", &self.workout)
            .field("exercises", &self.exercises)
            .field("state", &self.state)
            .field("guard", &self.guard.is_some())
            .field("cue_fired", &self.cue_fired)
            .finish()
    }
}

fn parse_entry(raw: &str) -> Result<u32, RepsError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| RepsError::InvalidInput(raw.to_string()))
}

impl<T: TickerSource> SessionRunner<T> {
    /// Start a session for the given workout id. Refuses to construct when the
    /// id is unknown.
    pub fn start(
        library: &WorkoutLibrary,
        workout_id: &str,
        ticker: T,
    ) -> Result<Self, RepsError> {
        let workout = library.workout(workout_id)?.clone();
        let exercises: Vec<Exercise> = library
            .workout_exercises(&workout)
            .into_iter()
            .cloned()
            .collect();

        let mut runner = Self {
            workout,
            exercises,
            state: SessionState::default(),
            ticker,
            guard: None,
            cue_fired: false,
        };
        runner.refresh_foot();
        runner.enter(Phase::Ready)?;
        Ok(runner)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn workout(&self) -> &Workout {
        &self.workout
    }

    pub fn exercise(&self) -> &Exercise {
        &self.exercises[self.state.exercise_index]
    }

    pub fn is_completed(&self) -> bool {
        self.state.phase == Phase::Completed
    }

    /// True after a capped tracked timer ran out, until the result arrives.
    pub fn cue_fired(&self) -> bool {
        self.cue_fired
    }

    /// The video clip for the current set, honoring foot alternation.
    pub fn video_variant(&self) -> Option<&str> {
        let video = &self.exercise().video;
        match self.state.foot {
            Foot::Left => video.left.as_deref(),
            Foot::Right => video.right.as_deref(),
            Foot::Default => video.default.as_deref(),
        }
    }

    /// Advance the countdown by one second.
    pub fn tick(&mut self) -> Result<TickOutcome, RepsError> {
        if self.state.paused
            || self.state.phase == Phase::Completed
            || !self.has_countdown()
            || self.state.remaining == 0
        {
            return Ok(TickOutcome::Idle);
        }

        self.state.remaining -= 1;
        if self.state.remaining > 0 {
            return Ok(TickOutcome::Counted);
        }
        self.phase_elapsed()
    }

    /// Append a digit to the pending result entry. Only meaningful during a
    /// tracked Active phase; ignored elsewhere.
    pub fn push_digit(&mut self, c: char) {
        if self.state.phase == Phase::Active
            && self.exercise().uses_tracking
            && c.is_ascii_digit()
            && self.state.entry.len() < MAX_ENTRY_DIGITS
        {
            self.state.entry.push(c);
        }
    }

    pub fn backspace(&mut self) {
        self.state.entry.pop();
    }

    /// Commit the pending entry for the current tracked set and move to Rest.
    /// An unparsable entry is reported and otherwise ignored: no state change,
    /// the set keeps waiting.
    pub fn submit_result(&mut self) -> Result<(), RepsError> {
        if self.state.phase != Phase::Active || !self.exercise().uses_tracking {
            return Ok(());
        }
        let value = parse_entry(&self.state.entry)?;
        self.commit_value(value);
        self.state.entry.clear();
        self.enter(Phase::Rest).map(drop)
    }

    /// Manual skip forward: same edge the countdown would take, minus any
    /// result capture.
    pub fn next(&mut self) -> Result<(), RepsError> {
        match self.state.phase {
            Phase::Ready => self.enter(Phase::Active).map(drop),
            Phase::Active => self.enter(Phase::Rest).map(drop),
            Phase::Rest => self.advance_position().map(drop),
            Phase::Completed => Ok(()),
        }
    }

    /// Step back to the prior phase of the same set, or the Rest of the
    /// previous set/exercise. Never crosses below set 0 of exercise 0.
    pub fn previous(&mut self) -> Result<(), RepsError> {
        match self.state.phase {
            Phase::Active => self.enter(Phase::Ready).map(drop),
            Phase::Rest => self.enter(Phase::Active).map(drop),
            Phase::Ready => {
                if self.state.set_index > 0 {
                    self.state.set_index -= 1;
                } else if self.state.exercise_index > 0 {
                    self.state.exercise_index -= 1;
                    self.state.set_index = self.exercise().sets - 1;
                } else {
                    return Ok(());
                }
                self.refresh_foot();
                self.enter(Phase::Rest).map(drop)
            }
            Phase::Completed => Ok(()),
        }
    }

    /// Freeze the countdown in place. The ticker is released; remaining time,
    /// position, and accumulated results are untouched.
    pub fn pause(&mut self) {
        if self.state.paused || self.state.phase == Phase::Completed {
            return;
        }
        self.state.paused = true;
        self.guard = None;
    }

    pub fn resume(&mut self) -> Result<(), RepsError> {
        if !self.state.paused {
            return Ok(());
        }
        self.state.paused = false;
        self.install_ticker()
    }

    /// The host app went to the background: implicit pause, except during the
    /// get-ready countdown.
    pub fn background(&mut self) {
        if self.state.phase != Phase::Ready {
            self.pause();
        }
    }

    /// Early termination: commit a pending valid entry, then complete.
    pub fn finish(&mut self) -> Result<(), RepsError> {
        if self.state.phase == Phase::Completed {
            return Ok(());
        }
        if self.state.phase == Phase::Active && self.exercise().uses_tracking {
            if let Ok(value) = parse_entry(&self.state.entry) {
                self.commit_value(value);
                self.state.entry.clear();
            }
        }
        self.enter(Phase::Completed).map(drop)
    }

    /// Best submitted value per exercise, accumulated across the session.
    pub fn results(&self) -> &HashMap<String, u32> {
        &self.state.best
    }

    /// Completion handoff; `improved` comes from the record reconciler.
    pub fn summary(&self, improved: Vec<String>) -> SessionSummary {
        SessionSummary {
            workout_id: self.workout.id.clone(),
            exercise_count: self.exercises.len(),
            total_sets: self.exercises.iter().map(|e| e.sets).sum(),
            improved,
            results: self.state.best.clone(),
        }
    }

    fn commit_value(&mut self, value: u32) {
        let id = self.exercise().id.clone();
        let best = self.state.best.entry(id).or_insert(0);
        *best = (*best).max(value);
    }

    fn enter(&mut self, phase: Phase) -> Result<TickOutcome, RepsError> {
        self.state.phase = phase;
        self.cue_fired = false;

        if phase == Phase::Completed {
            self.guard = None;
            return Ok(TickOutcome::SessionCompleted);
        }
        if phase == Phase::Active {
            self.state.entry.clear();
        }

        self.state.remaining = match phase {
            Phase::Ready => READY_SECS,
            Phase::Active => self.exercise().set_duration.unwrap_or(0),
            Phase::Rest => self.exercise().rest,
            Phase::Completed => 0,
        };

        // Zero-length timed phases (rest: 0) take their edge immediately
        if self.state.remaining == 0 && self.auto_advances() {
            return self.phase_elapsed();
        }

        self.install_ticker()?;
        Ok(TickOutcome::PhaseAdvanced)
    }

    fn phase_elapsed(&mut self) -> Result<TickOutcome, RepsError> {
        match self.state.phase {
            Phase::Ready => self.enter(Phase::Active),
            Phase::Active => {
                if self.exercise().uses_tracking {
                    // Capped timer: audible cue, no auto-advance. The ticker
                    // has nothing left to count down.
                    self.guard = None;
                    self.cue_fired = true;
                    Ok(TickOutcome::CueFired)
                } else {
                    self.enter(Phase::Rest)
                }
            }
            Phase::Rest => self.advance_position(),
            Phase::Completed => Ok(TickOutcome::Idle),
        }
    }

    fn advance_position(&mut self) -> Result<TickOutcome, RepsError> {
        if self.state.set_index + 1 < self.exercise().sets {
            self.state.set_index += 1;
        } else if self.state.exercise_index + 1 < self.exercises.len() {
            self.state.exercise_index += 1;
            self.state.set_index = 0;
        } else {
            return self.enter(Phase::Completed);
        }
        self.refresh_foot();
        self.enter(Phase::Ready)
    }

    fn refresh_foot(&mut self) {
        let ex = self.exercise();
        self.state.foot = if ex.per_foot && ex.video.has_sides() {
            if self.state.set_index % 2 == 0 {
                Foot::Left
            } else {
                Foot::Right
            }
        } else {
            Foot::Default
        };
    }

    fn auto_advances(&self) -> bool {
        match self.state.phase {
            Phase::Ready | Phase::Rest => true,
            Phase::Active => !self.exercise().uses_tracking,
            Phase::Completed => false,
        }
    }

    fn has_countdown(&self) -> bool {
        match self.state.phase {
            Phase::Ready | Phase::Rest => true,
            Phase::Active => self.exercise().set_duration.is_some(),
            Phase::Completed => false,
        }
    }

    fn install_ticker(&mut self) -> Result<(), RepsError> {
        // Release before installing: only one tick source may be live
        self.guard = None;
        if self.state.paused || !self.has_countdown() || self.state.remaining == 0 {
            return Ok(());
        }
        self.guard = Some(self.ticker.start());
        if self.ticker.live() > 1 {
            self.guard = None;
            return Err(RepsError::TimerDesync);
        }
        Ok(())
    }
}
