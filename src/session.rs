use std::collections::HashMap;

/// Seconds of get-ready countdown before every set.
pub const READY_SECS: u32 = 10;

/// Where a set is within its Ready -> Active -> Rest cycle. `Completed` is the
/// terminal state of the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Phase {
    Ready,
    Active,
    Rest,
    Completed,
}

/// Which side a bilateral exercise is on for the current set. Derived from set
/// parity, never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Foot {
    Default,
    Left,
    Right,
}

/// Ephemeral state of one workout attempt. Owned exclusively by the runner,
/// discarded on completion or abandon, never persisted.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub exercise_index: usize,
    pub set_index: u32,
    pub phase: Phase,
    pub remaining: u32,
    pub paused: bool,
    pub foot: Foot,
    /// Pending numeric entry for a tracked set.
    pub entry: String,
    /// Running maximum of submitted values per exercise, across all sets.
    pub best: HashMap<String, u32>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            exercise_index: 0,
            set_index: 0,
            phase: Phase::Ready,
            remaining: READY_SECS,
            paused: false,
            foot: Foot::Default,
            entry: String::new(),
            best: HashMap::new(),
        }
    }
}

/// Read-only completion handoff for the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub workout_id: String,
    pub exercise_count: usize,
    pub total_sets: u32,
    pub improved: Vec<String>,
    pub results: HashMap<String, u32>,
}
