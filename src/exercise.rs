use serde::Deserialize;

/// Named video clips for an exercise. Bilateral exercises carry a left/right
/// pair; everything else just has the default clip.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VideoVariants {
    pub default: Option<String>,
    pub left: Option<String>,
    pub right: Option<String>,
}

impl VideoVariants {
    pub fn has_sides(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }
}

/// One entry of the exercise catalog. Read-only to the session core.
#[derive(Deserialize, Clone, Debug)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub sets: u32,
    /// Seconds of work per set. Absent means the set is tracked with no timer.
    #[serde(default)]
    pub set_duration: Option<u32>,
    pub rest: u32,
    /// The set requires a user-entered numeric result instead of a pure timer.
    #[serde(default)]
    pub uses_tracking: bool,
    /// Comparison policy: true = higher is better, false = lower is better
    /// (e.g. "attempts needed to reach N successes").
    #[serde(default)]
    pub max_is_good: bool,
    /// Alternate video/context by set parity.
    #[serde(default)]
    pub per_foot: bool,
    #[serde(default)]
    pub video: VideoVariants,
}
