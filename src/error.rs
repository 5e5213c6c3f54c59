use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepsError {
    #[error("workout not found: {0}")]
    WorkoutNotFound(String),
    #[error("invalid result entry: {0:?}")]
    InvalidInput(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("record store error: {0}")]
    Persistence(String),
    #[error("record snapshot changed underneath the update")]
    Conflict,
    #[error("more than one live session ticker")]
    TimerDesync,
}

impl From<rusqlite::Error> for RepsError {
    fn from(e: rusqlite::Error) -> Self {
        RepsError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for RepsError {
    fn from(e: std::io::Error) -> Self {
        RepsError::Persistence(e.to_string())
    }
}
