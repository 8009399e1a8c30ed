use crate::job::JobKind;
use persistence::PersistenceError;
use stats_cache::CacheError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Team {team_id} is not in the league team list")]
    UnknownTeam { team_id: i64 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{job} was cancelled before completing")]
    Cancelled { job: JobKind },

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}
