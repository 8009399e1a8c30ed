//! Job Scheduler
//!
//! Runs the notifier's recurring work:
//!
//! - `cache-refresh`: daily forced refresh of every followed team's pages
//! - `game-day-check`: game-day messages at each recipient's notify time
//! - `pre-game-check`: locker-room changes and pre-game reminders
//! - `post-game-monitor`: final scores and archiving of finished games
//!
//! At most one run of each job is in flight at a time; overlapping ticks are
//! skipped.

pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod jobs;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use context::{JobContext, JobRunner, League};
pub use error::{Result, SchedulerError};
pub use job::{JobKind, JobReport, TriggerOutcome};
pub use jobs::reminder_event_type;
pub use scheduler::{next_daily_run, Scheduler};
