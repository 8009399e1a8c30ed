use chrono::{DateTime, Utc};
use game_notifier::DispatchOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The recurring jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    CacheRefresh,
    GameDayCheck,
    PreGameCheck,
    PostGameMonitor,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::CacheRefresh,
        JobKind::GameDayCheck,
        JobKind::PreGameCheck,
        JobKind::PostGameMonitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CacheRefresh => "cache-refresh",
            JobKind::GameDayCheck => "game-day-check",
            JobKind::PreGameCheck => "pre-game-check",
            JobKind::PostGameMonitor => "post-game-monitor",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            JobKind::CacheRefresh => 0,
            JobKind::GameDayCheck => 1,
            JobKind::PreGameCheck => 2,
            JobKind::PostGameMonitor => 3,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .iter()
            .find(|job| job.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let known: Vec<_> = JobKind::ALL.iter().map(|j| j.as_str()).collect();
                format!("unknown job '{}', expected one of: {}", s, known.join(", "))
            })
    }
}

/// What one job run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    /// Teams or games the run looked at
    pub items: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Per-item errors that were logged and skipped
    pub errors: usize,
}

impl JobReport {
    pub fn new(job: JobKind, started_at: DateTime<Utc>) -> Self {
        Self { job, started_at, items: 0, sent: 0, suppressed: 0, failed: 0, errors: 0 }
    }

    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Suppressed => self.suppressed += 1,
            DispatchOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &JobReport) {
        self.items += other.items;
        self.sent += other.sent;
        self.suppressed += other.suppressed;
        self.failed += other.failed;
        self.errors += other.errors;
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} items, {} sent, {} suppressed, {} failed, {} errors",
            self.job, self.items, self.sent, self.suppressed, self.failed, self.errors
        )
    }
}

/// Result of asking the scheduler to run a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed(JobReport),
    /// The previous run of this job was still in flight
    Skipped,
}
