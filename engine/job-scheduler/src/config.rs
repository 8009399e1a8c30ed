use crate::error::{Result, SchedulerError};
use crate::job::JobKind;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadences and windows of the recurring jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Local time of the daily cache refresh (HH:MM, league timezone)
    pub daily_refresh_time: String,

    /// Run a cache refresh as soon as the scheduler starts
    pub refresh_on_start: bool,

    pub game_day_interval_secs: u64,
    pub pre_game_interval_secs: u64,
    pub post_game_interval_secs: u64,

    /// How long after a recipient's notify time the game-day message may still go out
    pub game_day_window_minutes: u32,

    /// Pre-game reminder lead windows in hours
    pub pre_game_lead_hours: Vec<u32>,

    /// Scheduled end is start plus this
    pub game_duration_minutes: u32,

    /// Games older than start plus this are archived
    pub archive_grace_hours: u32,

    /// Concurrent games/recipients handled per tick
    pub max_concurrency: usize,

    /// How long stop() waits for running jobs before cancelling them
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_refresh_time: "06:00".to_string(),
            refresh_on_start: true,
            game_day_interval_secs: 60,
            pre_game_interval_secs: 15 * 60,
            post_game_interval_secs: 30 * 60,
            game_day_window_minutes: 60,
            pre_game_lead_hours: vec![3, 1],
            game_duration_minutes: 90,
            archive_grace_hours: 24,
            max_concurrency: 8,
            shutdown_timeout_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_refresh_time, "%H:%M").map_err(|e| {
            SchedulerError::config(format!(
                "Invalid daily_refresh_time '{}': {}",
                self.daily_refresh_time, e
            ))
        })
    }

    /// Tick period of an interval job; `None` for the daily refresh
    pub fn interval_for(&self, job: JobKind) -> Option<Duration> {
        let secs = match job {
            JobKind::CacheRefresh => return None,
            JobKind::GameDayCheck => self.game_day_interval_secs,
            JobKind::PreGameCheck => self.pre_game_interval_secs,
            JobKind::PostGameMonitor => self.post_game_interval_secs,
        };
        Some(Duration::from_secs(secs))
    }

    pub fn game_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.game_duration_minutes))
    }

    pub fn archive_grace(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.archive_grace_hours))
    }

    pub fn game_day_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.game_day_window_minutes))
    }

    /// Widest pre-game lead window
    pub fn max_lead(&self) -> chrono::Duration {
        let hours = self.pre_game_lead_hours.iter().copied().max().unwrap_or(0);
        chrono::Duration::hours(i64::from(hours))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        self.refresh_time()?;

        if self.pre_game_lead_hours.is_empty() {
            return Err(SchedulerError::config("pre_game_lead_hours must not be empty"));
        }
        if self.pre_game_lead_hours.iter().any(|&h| h == 0) {
            return Err(SchedulerError::config("pre_game_lead_hours must be positive"));
        }
        if self.max_concurrency == 0 {
            return Err(SchedulerError::config("max_concurrency must be at least 1"));
        }
        for job in JobKind::ALL {
            if self.interval_for(job).is_some_and(|period| period.is_zero()) {
                return Err(SchedulerError::config(format!("{job} interval must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_time().unwrap(), NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(config.interval_for(JobKind::PreGameCheck), Some(Duration::from_secs(900)));
        assert_eq!(config.interval_for(JobKind::CacheRefresh), None);
        assert_eq!(config.max_lead(), chrono::Duration::hours(3));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SchedulerConfig { daily_refresh_time: "6am".to_string(), ..Default::default() };
        assert!(config.validate().is_err());

        let config = SchedulerConfig { pre_game_lead_hours: vec![], ..Default::default() };
        assert!(config.validate().is_err());

        let config = SchedulerConfig { post_game_interval_secs: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
