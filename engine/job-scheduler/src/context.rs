use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::job::{JobKind, JobReport};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use game_notifier::{Dispatcher, EventDetector};
use persistence::{PersistenceBackend, Recipient};
use siahl_fetcher::{FetcherConfig, ResourceDescriptor};
use stats_cache::CacheStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// League coordinates every job fetches against
#[derive(Debug, Clone, PartialEq)]
pub struct League {
    pub league_id: u32,
    pub season: u32,
    pub stat_class: u32,
    pub timezone: Tz,
}

impl League {
    pub fn from_fetcher_config(config: &FetcherConfig) -> Result<Self> {
        let timezone = config.timezone().map_err(|e| SchedulerError::config(e.to_string()))?;
        Ok(Self {
            league_id: config.league_id,
            season: config.season,
            stat_class: config.stat_class,
            timezone,
        })
    }

    pub fn team_list(&self) -> ResourceDescriptor {
        ResourceDescriptor::TeamList { league_id: self.league_id, season: self.season }
    }

    pub fn schedule(&self, team_id: i64) -> ResourceDescriptor {
        ResourceDescriptor::Schedule {
            team_id,
            season: self.season,
            league_id: self.league_id,
            stat_class: self.stat_class,
        }
    }

    pub fn player_stats(&self, team_id: i64) -> ResourceDescriptor {
        ResourceDescriptor::PlayerStats {
            team_id,
            season: self.season,
            league_id: self.league_id,
            stat_class: self.stat_class,
        }
    }

    /// Calendar date of `at` in league time
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }
}

/// Runs one job to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: JobKind, now: DateTime<Utc>) -> Result<JobReport>;
}

/// Shared collaborators handed to every job run
pub struct JobContext {
    pub config: SchedulerConfig,
    pub league: League,
    pub backend: Arc<dyn PersistenceBackend>,
    pub cache: Arc<CacheStore>,
    pub detector: Arc<EventDetector>,
    pub dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl JobRunner for JobContext {
    async fn run(&self, job: JobKind, now: DateTime<Utc>) -> Result<JobReport> {
        match job {
            JobKind::CacheRefresh => self.cache_refresh(now).await,
            JobKind::GameDayCheck => self.game_day_check(now).await,
            JobKind::PreGameCheck => self.pre_game_check(now).await,
            JobKind::PostGameMonitor => self.post_game_monitor(now).await,
        }
    }
}

impl JobContext {
    /// Active recipients grouped by the team they follow
    pub(crate) async fn recipients_by_team(&self) -> Result<BTreeMap<i64, Vec<Recipient>>> {
        let mut teams: BTreeMap<i64, Vec<Recipient>> = BTreeMap::new();
        for recipient in self.backend.list_recipients().await? {
            teams.entry(recipient.team_id).or_default().push(recipient);
        }
        Ok(teams)
    }

    /// Team id to name, from the league team list
    pub(crate) async fn team_names(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<HashMap<i64, String>> {
        let descriptor = self.league.team_list();
        let payload = if force {
            self.cache.force_refresh(&descriptor).await?
        } else {
            self.cache.get_or_refresh_at(&descriptor, now).await?
        };

        Ok(payload
            .teams()
            .unwrap_or_default()
            .iter()
            .map(|team| (team.id, team.name.clone()))
            .collect())
    }

    /// Refresh one team's schedule and track its recent and upcoming games
    pub(crate) async fn refresh_team(
        &self,
        team_id: i64,
        team_name: &str,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<usize> {
        let descriptor = self.league.schedule(team_id);
        let schedule = if force {
            self.cache.force_refresh(&descriptor).await?
        } else {
            self.cache.get_or_refresh_at(&descriptor, now).await?
        };

        // Games past the archive grace would only be archived again
        let cutoff = now - self.config.archive_grace();
        let games: Vec<_> = schedule
            .games()
            .unwrap_or_default()
            .iter()
            .filter(|game| game.scheduled_time >= cutoff)
            .cloned()
            .collect();

        let tracked = self.detector.track_schedule(team_id, team_name, &games, now).await?;
        Ok(tracked.len())
    }

    /// Refresh several teams concurrently, logging and counting failures
    pub(crate) async fn refresh_teams(
        &self,
        team_ids: Vec<i64>,
        names: &HashMap<i64, String>,
        now: DateTime<Utc>,
        force: bool,
        report: &mut JobReport,
    ) {
        let results: Vec<(i64, Result<usize>)> = stream::iter(team_ids)
            .map(|team_id| {
                let name = names.get(&team_id).cloned();
                async move {
                    let result = match name {
                        Some(name) => self.refresh_team(team_id, &name, now, force).await,
                        None => Err(SchedulerError::UnknownTeam { team_id }),
                    };
                    (team_id, result)
                }
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for (team_id, result) in results {
            match result {
                Ok(games) => debug!(team_id, "Tracking {} games", games),
                Err(e) => {
                    report.errors += 1;
                    warn!(team_id, "Failed to refresh team schedule: {}", e);
                }
            }
        }
    }

    /// The recipient's timezone, falling back to league time
    pub(crate) fn recipient_timezone(&self, recipient: &Recipient) -> Tz {
        recipient.timezone.parse().unwrap_or_else(|_| {
            warn!(recipient = %recipient.id, "Unknown timezone {}, using league time", recipient.timezone);
            self.league.timezone
        })
    }
}
