//! Service state management and component initialization

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use game_notifier::{create_channel, Dispatcher, EventDetector};
use job_scheduler::{JobContext, JobKind, JobReport, League, Scheduler, TriggerOutcome};
use persistence::PersistenceBackend;
use siahl_fetcher::{RateLimiter, StatsFetcher};
use stats_cache::CacheStore;

/// Every component of the running notifier, built once at startup
pub struct ServiceState {
    pub config: ServiceConfig,

    pub persistence: Arc<dyn PersistenceBackend>,

    pub fetcher: Arc<StatsFetcher>,

    pub cache: Arc<CacheStore>,

    pub dispatcher: Arc<Dispatcher>,

    pub scheduler: Arc<Scheduler>,

    is_running: RwLock<bool>,
}

impl ServiceState {
    /// Create a new service state with all components initialized
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        info!("Initializing service components...");

        info!("Initializing {:?} persistence backend...", config.persistence.backend);
        let persistence = persistence::create_persistence(config.persistence.clone())
            .await
            .context("Failed to create persistence backend")?;
        persistence.initialize().await.context("Failed to initialize persistence backend")?;

        for recipient in &config.recipients {
            persistence
                .upsert_recipient(recipient)
                .await
                .with_context(|| format!("Failed to store recipient {}", recipient.id))?;
        }
        if !config.recipients.is_empty() {
            info!("Loaded {} configured recipients", config.recipients.len());
        }

        info!("Initializing fetcher for {}...", config.fetcher.base_url);
        let limiter = Arc::new(RateLimiter::new(config.fetcher.rate_limit.clone()));
        let fetcher = Arc::new(
            StatsFetcher::new(config.fetcher.clone(), limiter).context("Failed to create fetcher")?,
        );

        let cache =
            Arc::new(CacheStore::new(config.cache.clone(), persistence.clone(), fetcher.clone()));

        let channel = create_channel(&config.channel).context("Failed to create notification channel")?;
        info!("Delivering notifications through the {} channel", channel.name());
        let dispatcher =
            Arc::new(Dispatcher::new(config.dispatch.clone(), persistence.clone(), channel));

        let league = League::from_fetcher_config(&config.fetcher)?;
        let timezone = league.timezone;
        let context = Arc::new(JobContext {
            config: config.scheduler.clone(),
            league,
            backend: persistence.clone(),
            cache: cache.clone(),
            detector: Arc::new(EventDetector::new(persistence.clone())),
            dispatcher: dispatcher.clone(),
        });
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), timezone, context)?);

        info!("All components initialized");
        Ok(Self {
            config,
            persistence,
            fetcher,
            cache,
            dispatcher,
            scheduler,
            is_running: RwLock::new(false),
        })
    }

    /// Start the recurring jobs
    pub async fn start(&self) -> Result<()> {
        let mut running = self.is_running.write().await;
        if *running {
            return Err(anyhow!("Service is already running"));
        }

        self.scheduler.start();
        *running = true;
        info!("Service started");
        Ok(())
    }

    /// Stop the jobs, waiting for in-flight runs, then close storage
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.is_running.write().await;
        if *running {
            self.scheduler.stop().await;
            *running = false;
        }

        self.persistence.shutdown().await.context("Failed to shut down persistence backend")?;
        info!("Service stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Run one job to completion outside the schedule
    pub async fn run_once(&self, job: JobKind) -> Result<JobReport> {
        info!("Running {} once", job);
        match self.scheduler.trigger(job).await? {
            TriggerOutcome::Completed(report) => Ok(report),
            TriggerOutcome::Skipped => Err(anyhow!("{} is already running", job)),
        }
    }

    /// Log the fetch, cache and dispatch counters
    pub fn log_metrics(&self) {
        let fetch = self.fetcher.metrics().snapshot();
        let cache = self.cache.metrics().snapshot();
        let dispatch = self.dispatcher.metrics().snapshot();

        info!(?fetch, "Fetch metrics");
        info!(?cache, "Cache metrics");
        if dispatch.failed_total > 0 {
            warn!(?dispatch, "Dispatch metrics");
        } else {
            info!(?dispatch, "Dispatch metrics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use persistence::{Recipient, RecipientKind};

    fn recipient() -> Recipient {
        Recipient {
            id: "user:42:4784".to_string(),
            destination: "42".to_string(),
            kind: RecipientKind::User,
            team_id: 4784,
            notify_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: Recipient::DEFAULT_TIMEZONE.to_string(),
            game_day_enabled: true,
            pre_game_enabled: true,
            post_game_enabled: true,
            active: true,
        }
    }

    #[tokio::test]
    async fn test_new_loads_configured_recipients() {
        let config = ServiceConfig { recipients: vec![recipient()], ..Default::default() };
        let state = ServiceState::new(config).await.unwrap();

        let stored = state.persistence.list_recipients().await.unwrap();
        assert_eq!(stored, vec![recipient()]);
        assert!(!state.is_running().await);
    }

    #[tokio::test]
    async fn test_run_once_without_recipients_does_nothing() {
        let state = ServiceState::new(ServiceConfig::default()).await.unwrap();

        for job in JobKind::ALL {
            let report = state.run_once(job).await.unwrap();
            assert_eq!(report.job, job);
            assert_eq!(report.sent, 0);
        }
        assert_eq!(state.fetcher.metrics().snapshot().requests_total, 0);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let mut config = ServiceConfig::default();
        config.scheduler.shutdown_timeout_secs = 1;
        let state = ServiceState::new(config).await.unwrap();

        state.start().await.unwrap();
        assert!(state.is_running().await);
        assert!(state.start().await.is_err());

        state.stop().await.unwrap();
        assert!(!state.is_running().await);
    }
}
