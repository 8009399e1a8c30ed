use crate::config::SchedulerConfig;
use crate::context::JobRunner;
use crate::error::{Result, SchedulerError};
use crate::job::{JobKind, TriggerOutcome};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Clears a job's running flag when the run ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the recurring jobs.
///
/// Each job kind is `Idle` or `Running`; a tick that finds its job running is
/// skipped. Different kinds run independently.
pub struct Scheduler {
    config: SchedulerConfig,
    refresh_time: NaiveTime,
    timezone: Tz,
    runner: Arc<dyn JobRunner>,
    running: [AtomicBool; 4],
    /// Stops the tick loops
    shutdown: CancellationToken,
    /// Aborts job runs still going after the shutdown timeout
    abort: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, timezone: Tz, runner: Arc<dyn JobRunner>) -> Result<Self> {
        config.validate()?;
        let refresh_time = config.refresh_time()?;

        Ok(Self {
            config,
            refresh_time,
            timezone,
            runner,
            running: Default::default(),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether a run of `job` is in flight
    pub fn is_running(&self, job: JobKind) -> bool {
        self.running[job.index()].load(Ordering::Acquire)
    }

    /// Run `job` now unless a previous run of it is still in flight
    pub async fn trigger(&self, job: JobKind) -> Result<TriggerOutcome> {
        if self.abort.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }

        let slot = &self.running[job.index()];
        if slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!(job = %job, "Previous run still in flight, skipping");
            return Ok(TriggerOutcome::Skipped);
        }
        let _running = RunningGuard(slot);

        let now = Utc::now();
        debug!(job = %job, "Job started");

        let report = tokio::select! {
            result = self.runner.run(job, now) => result?,
            _ = self.abort.cancelled() => {
                warn!(job = %job, "Job cancelled during shutdown");
                return Err(SchedulerError::Cancelled { job });
            }
        };

        let elapsed = Utc::now() - now;
        if report.sent > 0 || report.failed > 0 || report.errors > 0 {
            info!(job = %job, elapsed_ms = elapsed.num_milliseconds(), "{}", report);
        } else {
            debug!(job = %job, elapsed_ms = elapsed.num_milliseconds(), "{}", report);
        }
        Ok(TriggerOutcome::Completed(report))
    }

    /// Spawn the tick loops
    pub fn start(self: &Arc<Self>) {
        info!("Starting scheduler");

        for job in JobKind::ALL {
            let scheduler = Arc::clone(self);
            match self.config.interval_for(job) {
                Some(period) => {
                    info!("{} every {:?}", job, period);
                    self.tracker.spawn(scheduler.run_interval_loop(job, period));
                }
                None => {
                    info!("{} daily at {} {}", job, self.refresh_time, self.timezone);
                    self.tracker.spawn(scheduler.run_daily_loop(job));
                }
            }
        }
    }

    /// Stop ticking and wait for running jobs, cancelling them after the timeout
    pub async fn stop(&self) {
        info!("Stopping scheduler");
        self.shutdown.cancel();
        self.tracker.close();

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!("Jobs still running after {:?}, cancelling them", timeout);
            self.abort.cancel();
            self.tracker.wait().await;
        }
        info!("Scheduler stopped");
    }

    fn spawn_run(self: &Arc<Self>, job: JobKind) {
        let scheduler = Arc::clone(self);
        self.tracker.spawn(async move {
            match scheduler.trigger(job).await {
                Ok(_) => {}
                Err(SchedulerError::Cancelled { .. }) | Err(SchedulerError::ShuttingDown) => {}
                Err(e) => error!(job = %job, "Job failed: {}", e),
            }
        });
    }

    async fn run_interval_loop(self: Arc<Self>, job: JobKind, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.spawn_run(job),
            }
        }
        debug!(job = %job, "Tick loop stopped");
    }

    async fn run_daily_loop(self: Arc<Self>, job: JobKind) {
        if self.config.refresh_on_start {
            self.spawn_run(job);
        }

        loop {
            let now = Utc::now();
            let next = next_daily_run(now, self.refresh_time, self.timezone);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(job = %job, "Next run at {}", next);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(wait) => self.spawn_run(job),
            }
        }
        debug!(job = %job, "Daily loop stopped");
    }
}

/// Next instant after `now` whose local time in `tz` is `at`.
///
/// Nonexistent local times (spring forward) move to the following day.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();

    for offset in 0..=2 {
        let date = today + ChronoDuration::days(offset);
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
    }

    now + ChronoDuration::days(1)
}
