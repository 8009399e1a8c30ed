//! Service configuration management

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use game_notifier::{ChannelConfig, ChannelKind, DispatchConfig};
use job_scheduler::SchedulerConfig;
use persistence::{PersistenceConfig, Recipient};
use serde::{Deserialize, Serialize};
use siahl_fetcher::FetcherConfig;
use stats_cache::CacheConfig;
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `SIAHL__FETCHER__SEASON=73`
pub const ENV_PREFIX: &str = "SIAHL";

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub fetcher: FetcherConfig,
    pub persistence: PersistenceConfig,
    pub cache: CacheConfig,
    pub dispatch: DispatchConfig,
    pub channel: ChannelConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,

    /// Recipients upserted on startup
    pub recipients: Vec<Recipient>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,

    /// Directory for daily-rotated log files (if None, logs to stdout)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), file: None }
    }
}

/// Layer defaults, an optional TOML file and `SIAHL__*` environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let defaults = Config::try_from(&ServiceConfig::default())
        .context("Failed to build default configuration")?;

    let mut builder = Config::builder().add_source(defaults);
    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let mut config: ServiceConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    // Seasons before the configured one are cached as historical
    if config.cache.current_season.is_none() {
        config.cache.current_season = Some(config.fetcher.season);
    }

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.logging.level)),
    }

    match config.logging.format.as_str() {
        "json" | "pretty" => {}
        _ => return Err(anyhow!("Invalid log format: {}", config.logging.format)),
    }

    let rate = &config.fetcher.rate_limit;
    if rate.tokens_per_second <= 0.0 || rate.burst == 0 {
        return Err(anyhow!(
            "Invalid rate limit: {} tokens/s with burst {}",
            rate.tokens_per_second,
            rate.burst
        ));
    }
    config.fetcher.timezone().map_err(|e| anyhow!("{}", e))?;

    config.persistence.validate().map_err(|e| anyhow!("Invalid persistence configuration: {}", e))?;
    config.scheduler.validate().context("Invalid scheduler configuration")?;

    if config.dispatch.max_attempts == 0 {
        return Err(anyhow!("dispatch.max_attempts must be at least 1"));
    }
    if config.channel.kind == ChannelKind::Webhook && config.channel.webhook.url.is_empty() {
        return Err(anyhow!("channel.webhook.url is required for the webhook channel"));
    }

    for recipient in &config.recipients {
        if recipient.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(anyhow!(
                "Recipient {} has unknown timezone {}",
                recipient.id,
                recipient.timezone
            ));
        }
    }

    Ok(())
}

/// Render the effective configuration as TOML
pub fn render_config(config: &ServiceConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render configuration")
}
