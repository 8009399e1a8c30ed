use crate::config::FetcherConfig;
use crate::error::{FetchError, Result, TransportError};
use crate::metrics::FetcherMetrics;
use crate::models::{ResourceDescriptor, StructuredData};
use crate::parser::{parse_document, ParseContext};
use crate::rate_limiter::RateLimiter;
use crate::transport::{HttpTransport, Transport};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use reqwest::Url;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Retrieves and parses one resource from the stats site
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<StructuredData>;
}

/// Rate-limited, retrying fetcher for the SIAHL stats site
pub struct StatsFetcher {
    config: FetcherConfig,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    origin: String,
    timezone: Tz,
    parse_date: Option<NaiveDate>,
    metrics: Arc<FetcherMetrics>,
}

impl StatsFetcher {
    /// Create a new fetcher using a reqwest transport
    pub fn new(config: FetcherConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let transport = HttpTransport::new(&config.user_agent, config.request_timeout())?;
        Self::with_transport(config, limiter, Arc::new(transport))
    }

    /// Create a fetcher over an arbitrary transport
    pub fn with_transport(
        config: FetcherConfig,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| FetchError::config(format!("Invalid base URL {}: {e}", config.base_url)))?;
        let origin = base
            .host_str()
            .ok_or_else(|| FetchError::config(format!("Base URL {} has no host", config.base_url)))?
            .to_string();
        let timezone = config.timezone()?;

        Ok(Self {
            config,
            transport,
            limiter,
            origin,
            timezone,
            parse_date: None,
            metrics: Arc::new(FetcherMetrics::new()),
        })
    }

    /// Pin the local date used for year inference when parsing schedules
    pub fn with_parse_date(mut self, date: NaiveDate) -> Self {
        self.parse_date = Some(date);
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn metrics(&self) -> Arc<FetcherMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Absolute URL of a resource
    pub fn url_for(&self, descriptor: &ResourceDescriptor) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), descriptor.path_and_query())
    }

    fn parse_context(&self) -> ParseContext {
        match self.parse_date {
            Some(today) => ParseContext { timezone: self.timezone, today },
            None => ParseContext::now_in(self.timezone),
        }
    }

    /// GET `url` with rate limiting and bounded retries on transient failures
    async fn fetch_body(&self, url: &str) -> Result<String> {
        let max_attempts = self.config.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Err(e) = self.limiter.acquire(&self.origin).await {
                if e.is_overloaded() {
                    self.metrics.overloaded_total.inc();
                }
                return Err(e);
            }

            self.metrics.requests_total.inc();
            debug!("GET {} (attempt {}/{})", url, attempt, max_attempts);

            let outcome = match timeout(self.config.request_timeout(), self.transport.get(url)).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    self.metrics.retries_total.inc();
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, url, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    self.metrics.network_failures_total.inc();
                    error!("Giving up on {} after {} attempt(s): {}", url, attempt, e);
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        message: e.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ResourceFetcher for StatsFetcher {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<StructuredData> {
        let url = self.url_for(descriptor);
        let body = self.fetch_body(&url).await?;

        match parse_document(descriptor, &body, &self.parse_context()) {
            Ok(data) => {
                self.metrics.fetches_succeeded_total.inc();
                info!("Fetched {} ({} records)", descriptor, data.len());
                Ok(data)
            }
            Err(e) => {
                self.metrics.parse_failures_total.inc();
                error!("Unexpected page structure for {}: {}", descriptor, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RetryConfig};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const LOCKER_ROOMS: &str = r#"
        <table>
          <tr><td>541086</td><td>San Jose Black (E)</td><td>Camels</td><td>S2</td></tr>
        </table>
    "#;

    /// Plays back a fixed sequence of responses
    struct ScriptedTransport {
        responses: Mutex<VecDeque<std::result::Result<String, TransportError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<std::result::Result<String, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> std::result::Result<String, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.responses.lock().unwrap().pop_front().unwrap_or(Err(TransportError::Status(500)))
        }
    }

    fn fetcher(transport: Arc<ScriptedTransport>) -> StatsFetcher {
        let config = FetcherConfig {
            base_url: "https://stats.example.com/".to_string(),
            retry: RetryConfig { jitter_ms: 0, ..Default::default() },
            ..Default::default()
        };
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            tokens_per_second: 100.0,
            burst: 100,
            max_waiters: 64,
        }));
        StatsFetcher::with_transport(config, limiter, transport)
            .unwrap()
            .with_parse_date(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap())
    }

    fn locker_rooms() -> ResourceDescriptor {
        ResourceDescriptor::LockerRoom { date: NaiveDate::from_ymd_opt(2024, 9, 10).unwrap() }
    }

    #[test]
    fn test_url_and_origin() {
        let fetcher = fetcher(ScriptedTransport::new(vec![]));
        assert_eq!(fetcher.origin(), "stats.example.com");
        assert_eq!(
            fetcher.url_for(&locker_rooms()),
            "https://stats.example.com/display-locker-rooms?date=2024-09-10"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Connection("reset".to_string())),
            Err(TransportError::Status(503)),
            Ok(LOCKER_ROOMS.to_string()),
        ]);
        let fetcher = fetcher(Arc::clone(&transport));

        let data = fetcher.fetch(&locker_rooms()).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(transport.call_count(), 4);

        let metrics = fetcher.metrics().snapshot();
        assert_eq!(metrics.retries_total, 3);
        assert_eq!(metrics.requests_total, 4);
        assert_eq!(metrics.fetches_succeeded_total, 1);
        assert_eq!(metrics.network_failures_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Ok(LOCKER_ROOMS.to_string()),
        ]);
        let fetcher = fetcher(Arc::clone(&transport));

        let err = fetcher.fetch(&locker_rooms()).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { attempts: 4, .. }));
        assert_eq!(transport.call_count(), 4);
        assert_eq!(fetcher.metrics().snapshot().network_failures_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Status(404))]);
        let fetcher = fetcher(Arc::clone(&transport));

        let err = fetcher.fetch(&locker_rooms()).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { attempts: 1, .. }));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(fetcher.metrics().snapshot().retries_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_errors_are_not_retried() {
        let transport =
            ScriptedTransport::new(vec![Ok("<html><body>Down for maintenance</body></html>".into())]);
        let fetcher = fetcher(Arc::clone(&transport));

        let err = fetcher.fetch(&locker_rooms()).await.unwrap_err();
        assert!(err.is_parse());
        assert_eq!(transport.call_count(), 1);

        let metrics = fetcher.metrics().snapshot();
        assert_eq!(metrics.parse_failures_total, 1);
        assert_eq!(metrics.retries_total, 0);
    }

    #[tokio::test]
    async fn test_overloaded_limiter_is_surfaced() {
        let transport = ScriptedTransport::new(vec![Ok(LOCKER_ROOMS.to_string())]);
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            tokens_per_second: 2.0,
            burst: 4,
            max_waiters: 0,
        }));
        let config = FetcherConfig {
            base_url: "https://stats.example.com/".to_string(),
            ..Default::default()
        };
        let fetcher = StatsFetcher::with_transport(config, limiter, transport.clone()).unwrap();

        let err = fetcher.fetch(&locker_rooms()).await.unwrap_err();
        assert!(err.is_overloaded());
        assert!(matches!(err, FetchError::Overloaded { ref origin, .. } if origin == "stats.example.com"));
        assert_eq!(transport.call_count(), 0);

        let metrics = fetcher.metrics().snapshot();
        assert_eq!(metrics.overloaded_total, 1);
        assert_eq!(metrics.requests_total, 0);
        assert_eq!(metrics.retries_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Status(502)),
            Err(TransportError::Status(502)),
            Ok(LOCKER_ROOMS.to_string()),
        ]);
        let fetcher = fetcher(Arc::clone(&transport));

        let start = tokio::time::Instant::now();
        fetcher.fetch(&locker_rooms()).await.unwrap();
        // 1s then 2s of backoff
        assert!(start.elapsed() >= std::time::Duration::from_secs(3));
    }
}
