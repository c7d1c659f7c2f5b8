use crate::config::{HttpConfig, RetryConfig};
use super::{redact, FetchError};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff, FixedInterval};
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

/// Delays between attempts, derived from `RetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay_ms: u64,
    exponential: bool,
    jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay_ms: cfg.delay_ms,
            exponential: cfg.exponential,
            jitter: cfg.jitter,
        }
    }

    /// One delay per retry; `max_attempts - 1` entries.
    pub fn delays(&self) -> Vec<Duration> {
        let retries = (self.max_attempts - 1) as usize;
        let base: Vec<Duration> = if self.exponential {
            // 2^n * factor: delay, 2*delay, 4*delay, …
            ExponentialBackoff::from_millis(2)
                .factor((self.delay_ms / 2).max(1))
                .take(retries)
                .collect()
        } else {
            FixedInterval::from_millis(self.delay_ms).take(retries).collect()
        };
        if self.jitter {
            base.into_iter().map(jitter).collect()
        } else {
            base
        }
    }
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: HttpConfig,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &HttpConfig, retry: &RetryConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            inner,
            config: config.clone(),
            retry: RetryPolicy::from_config(retry),
        })
    }

    /// GET a JSON document with the polite delay and bounded retry.
    /// Only transient failures are retried.
    pub async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        self.get_json_checked(url, |_| Ok(())).await
    }

    /// Like `get_json`, with `check` run on every successful body inside the
    /// retry loop. Providers that report throttling with HTTP 200 use it so a
    /// transient error from `check` is retried like a 429.
    pub async fn get_json_checked<F>(&self, url: &Url, check: F) -> Result<Value, FetchError>
    where
        F: Fn(&Value) -> Result<(), FetchError> + Send + Sync,
    {
        self.polite_delay().await;

        let shown = redact(url);
        let mut attempt = 0u32;
        let action = || {
            attempt += 1;
            let n = attempt;
            let shown = &shown;
            let check = &check;
            async move {
                debug!("GET {} (attempt {})", shown, n);
                let json = self.get_json_once(url).await?;
                check(&json)?;
                Ok(json)
            }
        };
        let should_retry = |e: &FetchError| {
            let transient = e.is_transient();
            if transient {
                warn!("Transient failure on {}: {}", shown, e);
            }
            transient
        };

        RetryIf::start(self.retry.delays(), action, should_retry).await
    }

    async fn get_json_once(&self, url: &Url) -> Result<Value, FetchError> {
        let resp = self.inner.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}
