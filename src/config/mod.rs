use crate::models::{MonthKey, SourceId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub sources: SourcesConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub request_delay_ms: u64,
    pub jitter_ms: u64,
    pub user_agent: String,
}

/// Bounded retry around every provider request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// Double the delay after every failed attempt instead of keeping it fixed.
    pub exponential: bool,
    pub jitter: bool,
}

/// Provider endpoints and credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub enabled: Vec<SourceId>,


    pub yahoo_base_url: String,
    pub sp500_symbol: String,
    pub bitcoin_symbol: String,

    pub alpha_vantage_base_url: String,
    pub alpha_vantage_api_key: Option<String>,
    pub gold_symbol: String,

    pub fred_base_url: String,
    pub fred_api_key: Option<String>,
    pub cpi_series: String,
    pub oil_series: String,
    pub natgas_series: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub run_migrations: bool,
}

/// How a source's next chunk is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Persisted per-source chunk cursor.
    Cursor,
    /// Chunk derived from the stored non-null count.
    Count,
}

/// Chunked backfill parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_size: u32,
    pub max_total: u32,
    pub epoch_start: MonthKey,
    pub progress: ProgressMode,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            request_delay_ms: 500,
            jitter_ms: 250,
            user_agent: "store-of-value/0.1 (personal research; monthly price history)".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 10_000,
            exponential: false,
            jitter: false,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: SourceId::ALL.to_vec(),
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            sp500_symbol: "SPY".to_string(),
            bitcoin_symbol: "BTC-USD".to_string(),
            alpha_vantage_base_url: "https://www.alphavantage.co".to_string(),
            alpha_vantage_api_key: None,
            gold_symbol: "GLD".to_string(),
            fred_base_url: "https://api.stlouisfed.org".to_string(),
            fred_api_key: None,
            cpi_series: "CPIAUCSL".to_string(),
            oil_series: "DCOILWTICO".to_string(),
            natgas_series: "DHHNGSP".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/store_of_value.duckdb"),
            run_migrations: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            max_total: 100,
            epoch_start: MonthKey::DEFAULT_EPOCH,
            progress: ProgressMode::Cursor,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("SOV")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sources.enabled")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.ingest.chunk_size > 0, "ingest.chunk_size must be positive");
        anyhow::ensure!(self.retry.max_attempts > 0, "retry.max_attempts must be at least 1");
        Ok(())
    }
}
