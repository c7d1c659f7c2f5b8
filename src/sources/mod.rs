pub mod alpha_vantage;
pub mod fred;
pub mod http_client;
pub mod yahoo;

use crate::config::AppConfig;
use crate::models::{RawObservation, SourceId};
use crate::planner::FetchWindow;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::sync::Arc;

use self::alpha_vantage::AlphaVantageSource;
use self::fred::FredSource;
use self::http_client::HttpClient;
use self::yahoo::YahooChartSource;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Provider throttled the request: {0}")]
    RateLimited(String),
    #[error("Unexpected response: {0}")]
    Parse(String),
    #[error("No API key configured for {0}")]
    MissingApiKey(&'static str),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(e) => !e.is_decode() && !e.is_builder(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::RateLimited(_) => true,
            FetchError::Parse(_) | FetchError::MissingApiKey(_) | FetchError::Url(_) => false,
        }
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Raw observation provider for one source. Implementations return what the
/// provider has for `window` (possibly more); trimming to the window and to one
/// value per month happens in the normalizer.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    fn source(&self) -> SourceId;
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<RawObservation>, FetchError>;
}

/// Build every enabled source. Credentials travel with each source instance.
pub fn build_sources(cfg: &AppConfig) -> Result<Vec<Box<dyn ObservationSource>>> {
    let client = Arc::new(HttpClient::new(&cfg.http, &cfg.retry)?);
    let s = &cfg.sources;

    let sources = s
        .enabled
        .iter()
        .map(|id| -> Box<dyn ObservationSource> {
            let client = Arc::clone(&client);
            match id {
                SourceId::Bitcoin => Box::new(YahooChartSource::new(
                    client, SourceId::Bitcoin, &s.yahoo_base_url, &s.bitcoin_symbol,
                )),
                SourceId::Sp500 => Box::new(YahooChartSource::new(
                    client, SourceId::Sp500, &s.yahoo_base_url, &s.sp500_symbol,
                )),
                SourceId::Gold => Box::new(AlphaVantageSource::new(
                    client, &s.alpha_vantage_base_url, s.alpha_vantage_api_key.clone(), &s.gold_symbol,
                )),
                SourceId::Oil => Box::new(FredSource::new(
                    client, SourceId::Oil, &s.fred_base_url, s.fred_api_key.clone(), &s.oil_series,
                )),
                SourceId::Natgas => Box::new(FredSource::new(
                    client, SourceId::Natgas, &s.fred_base_url, s.fred_api_key.clone(), &s.natgas_series,
                )),
                SourceId::Cpi => Box::new(FredSource::new(
                    client, SourceId::Cpi, &s.fred_base_url, s.fred_api_key.clone(), &s.cpi_series,
                )),
            }
        })
        .collect();

    Ok(sources)
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// JSON scalar as raw text; null and non-scalars become None.
pub(crate) fn raw_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// First day of the window and the last day still inside it.
pub(crate) fn window_days(window: &FetchWindow) -> (NaiveDate, NaiveDate) {
    let start = window.start.first_day();
    let end = window.end.first_day();
    (start, end.pred_opt().unwrap_or(end))
}

/// Window bounds as unix seconds, end exclusive.
pub(crate) fn window_unix(window: &FetchWindow) -> (i64, i64) {
    (
        midnight(window.start.first_day()).and_utc().timestamp(),
        midnight(window.end.first_day()).and_utc().timestamp(),
    )
}

/// Drop key material from URLs before they reach the logs.
pub(crate) fn redact(url: &url::Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k.contains("key") { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MonthKey;
    use crate::planner::ChunkedFetchPlanner;
    use serde_json::json;

    #[test]
    fn test_raw_text() {
        assert_eq!(raw_text(&json!("1.5")), Some("1.5".to_string()));
        assert_eq!(raw_text(&json!(2.25)), Some("2.25".to_string()));
        assert_eq!(raw_text(&json!(null)), None);
    }

    #[test]
    fn test_window_days_end_inclusive() {
        let w = ChunkedFetchPlanner::new(25, 100, MonthKey::DEFAULT_EPOCH).window_for_chunk(0);
        let (start, last) = window_days(&w);
        assert_eq!(start.to_string(), "2016-07-01");
        assert_eq!(last.to_string(), "2018-07-31");
    }

    #[test]
    fn test_redact_hides_keys() {
        let url = url::Url::parse("https://x.test/q?series_id=CPI&api_key=secret&apikey=s2").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(!shown.contains("s2"));
        assert!(shown.contains("series_id=CPI"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Status { status: 503, body: String::new() }.is_transient());
        assert!(FetchError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!FetchError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!FetchError::MissingApiKey("fred").is_transient());
        assert!(FetchError::RateLimited("slow down".into()).is_transient());
    }

    #[test]
    fn test_build_sources_follows_enabled_list() {
        let mut cfg = AppConfig::default();
        cfg.sources.enabled = vec![SourceId::Cpi, SourceId::Gold];
        let sources = build_sources(&cfg).unwrap();
        let ids: Vec<SourceId> = sources.iter().map(|s| s.source()).collect();
        assert_eq!(ids, vec![SourceId::Cpi, SourceId::Gold]);
    }

    #[test]
    fn test_default_sources_cover_every_id() {
        let sources = build_sources(&AppConfig::default()).unwrap();
        let ids: Vec<SourceId> = sources.iter().map(|s| s.source()).collect();
        assert_eq!(ids, SourceId::ALL.to_vec());
    }
}
