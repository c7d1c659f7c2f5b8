//! Gold (GLD) daily open/close from Alpha Vantage `TIME_SERIES_DAILY`.

use super::http_client::HttpClient;
use super::{midnight, raw_text, FetchError, ObservationSource};
use crate::models::{RawObservation, SourceId};
use crate::planner::FetchWindow;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct AlphaVantageSource {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
    symbol: String,
}

impl AlphaVantageSource {
    pub fn new(client: Arc<HttpClient>, base_url: &str, api_key: Option<String>, symbol: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
            symbol: symbol.to_string(),
        }
    }

    /// The endpoint has no date range; the full history comes back and the
    /// normalizer clips it to the window.
    fn url(&self, api_key: &str) -> Result<Url, FetchError> {
        Ok(Url::parse_with_params(
            &format!("{}/query", self.base_url),
            &[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", self.symbol.as_str()),
                ("outputsize", "full"),
                ("apikey", api_key),
            ],
        )?)
    }

    /// Errors Alpha Vantage reports with HTTP 200. "Note" is always the call
    /// frequency limit; "Information" is throttling only when it talks about
    /// rates, otherwise it is a premium-only parameter or a bad key.
    pub fn check_response(json: &Value) -> Result<(), FetchError> {
        if let Some(msg) = json["Note"].as_str() {
            return Err(FetchError::RateLimited(msg.to_string()));
        }
        if let Some(msg) = json["Information"].as_str() {
            return Err(if is_rate_message(msg) {
                FetchError::RateLimited(msg.to_string())
            } else {
                FetchError::Parse(format!("Alpha Vantage: {}", msg))
            });
        }
        if let Some(msg) = json["Error Message"].as_str() {
            return Err(FetchError::Parse(format!("Alpha Vantage: {}", msg)));
        }
        Ok(())
    }

    /// `{"Time Series (Daily)": {"2024-01-05": {"1. open": "190.1", "4. close": "189.7"}}}`.
    pub fn parse_daily(json: &Value) -> Result<Vec<RawObservation>, FetchError> {
        Self::check_response(json)?;

        let series = json["Time Series (Daily)"]
            .as_object()
            .ok_or_else(|| FetchError::Parse("no daily series in Alpha Vantage response".into()))?;

        let mut obs: Vec<RawObservation> = series
            .iter()
            .filter_map(|(date_str, entry)| {
                let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
                Some(RawObservation {
                    source: SourceId::Gold,
                    timestamp: midnight(date),
                    value: raw_text(&entry["1. open"]),
                    secondary: raw_text(&entry["4. close"]),
                })
            })
            .collect();
        obs.sort_by_key(|o| o.timestamp);
        Ok(obs)
    }
}

fn is_rate_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    ["call frequency", "rate limit", "calls per", "requests per"]
        .iter()
        .any(|p| msg.contains(p))
}

#[async_trait]
impl ObservationSource for AlphaVantageSource {
    fn source(&self) -> SourceId {
        SourceId::Gold
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<RawObservation>, FetchError> {
        let api_key = self.api_key.as_deref().ok_or(FetchError::MissingApiKey("alpha_vantage"))?;
        let json = self
            .client
            .get_json_checked(&self.url(api_key)?, Self::check_response)
            .await?;
        let obs = Self::parse_daily(&json)?;
        debug!("gold: {} Alpha Vantage days (window {})", obs.len(), window);
        Ok(obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MonthKey;
    use crate::planner::ChunkedFetchPlanner;
    use crate::sources::test_server::{client, serve};
    use serde_json::json;

    #[test]
    fn test_parse_daily_sorted_with_open_close() {
        let json_data = json!({
            "Meta Data": { "2. Symbol": "GLD" },
            "Time Series (Daily)": {
                "2016-07-05": { "1. open": "128.50", "4. close": "129.90" },
                "2016-07-01": { "1. open": "126.20", "4. close": "127.00" }
            }
        });
        let obs = AlphaVantageSource::parse_daily(&json_data).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].timestamp.date().to_string(), "2016-07-01");
        assert_eq!(obs[0].value.as_deref(), Some("126.20"));
        assert_eq!(obs[0].secondary.as_deref(), Some("127.00"));
    }

    #[test]
    fn test_throttle_note_is_transient() {
        let json_data = json!({ "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute." });
        let err = AlphaVantageSource::parse_daily(&json_data).unwrap_err();
        assert!(err.is_transient());
    }

    fn window() -> FetchWindow {
        ChunkedFetchPlanner::new(25, 100, MonthKey::DEFAULT_EPOCH).window_for_chunk(0)
    }

    #[tokio::test]
    async fn test_throttle_note_is_retried() {
        let stub = serve(200, r#"{"Note":"Our standard API call frequency is 5 calls per minute."}"#).await;
        let source = AlphaVantageSource::new(client(3), &stub.base_url, Some("k".into()), "GLD");

        let err = source.fetch(&window()).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(_)));
        assert_eq!(stub.hits(), 3);
    }

    #[tokio::test]
    async fn test_premium_notice_is_not_retried() {
        let stub = serve(200, r#"{"Information":"The outputsize=full parameter value is a premium feature."}"#).await;
        let source = AlphaVantageSource::new(client(3), &stub.base_url, Some("k".into()), "GLD");

        let err = source.fetch(&window()).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_request() {
        let stub = serve(200, "{}").await;
        let source = AlphaVantageSource::new(client(3), &stub.base_url, Some("  ".into()), "GLD");

        let err = source.fetch(&window()).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingApiKey(_)));
        assert_eq!(stub.hits(), 0);
    }

    #[test]
    fn test_information_rate_limit_is_transient() {
        let json_data = json!({ "Information": "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day." });
        assert!(AlphaVantageSource::check_response(&json_data).unwrap_err().is_transient());
    }

    #[test]
    fn test_information_premium_is_permanent() {
        let json_data = json!({ "Information": "Thank you for using Alpha Vantage! The outputsize=full parameter value is a premium feature for the TIME_SERIES_DAILY endpoint." });
        let err = AlphaVantageSource::check_response(&json_data).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_message_is_permanent() {
        let json_data = json!({ "Error Message": "Invalid API call." });
        let err = AlphaVantageSource::parse_daily(&json_data).unwrap_err();
        assert!(!err.is_transient());
    }
}
