//! Daily closes from Yahoo's v8 chart endpoint (SPY for the S&P 500, BTC-USD
//! for bitcoin; both carry history back past 2016).

use super::http_client::HttpClient;
use super::{raw_text, window_unix, FetchError, ObservationSource};
use crate::models::{RawObservation, SourceId};
use crate::planner::FetchWindow;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct YahooChartSource {
    client: Arc<HttpClient>,
    source: SourceId,
    base_url: String,
    symbol: String,
}

impl YahooChartSource {
    pub fn new(client: Arc<HttpClient>, source: SourceId, base_url: &str, symbol: &str) -> Self {
        Self {
            client,
            source,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
        }
    }

    fn url(&self, window: &FetchWindow) -> Result<Url, FetchError> {
        let (from, to) = window_unix(window);
        let (from, to) = (from.to_string(), to.to_string());
        Ok(Url::parse_with_params(
            &format!("{}/v8/finance/chart/{}", self.base_url, self.symbol),
            &[
                ("period1", from.as_str()),
                ("period2", to.as_str()),
                ("interval", "1d"),
                ("events", "history"),
            ],
        )?)
    }

    /// `chart.result[0]` holds parallel `timestamp` and
    /// `indicators.quote[0].close` arrays; closes may be null.
    pub fn parse_chart(source: SourceId, json: &Value) -> Result<Vec<RawObservation>, FetchError> {
        let chart = &json["chart"];
        if let Some(desc) = chart["error"]["description"].as_str() {
            return Err(FetchError::Parse(format!("Yahoo: {}", desc)));
        }

        let result = &chart["result"][0];
        let timestamps = result["timestamp"]
            .as_array()
            .ok_or_else(|| FetchError::Parse("no timestamps in Yahoo chart".into()))?;
        let closes = result["indicators"]["quote"][0]["close"]
            .as_array()
            .ok_or_else(|| FetchError::Parse("no closes in Yahoo chart".into()))?;

        let obs = timestamps
            .iter()
            .zip(closes)
            .filter_map(|(ts, close)| {
                let ts = DateTime::from_timestamp(ts.as_i64()?, 0)?.naive_utc();
                Some(RawObservation::new(source, ts, raw_text(close)))
            })
            .collect();
        Ok(obs)
    }
}

#[async_trait]
impl ObservationSource for YahooChartSource {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<RawObservation>, FetchError> {
        let json = self.client.get_json(&self.url(window)?).await?;
        let obs = Self::parse_chart(self.source, &json)?;
        debug!("{}: {} Yahoo closes for {}", self.source, obs.len(), window);
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
    fn test_parse_chart() {
        let json_data = json!({
            "chart": {
                "result": [{
                    "meta": { "symbol": "SPY" },
                    "timestamp": [1467379800, 1467725400],
                    "indicators": { "quote": [{ "close": [209.92, null] }] }
                }],
                "error": null
            }
        });
        let obs = YahooChartSource::parse_chart(SourceId::Sp500, &json_data).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].timestamp.date().to_string(), "2016-07-01");
        assert_eq!(obs[0].value.as_deref(), Some("209.92"));
        assert_eq!(obs[1].value, None);
    }

    #[tokio::test]
    async fn test_bitcoin_backfills_from_epoch() {
        let stub = serve(200, r#"{"chart":{"result":[{"timestamp":[1467331200,1467417600],
            "indicators":{"quote":[{"close":[676.30,703.70]}]}}],"error":null}}"#).await;
        let source = YahooChartSource::new(client(1), SourceId::Bitcoin, &stub.base_url, "BTC-USD");
        let window = ChunkedFetchPlanner::new(25, 100, MonthKey::DEFAULT_EPOCH).window_for_chunk(0);

        let url = source.url(&window).unwrap();
        assert!(url.path().ends_with("/v8/finance/chart/BTC-USD"));
        assert!(url.query().unwrap().contains("period1=1467331200"));

        let obs = source.fetch(&window).await.unwrap();
        assert_eq!(obs.len(), 2);
        assert!(obs.iter().all(|o| o.source == SourceId::Bitcoin));
        assert_eq!(obs[0].value.as_deref(), Some("676.3"));
        assert_eq!(stub.hits(), 1);
    }

    #[test]
    fn test_chart_error() {
        let json_data = json!({
            "chart": { "result": null, "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" } }
        });
        let err = YahooChartSource::parse_chart(SourceId::Sp500, &json_data).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }
}
