//! FRED series observations (CPI, WTI crude, Henry Hub natural gas).

use super::http_client::HttpClient;
use super::{midnight, window_days, FetchError, ObservationSource};
use crate::models::{RawObservation, SourceId};
use crate::planner::FetchWindow;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub struct FredSource {
    client: Arc<HttpClient>,
    source: SourceId,
    base_url: String,
    api_key: Option<String>,
    series_id: String,
}

impl FredSource {
    pub fn new(
        client: Arc<HttpClient>,
        source: SourceId,
        base_url: &str,
        api_key: Option<String>,
        series_id: &str,
    ) -> Self {
        Self {
            client,
            source,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
            series_id: series_id.to_string(),
        }
    }

    fn url(&self, api_key: &str, window: &FetchWindow) -> Result<Url, FetchError> {
        let (start, last) = window_days(window);
        let (start, last) = (start.to_string(), last.to_string());
        Ok(Url::parse_with_params(
            &format!("{}/fred/series/observations", self.base_url),
            &[
                ("series_id", self.series_id.as_str()),
                ("api_key", api_key),
                ("file_type", "json"),
                ("observation_start", start.as_str()),
                ("observation_end", last.as_str()),
            ],
        )?)
    }

    /// `{"observations": [{"date": "2023-01-01", "value": "123.45"}, …]}`.
    /// FRED marks gaps with "."; those stay raw for the normalizer to skip.
    pub fn parse_observations(source: SourceId, json: &Value) -> Result<Vec<RawObservation>, FetchError> {
        if let Some(msg) = json["error_message"].as_str() {
            return Err(FetchError::Parse(format!("FRED: {}", msg)));
        }
        let observations = json["observations"]
            .as_array()
            .ok_or_else(|| FetchError::Parse("no observations in FRED response".into()))?;

        let mut out = Vec::with_capacity(observations.len());
        for obs in observations {
            let Some(date_str) = obs["date"].as_str() else { continue };
            let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
                warn!("{}: unparseable FRED date {:?}", source, date_str);
                continue;
            };
            out.push(RawObservation::new(source, midnight(date), super::raw_text(&obs["value"])));
        }
        Ok(out)
    }
}

#[async_trait]
impl ObservationSource for FredSource {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<RawObservation>, FetchError> {
        let api_key = self.api_key.as_deref().ok_or(FetchError::MissingApiKey("fred"))?;
        let url = self.url(api_key, window)?;
        let json = self.client.get_json(&url).await?;
        let obs = Self::parse_observations(self.source, &json)?;
        debug!("{}: {} FRED observations for {}", self.source, obs.len(), window);
        Ok(obs)
    }
}
