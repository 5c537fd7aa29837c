use std::time::Duration;

use assessment_core::{AssessmentError, DailyPoint, PipelineResult, PricePoint, RecentWindow};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;

pub mod aggregator;
pub mod cache;

pub use aggregator::SeriesAggregator;
pub use cache::HistoricalSeriesCache;

/// Opaque pull source for price series, keyed by asset and window.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Short high-resolution series over the last `hours`.
    async fn recent_window(&self, asset: &str, hours: u32) -> PipelineResult<RecentWindow>;

    /// Long one-point-per-day series over the last `days`.
    async fn daily_history(&self, asset: &str, days: u32) -> PipelineResult<Vec<DailyPoint>>;
}

/// HTTP client for the price data provider.
#[derive(Clone)]
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> PipelineResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AssessmentError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AssessmentError::Transport(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AssessmentError::Transport(e.to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn recent_window(&self, asset: &str, hours: u32) -> PipelineResult<RecentWindow> {
        let url = format!("{}/{}?hours={}", self.base_url, asset, hours);
        let body: RecentBody = self.get_json(&url).await?;
        Ok(body.into_points())
    }

    async fn daily_history(&self, asset: &str, days: u32) -> PipelineResult<Vec<DailyPoint>> {
        let url = format!("{}/{}/daily?days={}", self.base_url, asset, days);
        let body: DailyBody = self.get_json(&url).await?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|row| {
                let close = row.close?;
                let timestamp = DateTime::from_timestamp_millis(row.timestamp)?;
                Some(DailyPoint { timestamp, close })
            })
            .collect())
    }
}

/// Recent-window responses arrive either as a bare array of points or
/// wrapped in a `data`/`prices` envelope depending on the upstream version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecentBody {
    Bare(Vec<PricePoint>),
    Data { data: Vec<PricePoint> },
    Prices { prices: Vec<PricePoint> },
}

impl RecentBody {
    fn into_points(self) -> Vec<PricePoint> {
        match self {
            RecentBody::Bare(points) => points,
            RecentBody::Data { data } => data,
            RecentBody::Prices { prices } => prices,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DailyBody {
    #[serde(default)]
    data: Vec<DailyRow>,
}

#[derive(Debug, Deserialize)]
struct DailyRow {
    timestamp: i64,
    #[serde(default, alias = "price", alias = "c")]
    close: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_body_decodes_all_envelopes() {
        let bare: RecentBody =
            serde_json::from_str(r#"[{"timestamp": 1, "close": 10.0}]"#).unwrap();
        assert_eq!(bare.into_points().len(), 1);

        let data: RecentBody =
            serde_json::from_str(r#"{"data": [{"timestamp": 1, "price": 10.0}]}"#).unwrap();
        let points = data.into_points();
        assert_eq!(points[0].close, Some(10.0));

        let prices: RecentBody =
            serde_json::from_str(r#"{"prices": [{"timestamp": 1, "c": 10.0}]}"#).unwrap();
        assert_eq!(prices.into_points()[0].close, Some(10.0));
    }

    #[test]
    fn daily_row_maps_alternate_close_names() {
        let body: DailyBody = serde_json::from_str(
            r#"{"data": [
                {"timestamp": 1700000000000, "close": 42000.5},
                {"timestamp": 1700086400000, "price": 42100.0},
                {"timestamp": 1700172800000, "c": 41900.0},
                {"timestamp": 1700259200000}
            ]}"#,
        )
        .unwrap();
        let closes: Vec<Option<f64>> = body.data.iter().map(|r| r.close).collect();
        assert_eq!(
            closes,
            vec![Some(42000.5), Some(42100.0), Some(41900.0), None]
        );
    }
}
