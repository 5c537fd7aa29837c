use std::collections::HashMap;
use std::sync::Arc;

use assessment_core::DailyPoint;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::MarketDataProvider;

/// Default cap on cached daily points per asset.
pub const DEFAULT_MAX_POINTS: usize = 900;

/// Per-asset cache of long daily close series. Each asset's series is
/// replaced atomically on refresh; readers never observe a partial series.
pub struct HistoricalSeriesCache {
    provider: Arc<dyn MarketDataProvider>,
    assets: Vec<String>,
    history_days: u32,
    max_points: usize,
    series: RwLock<HashMap<String, Arc<Vec<DailyPoint>>>>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl HistoricalSeriesCache {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        assets: Vec<String>,
        history_days: u32,
        max_points: usize,
    ) -> Self {
        Self {
            provider,
            assets,
            history_days,
            max_points,
            series: RwLock::new(HashMap::new()),
            last_refreshed: RwLock::new(None),
        }
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed.read().await
    }

    /// Refetch daily history for every tracked asset in parallel. Each
    /// asset succeeds or fails independently; a failed fetch leaves that
    /// asset's previous series untouched. Total failure is logged, never
    /// raised.
    pub async fn refresh(&self) {
        let fetches = self.assets.iter().map(|asset| {
            let provider = Arc::clone(&self.provider);
            async move {
                let result = provider.daily_history(asset, self.history_days).await;
                (asset.clone(), result)
            }
        });

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for (asset, result) in join_all(fetches).await {
            match result {
                Ok(raw) => {
                    let normalized = normalize_series(raw, self.max_points);
                    tracing::info!(
                        "Historical series refreshed for {}: {} points",
                        asset,
                        normalized.len()
                    );
                    let mut series = self.series.write().await;
                    series.insert(asset, Arc::new(normalized));
                    succeeded += 1;
                }
                Err(e) => {
                    tracing::warn!("Historical refresh failed for {}: {}", asset, e);
                    failed += 1;
                }
            }
        }

        if succeeded > 0 {
            *self.last_refreshed.write().await = Some(Utc::now());
        }
        if succeeded == 0 && failed > 0 {
            tracing::warn!("Historical refresh failed for all {} assets", failed);
        }
    }

    /// Cached series for one asset. An empty cache triggers exactly one
    /// synchronous refresh; the result may still be empty and is returned
    /// as-is.
    pub async fn get(&self, asset: &str) -> Arc<Vec<DailyPoint>> {
        if let Some(series) = self.lookup(asset).await {
            if !series.is_empty() {
                return series;
            }
        }

        tracing::info!("Historical cache miss for {}, refreshing", asset);
        self.refresh().await;

        self.lookup(asset).await.unwrap_or_default()
    }

    async fn lookup(&self, asset: &str) -> Option<Arc<Vec<DailyPoint>>> {
        self.series.read().await.get(asset).cloned()
    }
}

/// Drop non-finite closes, sort ascending by timestamp, de-duplicate on
/// timestamp, and keep only the last `max_points`.
pub fn normalize_series(mut points: Vec<DailyPoint>, max_points: usize) -> Vec<DailyPoint> {
    points.retain(|p| p.close.is_finite());
    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);
    if points.len() > max_points {
        points.drain(..points.len() - max_points);
    }
    points
}
