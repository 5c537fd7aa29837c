use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assessment_core::RecentWindow;
use futures_util::future::join_all;

use crate::MarketDataProvider;

/// Fan-out collector for short recent windows. One concurrent pull per
/// asset, each under its own timeout; a failing or timed-out pull yields
/// None for that asset without delaying the others. No retries within a
/// call; the next scheduled run is the retry.
pub struct SeriesAggregator {
    provider: Arc<dyn MarketDataProvider>,
    window_hours: u32,
    pull_timeout: Duration,
}

impl SeriesAggregator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        window_hours: u32,
        pull_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            window_hours,
            pull_timeout,
        }
    }

    pub async fn collect(&self, assets: &[String]) -> HashMap<String, Option<RecentWindow>> {
        let pulls = assets.iter().map(|asset| {
            let provider = Arc::clone(&self.provider);
            async move {
                let window = match tokio::time::timeout(
                    self.pull_timeout,
                    provider.recent_window(asset, self.window_hours),
                )
                .await
                {
                    Ok(Ok(window)) => Some(window),
                    Ok(Err(e)) => {
                        tracing::warn!("Recent window pull failed for {}: {}", asset, e);
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Recent window pull for {} timed out after {:?}",
                            asset,
                            self.pull_timeout
                        );
                        None
                    }
                };
                (asset.clone(), window)
            }
        });

        join_all(pulls).await.into_iter().collect()
    }
}
