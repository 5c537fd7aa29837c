use assessment_core::{AssessmentResult, PipelineResult, StorageStatus};
use result_store::ResultStore;

use crate::client::AssessmentClient;
use crate::payload::PayloadBuilder;
use crate::prompt::PromptRenderer;

/// Outcome of one completed pipeline run. A run that degraded (some
/// sources unavailable, or persistence soft-failed) still reports success.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: AssessmentResult,
    pub storage: StorageStatus,
    pub missing_sources: Vec<String>,
}

/// Runs build -> render -> assess -> persist as one unit. A non-blocking
/// guard keeps at most one run in flight; a second trigger while a run is
/// active is skipped and logged rather than queued.
pub struct AssessmentPipeline {
    builder: PayloadBuilder,
    renderer: PromptRenderer,
    client: AssessmentClient,
    store: ResultStore,
    template_name: String,
    template_version: String,
    run_guard: tokio::sync::Mutex<()>,
}

impl AssessmentPipeline {
    pub fn new(
        builder: PayloadBuilder,
        renderer: PromptRenderer,
        client: AssessmentClient,
        store: ResultStore,
        template_name: String,
        template_version: String,
    ) -> Self {
        Self {
            builder,
            renderer,
            client,
            store,
            template_name,
            template_version,
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Attempts one run. Returns Ok(None) when another run is already in
    /// flight.
    pub async fn try_run(&self) -> PipelineResult<Option<RunReport>> {
        let _guard = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!("Assessment run already in flight, skipping trigger");
                return Ok(None);
            }
        };

        self.run_once().await.map(Some)
    }

    async fn run_once(&self) -> PipelineResult<RunReport> {
        let payload = self.builder.build().await;
        if !payload.missing_sources.is_empty() {
            tracing::warn!(
                "Assessment payload degraded, missing sources: {:?}",
                payload.missing_sources
            );
        }

        let prompt =
            self.renderer
                .render(&self.template_name, &self.template_version, &payload)?;

        let result = self.client.assess(&prompt, &payload.data_sources).await?;
        tracing::info!(
            "Assessment complete: score {} from {} in {}ms",
            result.score,
            result.metadata.model,
            result.metadata.elapsed_ms
        );

        let storage = self.store.append(&result).await;
        if !storage.stored {
            tracing::warn!(
                "Assessment result not persisted: {}",
                storage.reason.as_deref().unwrap_or("unknown")
            );
        }

        Ok(RunReport {
            result,
            storage,
            missing_sources: payload.missing_sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assessment_core::{AssessmentError, DailyPoint, PipelineResult, PricePoint, RecentWindow};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use indicator_feed::{FeedEvent, FeedTransport, IndicatorSubscription};
    use market_data::{HistoricalSeriesCache, MarketDataProvider, SeriesAggregator};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    use crate::client::CompletionProvider;

    const ASSETS: [&str; 3] = ["BTC", "ETH", "SOL"];

    struct ScriptedTransport {
        events: Mutex<Vec<FeedEvent>>,
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn run(self: Arc<Self>, events: mpsc::Sender<FeedEvent>) {
            let scripted = std::mem::take(&mut *self.events.lock().await);
            for event in scripted {
                let _ = events.send(event).await;
            }
            std::future::pending::<()>().await;
        }

        fn shutdown(&self) {}
    }

    struct FixtureProvider;

    fn day(i: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_500_000_000 + i * 86_400, 0).unwrap()
    }

    #[async_trait]
    impl MarketDataProvider for FixtureProvider {
        async fn recent_window(&self, _asset: &str, _hours: u32) -> PipelineResult<RecentWindow> {
            Ok((0..100)
                .map(|i| PricePoint {
                    timestamp: Some(1_700_000_000_000 + i * 300_000),
                    close: Some(60_000.0 + i as f64),
                })
                .collect())
        }

        async fn daily_history(&self, _asset: &str, _days: u32) -> PipelineResult<Vec<DailyPoint>> {
            Ok((0..900)
                .map(|i| DailyPoint {
                    timestamp: day(i),
                    close: 10_000.0 + i as f64,
                })
                .collect())
        }
    }

    struct CannedCompletion {
        reply: String,
    }

    #[async_trait]
    impl CompletionProvider for CannedCompletion {
        async fn complete(&self, _prompt: &str) -> PipelineResult<String> {
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> String {
            "canned-model".to_string()
        }
    }

    fn feed_document() -> serde_json::Value {
        let indicators: Vec<serde_json::Value> = (0..10)
            .map(|i| {
                serde_json::json!({
                    "indicator_name": format!("indicator_{}", i),
                    "hit_status": i < 2,
                    "current_value": i as f64,
                    "threshold": 10.0
                })
            })
            .collect();
        serde_json::json!({"indicators": indicators, "timestamp": "2024-03-01T00:00:00Z"})
    }

    fn write_template(dir: &PathBuf) {
        std::fs::create_dir_all(dir).unwrap();
        let mut template = String::from("Indicators:\n{{indicator_summary}}\n");
        for asset in ASSETS {
            let key = asset.to_lowercase();
            template.push_str(&format!(
                "{} recent: {{{{{}_recent_prices}}}}\n{} daily: {{{{{}_daily_prices}}}}\n",
                asset, key, asset, key
            ));
        }
        template.push_str("Generated: {{generated_at}}\n");
        std::fs::write(dir.join("peak_assessment_v1.txt"), template).unwrap();
    }

    async fn build_pipeline(reply: &str, close_store: bool) -> (AssessmentPipeline, ResultStore) {
        let assets: Vec<String> = ASSETS.iter().map(|s| s.to_string()).collect();

        let transport = Arc::new(ScriptedTransport {
            events: Mutex::new(vec![FeedEvent::Document(feed_document())]),
        });
        let subscription = Arc::new(IndicatorSubscription::spawn("feed".to_string(), transport));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let provider: Arc<dyn MarketDataProvider> = Arc::new(FixtureProvider);
        let historical = Arc::new(HistoricalSeriesCache::new(
            Arc::clone(&provider),
            assets.clone(),
            1000,
            900,
        ));
        historical.refresh().await;
        let aggregator = SeriesAggregator::new(provider, 24, Duration::from_secs(10));

        static DIR_SEQ: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        let template_dir = std::env::temp_dir().join(format!(
            "pipeline-test-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        ));
        write_template(&template_dir);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ResultStore::new(pool.clone(), "peak-sentinel".to_string(), "0.1.0".to_string());
        store.init_tables().await.unwrap();
        if close_store {
            pool.close().await;
        }

        let pipeline = AssessmentPipeline::new(
            PayloadBuilder::new(subscription, historical, aggregator, assets),
            PromptRenderer::new(&template_dir),
            AssessmentClient::new(Arc::new(CannedCompletion {
                reply: reply.to_string(),
            })),
            store.clone(),
            "peak_assessment".to_string(),
            "v1".to_string(),
        );

        (pipeline, store)
    }

    #[tokio::test]
    async fn full_run_stores_validated_score() {
        let reply = "Assessment below.\n```json\n{\"score\": 8, \"analysis\": \"early cycle\", \
                     \"reasoning\": \"few indicators hit\", \"key_factors\": [\"indicator_0\"]}\n```";
        let (pipeline, store) = build_pipeline(reply, false).await;

        let report = pipeline.try_run().await.unwrap().expect("run should not be skipped");
        assert_eq!(report.result.score, 8);
        assert!(report.storage.stored);
        assert!(report.missing_sources.is_empty());

        // All sources contributed: the feed plus recent+daily per asset.
        let sources = &report.result.metadata.data_sources;
        assert_eq!(sources.len(), 1 + ASSETS.len() * 2);
        assert!(sources.contains(&"indicator_feed".to_string()));
        assert!(sources.contains(&"btc_recent".to_string()));
        assert!(sources.contains(&"sol_daily".to_string()));

        let latest = store.latest().await.expect("result should be persisted");
        assert_eq!(latest.result.score, 8);
    }

    #[tokio::test]
    async fn prose_reply_aborts_run_and_stores_nothing() {
        let (pipeline, store) = build_pipeline("I cannot produce a verdict today.", false).await;

        let err = pipeline.try_run().await.unwrap_err();
        assert!(matches!(err, AssessmentError::NoStructuredOutput));
        assert!(store.recent(10).await.results.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_still_reports_success() {
        let reply = "```json\n{\"score\": 55, \"analysis\": \"mid cycle\", \
                     \"reasoning\": \"mixed signals\", \"key_factors\": []}\n```";
        let (pipeline, _store) = build_pipeline(reply, true).await;

        let report = pipeline.try_run().await.unwrap().expect("run should complete");
        assert_eq!(report.result.score, 55);
        assert!(!report.storage.stored);
        assert!(report.storage.reason.is_some());
    }
}
