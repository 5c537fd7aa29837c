use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use assessment_engine::{
    AssessmentClient, AssessmentPipeline, ChatCompletionClient, PayloadBuilder, PromptRenderer,
};
use indicator_feed::{IndicatorSubscription, WsFeedTransport};
use market_data::{HistoricalSeriesCache, HttpMarketData, MarketDataProvider, SeriesAggregator};
use result_store::ResultStore;
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;

use config::SentinelConfig;

const SERVICE_NAME: &str = "peak-sentinel";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Peak Sentinel market assessment service");

    // 2. Load configuration
    let config = SentinelConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Tracked assets: {:?}", config.tracked_assets);
    tracing::info!("  Run interval: {}s", config.run_interval_seconds);
    tracing::info!("  Price provider: {}", config.price_api_url);
    tracing::info!("  Indicator feed: {}", config.feed_ws_url);
    tracing::info!(
        "  Template: {}/{}_{}.txt",
        config.template_dir,
        config.template_name,
        config.template_version
    );
    tracing::info!("  Completion model: {}", config.completion_model);

    // 3. Initialize the result store (fatal if the DB is unreachable at boot)
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&config.database_url)
        .await?;
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {}", e))?;
    let store = ResultStore::new(
        pool,
        SERVICE_NAME.to_string(),
        SERVICE_VERSION.to_string(),
    );
    store.init_tables().await?;
    tracing::info!("Startup check: database OK");

    // 4. Price provider (warn-only reachability check)
    let market_data = HttpMarketData::new(
        config.price_api_url.clone(),
        Duration::from_secs(config.price_timeout_seconds),
    );
    match reqwest::Client::new()
        .get(market_data.base_url())
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(_) => tracing::info!("Startup check: price provider OK"),
        Err(e) => tracing::warn!(
            "Startup check: price provider unreachable ({}) — runs will degrade until it recovers",
            e
        ),
    }
    let provider: Arc<dyn MarketDataProvider> = Arc::new(market_data);

    // 5. Historical cache: refresh once at startup, then on its own timer
    let historical = Arc::new(HistoricalSeriesCache::new(
        Arc::clone(&provider),
        config.tracked_assets.clone(),
        config.history_days,
        config.max_daily_points,
    ));
    historical.refresh().await;
    {
        let cache = Arc::clone(&historical);
        let every = Duration::from_secs(config.historical_refresh_seconds);
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            interval.tick().await; // first tick fires immediately; startup already refreshed
            loop {
                interval.tick().await;
                cache.refresh().await;
            }
        });
    }

    // 6. Indicator subscription (push, long-lived, survives transport errors)
    let transport = Arc::new(WsFeedTransport::new(
        config.feed_ws_url.clone(),
        config.feed_document.clone(),
    ));
    let subscription = Arc::new(IndicatorSubscription::spawn(
        config.feed_document.clone(),
        transport,
    ));
    tracing::info!("Indicator subscription started");

    // 7. Assemble the pipeline
    let aggregator = SeriesAggregator::new(
        Arc::clone(&provider),
        config.recent_window_hours,
        Duration::from_secs(config.recent_pull_timeout_seconds),
    );
    let builder = PayloadBuilder::new(
        Arc::clone(&subscription),
        Arc::clone(&historical),
        aggregator,
        config.tracked_assets.clone(),
    );
    let completion = ChatCompletionClient::new(
        config.completion_api_url.clone(),
        config.completion_api_key.clone(),
        config.completion_model.clone(),
        Duration::from_secs(config.completion_timeout_seconds),
    );
    let pipeline = Arc::new(AssessmentPipeline::new(
        builder,
        PromptRenderer::new(&config.template_dir),
        AssessmentClient::new(Arc::new(completion)),
        store,
        config.template_name.clone(),
        config.template_version.clone(),
    ));

    tracing::info!(
        "Sentinel running: assessment every {}s, SIGUSR1 triggers an immediate run",
        config.run_interval_seconds
    );

    // 8. Scheduler: hourly cadence + manual trigger + graceful shutdown.
    // Runs are spawned so a slow completion call never delays the next
    // tick; the pipeline's own guard skips overlapping triggers.
    let mut interval = time::interval(Duration::from_secs(config.run_interval_seconds));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let mut sigusr1 = tokio::signal::unix::signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                spawn_run(Arc::clone(&pipeline), "schedule");
            }
            _ = sigusr1.recv() => {
                spawn_run(Arc::clone(&pipeline), "manual trigger");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                break;
            }
        }
    }

    subscription.teardown();
    tracing::info!("Peak Sentinel stopped");
    Ok(())
}

/// Fire one pipeline run. Failures are logged and never affect the
/// scheduler loop or subsequent runs.
fn spawn_run(pipeline: Arc<AssessmentPipeline>, trigger: &'static str) {
    tokio::spawn(async move {
        tracing::info!("Assessment run starting ({})", trigger);
        match pipeline.try_run().await {
            Ok(Some(report)) => {
                tracing::info!(
                    "Run complete: score {}, stored: {}, degraded sources: {:?}",
                    report.result.score,
                    report.storage.stored,
                    report.missing_sources
                );
            }
            Ok(None) => {
                // Skip already logged by the pipeline guard.
            }
            Err(e) => {
                tracing::error!("Assessment run failed: {}", e);
            }
        }
    });
}
