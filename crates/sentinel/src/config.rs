use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    // Tracked assets
    pub tracked_assets: Vec<String>,

    // Indicator feed (push)
    pub feed_ws_url: String,
    pub feed_document: String,

    // Price data provider (pull)
    pub price_api_url: String,
    pub price_timeout_seconds: u64,
    pub recent_window_hours: u32,
    pub recent_pull_timeout_seconds: u64,
    pub history_days: u32,
    pub max_daily_points: usize,
    pub historical_refresh_seconds: u64,

    // Reasoning model
    pub completion_api_url: String,
    pub completion_api_key: String,
    pub completion_model: String,
    pub completion_timeout_seconds: u64,

    // Prompt template
    pub template_dir: String,
    pub template_name: String,
    pub template_version: String,

    // Scheduler
    pub run_interval_seconds: u64,

    // Database
    pub database_url: String,
}

impl SentinelConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            tracked_assets: env::var("TRACKED_ASSETS")
                .unwrap_or_else(|_| "BTC".to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),

            feed_ws_url: env::var("INDICATOR_FEED_URL")
                .unwrap_or_else(|_| "ws://localhost:8090/feed".to_string()),
            feed_document: env::var("INDICATOR_FEED_DOCUMENT")
                .unwrap_or_else(|_| "market-indicators/latest".to_string()),

            price_api_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/prices".to_string()),
            price_timeout_seconds: env::var("PRICE_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            recent_window_hours: env::var("RECENT_WINDOW_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            recent_pull_timeout_seconds: env::var("RECENT_PULL_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            history_days: env::var("HISTORY_DAYS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_daily_points: env::var("MAX_DAILY_POINTS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()?,
            historical_refresh_seconds: env::var("HISTORICAL_REFRESH_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()?,

            completion_api_url: env::var("COMPLETION_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            completion_api_key: env::var("COMPLETION_API_KEY").unwrap_or_default(),
            completion_model: env::var("COMPLETION_MODEL")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            completion_timeout_seconds: env::var("COMPLETION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()?,

            template_dir: env::var("TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string()),
            template_name: env::var("TEMPLATE_NAME")
                .unwrap_or_else(|_| "peak_assessment".to_string()),
            template_version: env::var("TEMPLATE_VERSION").unwrap_or_else(|_| "v1".to_string()),

            run_interval_seconds: env::var("RUN_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://sentinel.db?mode=rwc".to_string()),
        };

        if config.tracked_assets.is_empty() {
            anyhow::bail!("TRACKED_ASSETS must name at least one asset");
        }
        if config.completion_api_key.trim().is_empty() {
            // Not fatal at startup: each run fails with a configuration
            // error until the key is provided.
            tracing::warn!("COMPLETION_API_KEY is not set; assessment runs will fail");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // Only checks defaults when the env does not override them.
        if env::var("TRACKED_ASSETS").is_ok() {
            return;
        }
        let config = SentinelConfig::from_env().unwrap();
        assert_eq!(config.tracked_assets, vec!["BTC".to_string()]);
        assert_eq!(config.run_interval_seconds, 3600);
        assert_eq!(config.max_daily_points, 900);
        assert_eq!(config.completion_timeout_seconds, 90);
    }
}
