use std::sync::Arc;

use assessment_core::{AssessmentPayload, DailyPoint, IndicatorSnapshot, RecentWindow};
use chrono::Utc;
use futures_util::future::join_all;
use indicator_feed::IndicatorSubscription;
use market_data::{HistoricalSeriesCache, SeriesAggregator};
use serde_json::{json, Value};

/// Marker string substituted for an absent or empty recent window, so the
/// rendered prompt never carries an ambiguous empty field.
pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// Fixed sentence used when the indicator feed has no snapshot.
pub const NO_INDICATOR_DATA: &str = "No indicator data available.";

/// Keep every 5th recent point (0-indexed), then the last 288 of those.
const RECENT_SAMPLE_STRIDE: usize = 5;
const RECENT_SAMPLE_KEEP: usize = 288;

/// Daily series are bounded to this many points in the payload.
const DAILY_POINTS_KEEP: usize = 900;

/// Assembles the normalized payload for one pipeline run by merging the
/// indicator snapshot, the historical cache, and freshly pulled recent
/// windows. Every step degrades independently to a sentinel value; the
/// build itself never fails.
pub struct PayloadBuilder {
    subscription: Arc<IndicatorSubscription>,
    historical: Arc<HistoricalSeriesCache>,
    aggregator: SeriesAggregator,
    assets: Vec<String>,
}

impl PayloadBuilder {
    pub fn new(
        subscription: Arc<IndicatorSubscription>,
        historical: Arc<HistoricalSeriesCache>,
        aggregator: SeriesAggregator,
        assets: Vec<String>,
    ) -> Self {
        Self {
            subscription,
            historical,
            aggregator,
            assets,
        }
    }

    pub async fn build(&self) -> AssessmentPayload {
        let generated_at = Utc::now();
        let mut fields = serde_json::Map::new();
        let mut data_sources = Vec::new();
        let mut missing_sources = Vec::new();

        // Indicator snapshot: substitute an explicit placeholder rather
        // than omitting the field when the feed has nothing.
        let snapshot = self.subscription.current();
        fields.insert(
            "indicator_summary".to_string(),
            Value::String(render_indicator_summary(snapshot.as_ref())),
        );
        let snapshot_value = match &snapshot {
            Some(s) => {
                data_sources.push("indicator_feed".to_string());
                serde_json::to_value(s).unwrap_or_else(|_| no_data_placeholder())
            }
            None => {
                missing_sources.push("indicator_feed".to_string());
                no_data_placeholder()
            }
        };
        fields.insert("indicator_snapshot".to_string(), snapshot_value);

        // Recent windows and daily series fetch concurrently across assets.
        let (windows, dailies) = tokio::join!(
            self.aggregator.collect(&self.assets),
            join_all(self.assets.iter().map(|asset| self.historical.get(asset)))
        );

        for (asset, daily) in self.assets.iter().zip(dailies) {
            let key = asset.to_lowercase();

            let window = windows.get(asset).cloned().flatten();
            let recent_source = format!("{}_recent", key);
            let recent_value = match window {
                Some(ref w) if !w.is_empty() => {
                    data_sources.push(recent_source);
                    sample_recent_window(w)
                }
                _ => {
                    missing_sources.push(recent_source);
                    Value::String(INSUFFICIENT_DATA.to_string())
                }
            };
            fields.insert(format!("{}_recent_prices", key), recent_value);

            let daily_source = format!("{}_daily", key);
            if daily.is_empty() {
                missing_sources.push(daily_source);
            } else {
                data_sources.push(daily_source);
            }
            fields.insert(
                format!("{}_daily_prices", key),
                serialize_daily_series(&daily),
            );
        }

        fields.insert(
            "generated_at".to_string(),
            Value::String(generated_at.to_rfc3339()),
        );

        AssessmentPayload {
            generated_at,
            fields,
            data_sources,
            missing_sources,
        }
    }
}

fn no_data_placeholder() -> Value {
    json!({"status": "no data"})
}

/// One line per indicator: `"<name>: <hit> (Value: <value>, Threshold:
/// <threshold>)"`, missing numbers rendered as a literal "N/A".
pub fn render_indicator_summary(snapshot: Option<&IndicatorSnapshot>) -> String {
    let snapshot = match snapshot {
        Some(s) if !s.indicators.is_empty() => s,
        _ => return NO_INDICATOR_DATA.to_string(),
    };

    snapshot
        .indicators
        .iter()
        .map(|i| {
            format!(
                "{}: {} (Value: {}, Threshold: {})",
                i.name,
                i.hit,
                format_number(i.current_value),
                format_number(i.threshold)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_number(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "N/A".to_string(),
    }
}

/// Down-sample a recent window: stride 5 from index 0, then keep the last
/// 288 sampled points. Serialized as compact `[timestamp, close]` pairs.
pub fn sample_recent_window(window: &RecentWindow) -> Value {
    let sampled: Vec<Value> = window
        .iter()
        .step_by(RECENT_SAMPLE_STRIDE)
        .map(|p| json!([p.timestamp, p.close]))
        .collect();

    let start = sampled.len().saturating_sub(RECENT_SAMPLE_KEEP);
    Value::Array(sampled[start..].to_vec())
}

/// Serialize up to the last 900 daily points as `[date, close]` pairs.
fn serialize_daily_series(series: &[DailyPoint]) -> Value {
    let start = series.len().saturating_sub(DAILY_POINTS_KEEP);
    Value::Array(
        series[start..]
            .iter()
            .map(|p| json!([p.timestamp.format("%Y-%m-%d").to_string(), p.close]))
            .collect(),
    )
}
