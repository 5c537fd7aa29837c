use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named boolean signal from the indicator feed, with its measured
/// value and trigger threshold. Missing numbers render as "N/A" downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,
    pub hit: bool,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Latest wholesale state of the indicator feed. Replaced in full on every
/// push event; never merged with the prior state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub id: String,
    pub indicators: Vec<Indicator>,
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
}

/// One daily close. `close` is always finite once normalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyPoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// Short-interval price point from the provider. Decoded permissively:
/// unknown fields ignored, `price`/`c` accepted as aliases for `close`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricePoint {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, alias = "price", alias = "c")]
    pub close: Option<f64>,
}

/// Raw short-horizon series for one asset, held only for the duration of a
/// single pipeline run.
pub type RecentWindow = Vec<PricePoint>;

/// Normalized, immutable payload assembled once per pipeline run.
///
/// `fields` is the templating contract: every key maps to a `{{key}}`
/// placeholder in the prompt template. Adding a tracked asset or indicator
/// field means updating both the builder and the template in lockstep.
#[derive(Debug, Clone)]
pub struct AssessmentPayload {
    pub generated_at: DateTime<Utc>,
    pub fields: serde_json::Map<String, Value>,
    /// Sources that contributed data to this payload.
    pub data_sources: Vec<String>,
    /// Sources that were unavailable and got sentinel values instead.
    pub missing_sources: Vec<String>,
}

/// Run metadata attached to every validated result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub model: String,
    pub data_sources: Vec<String>,
    pub elapsed_ms: u64,
}

/// Validated verdict from the reasoning model, enriched with run metadata.
/// Created once per successful run, append-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub score: i64,
    pub analysis: String,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub metadata: RunMetadata,
}

/// Soft-failure indicator returned by the store. Persistence is
/// best-effort: `stored: false` never fails the enclosing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub stored: bool,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A persisted result as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAssessment {
    #[serde(flatten)]
    pub result: AssessmentResult,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub service: String,
    pub service_version: String,
}
