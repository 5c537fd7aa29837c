use assessment_core::{AssessmentResult, StorageStatus, StoredAssessment};
use chrono::{DateTime, Utc};

/// Hard cap on `recent` query sizes regardless of caller input.
pub const MAX_RECENT_LIMIT: i64 = 50;

/// Result of a `recent` query. Degrades to an empty list plus an error
/// marker when the backing store is unavailable.
#[derive(Debug, Clone)]
pub struct RecentResults {
    pub results: Vec<StoredAssessment>,
    pub error: Option<String>,
}

/// Append-only store for validated assessment results. Persistence is
/// best-effort: a down backend produces soft failures, never errors that
/// would fail an otherwise successful run.
#[derive(Clone)]
pub struct ResultStore {
    pool: sqlx::SqlitePool,
    service: String,
    service_version: String,
}

impl ResultStore {
    pub fn new(pool: sqlx::SqlitePool, service: String, service_version: String) -> Self {
        Self {
            pool,
            service,
            service_version,
        }
    }

    /// Create the assessments table if it does not exist.
    pub async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS assessments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                score INTEGER NOT NULL,
                result_json TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL,
                service TEXT NOT NULL,
                service_version TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist one result. Returns a soft-failure status instead of an
    /// error when the backend is unavailable.
    pub async fn append(&self, result: &AssessmentResult) -> StorageStatus {
        match self.insert(result).await {
            Ok(id) => StorageStatus {
                stored: true,
                id: Some(id),
                reason: None,
            },
            Err(e) => {
                tracing::warn!("Failed to persist assessment result: {}", e);
                StorageStatus {
                    stored: false,
                    id: None,
                    reason: Some(e.to_string()),
                }
            }
        }
    }

    async fn insert(
        &self,
        result: &AssessmentResult,
    ) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
        let now = Utc::now();
        let result_json = serde_json::to_string(result)?;

        let done = sqlx::query(
            "INSERT INTO assessments
                (score, result_json, timestamp, created_at, service, service_version)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(result.score)
        .bind(&result_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&self.service)
        .bind(&self.service_version)
        .execute(&self.pool)
        .await?;

        Ok(done.last_insert_rowid())
    }

    /// Most recently stored result, or None when nothing is stored or the
    /// backend is unavailable.
    pub async fn latest(&self) -> Option<StoredAssessment> {
        self.recent(1).await.results.into_iter().next()
    }

    /// Up to `limit` results, newest first. The limit is clamped to
    /// `MAX_RECENT_LIMIT` regardless of caller input.
    pub async fn recent(&self, limit: i64) -> RecentResults {
        let clamped = limit.clamp(1, MAX_RECENT_LIMIT);

        let rows: Result<Vec<(String, String, String, String, String)>, sqlx::Error> =
            sqlx::query_as(
                "SELECT result_json, timestamp, created_at, service, service_version
                 FROM assessments ORDER BY id DESC LIMIT ?",
            )
            .bind(clamped)
            .fetch_all(&self.pool)
            .await;

        match rows {
            Ok(rows) => {
                let results = rows
                    .into_iter()
                    .filter_map(|(json, timestamp, created_at, service, service_version)| {
                        let result: AssessmentResult = serde_json::from_str(&json).ok()?;
                        Some(StoredAssessment {
                            result,
                            timestamp: parse_rfc3339(&timestamp)?,
                            created_at: parse_rfc3339(&created_at)?,
                            service,
                            service_version,
                        })
                    })
                    .collect();
                RecentResults {
                    results,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to query recent assessments: {}", e);
                RecentResults {
                    results: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
