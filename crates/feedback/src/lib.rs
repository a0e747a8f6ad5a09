//! Feedback capture, aggregation, and learned knobs.
//!
//! Feedback records persist keyed by a normalized query hash. Aggregation
//! produces positive/negative rates and per-dimension averages; learned
//! knobs nudge generation and retrieval defaults within bounded ranges
//! (temperature ±0.3, max_tokens −200..+500, retrieval k −2..+5).

use hearthmind_core::error::MemoryError;
use hearthmind_core::feedback::{Feedback, FeedbackKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// Bounded deltas applied to generation/retrieval defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnedKnobs {
    /// Added to the base temperature, within `[-0.3, 0.3]`.
    pub temperature_delta: f32,

    /// Added to the base max_tokens, within `[-200, 500]`.
    pub max_tokens_delta: i32,

    /// Added to the base retrieval k, within `[-2, 5]`.
    pub retrieval_k_delta: i32,
}

impl LearnedKnobs {
    fn clamp(mut self) -> Self {
        self.temperature_delta = self.temperature_delta.clamp(-0.3, 0.3);
        self.max_tokens_delta = self.max_tokens_delta.clamp(-200, 500);
        self.retrieval_k_delta = self.retrieval_k_delta.clamp(-2, 5);
        self
    }
}

/// Aggregated feedback statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub total: usize,
    pub positive_rate: f64,
    pub negative_rate: f64,
    pub avg_by_dim: HashMap<String, f64>,
    pub common_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Persistent feedback store.
pub struct FeedbackStore {
    pool: SqlitePool,
}

/// Lowercase, collapse whitespace, hash. Near-identical queries share a
/// bucket.
pub fn normalized_query_hash(query: &str) -> String {
    let normalized = query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

impl FeedbackStore {
    /// Open (or create) the feedback database.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("failed to open SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id         TEXT PRIMARY KEY,
                query_hash TEXT NOT NULL,
                ts         TEXT NOT NULL,
                record     TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("feedback table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feedback_hash ON feedback(query_hash)")
            .execute(&pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("feedback index: {e}")))?;

        info!("feedback store initialized at {path}");
        Ok(Self { pool })
    }

    /// Persist one feedback record. Returns its ID.
    pub async fn record(&self, feedback: &Feedback) -> Result<String, MemoryError> {
        let record = serde_json::to_string(feedback)
            .map_err(|e| MemoryError::Storage(format!("serialize feedback: {e}")))?;
        sqlx::query("INSERT INTO feedback (id, query_hash, ts, record) VALUES (?, ?, ?, ?)")
            .bind(&feedback.id)
            .bind(normalized_query_hash(&feedback.query))
            .bind(feedback.ts.to_rfc3339())
            .bind(record)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("insert feedback: {e}")))?;
        debug!(kind = %feedback.kind, "feedback recorded");
        Ok(feedback.id.clone())
    }

    /// All records, newest first.
    pub async fn all(&self) -> Result<Vec<Feedback>, MemoryError> {
        let rows = sqlx::query("SELECT record FROM feedback ORDER BY ts DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("all feedback: {e}")))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                row.try_get::<String, _>("record")
                    .ok()
                    .and_then(|raw| serde_json::from_str(&raw).ok())
            })
            .collect())
    }

    /// Records for the same normalized query.
    pub async fn for_query(&self, query: &str) -> Result<Vec<Feedback>, MemoryError> {
        let rows = sqlx::query("SELECT record FROM feedback WHERE query_hash = ? ORDER BY ts DESC")
            .bind(normalized_query_hash(query))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("feedback by query: {e}")))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                row.try_get::<String, _>("record")
                    .ok()
                    .and_then(|raw| serde_json::from_str(&raw).ok())
            })
            .collect())
    }

    /// Aggregate all recorded feedback.
    pub async fn summarize(&self) -> Result<FeedbackSummary, MemoryError> {
        let records = self.all().await?;
        Ok(summarize(&records))
    }

    /// Learned knobs from the most recent feedback (newest first, capped at
    /// 50 records). Negative feedback raises the temperature penalty and
    /// retrieval k; positive feedback reinforces the recent settings.
    pub async fn knobs(&self) -> Result<LearnedKnobs, MemoryError> {
        let records = self.all().await?;
        Ok(learn_knobs(&records))
    }
}

/// Pure aggregation over a record set.
pub fn summarize(records: &[Feedback]) -> FeedbackSummary {
    if records.is_empty() {
        return FeedbackSummary::default();
    }
    let total = records.len();
    let positive = records.iter().filter(|f| f.kind.is_positive()).count();
    let negative = records.iter().filter(|f| f.kind.is_negative()).count();

    let mut dim_sums: HashMap<String, (f64, usize)> = HashMap::new();
    for record in records {
        for (dim, score) in &record.dimensions {
            let entry = dim_sums.entry(dim.clone()).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    let avg_by_dim: HashMap<String, f64> = dim_sums
        .into_iter()
        .map(|(dim, (sum, n))| (dim, sum / n as f64))
        .collect();

    let mut common_issues = Vec::new();
    let mut recommendations = Vec::new();
    for (dim, avg) in &avg_by_dim {
        if *avg < 0.5 {
            common_issues.push(format!("low {dim} ({avg:.2})"));
            recommendations.push(match dim.as_str() {
                "accuracy" => "Ground answers more tightly in retrieved sources".to_string(),
                "completeness" => "Retrieve more context before answering".to_string(),
                "clarity" => "Prefer shorter sentences and explicit structure".to_string(),
                _ => format!("Review prompts affecting {dim}"),
            });
        }
    }
    common_issues.sort();
    recommendations.sort();

    FeedbackSummary {
        total,
        positive_rate: positive as f64 / total as f64,
        negative_rate: negative as f64 / total as f64,
        avg_by_dim,
        common_issues,
        recommendations,
    }
}

/// Pure knob learning over a record set (newest first).
pub fn learn_knobs(records: &[Feedback]) -> LearnedKnobs {
    let mut knobs = LearnedKnobs::default();
    for record in records.iter().take(50) {
        match record.kind {
            kind if kind.is_negative() => {
                // Cool down sampling and widen evidence.
                knobs.temperature_delta -= 0.05;
                knobs.retrieval_k_delta += 1;
                if record.kind == FeedbackKind::Regenerate {
                    knobs.max_tokens_delta += 50;
                }
            }
            kind if kind.is_positive() => {
                // Drift back toward the recent settings.
                knobs.temperature_delta *= 0.8;
            }
            FeedbackKind::Correction => {
                knobs.temperature_delta -= 0.1;
            }
            _ => {}
        }
    }
    knobs.clamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_core::feedback::FeedbackKind;

    #[test]
    fn query_hash_normalizes_case_and_whitespace() {
        assert_eq!(
            normalized_query_hash("How many  days of LEAVE?"),
            normalized_query_hash("how many days of leave?")
        );
        assert_ne!(
            normalized_query_hash("leave days"),
            normalized_query_hash("sick days")
        );
    }

    #[test]
    fn summary_rates_and_dimensions() {
        let records = vec![
            Feedback::new("q", "r", FeedbackKind::Positive).with_dimension("accuracy", 0.9),
            Feedback::new("q", "r", FeedbackKind::Negative).with_dimension("accuracy", 0.3),
            Feedback::new("q", "r", FeedbackKind::Accept),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.total, 3);
        assert!((summary.positive_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.negative_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((summary.avg_by_dim["accuracy"] - 0.6).abs() < 1e-9);
        assert!(summary.common_issues.is_empty());
    }

    #[test]
    fn low_dimension_produces_issue_and_recommendation() {
        let records =
            vec![Feedback::new("q", "r", FeedbackKind::Negative).with_dimension("accuracy", 0.2)];
        let summary = summarize(&records);
        assert_eq!(summary.common_issues.len(), 1);
        assert!(summary.recommendations[0].contains("retrieved sources"));
    }

    #[test]
    fn negative_feedback_moves_knobs_within_bounds() {
        let records: Vec<Feedback> = (0..100)
            .map(|_| Feedback::new("q", "r", FeedbackKind::Negative))
            .collect();
        let knobs = learn_knobs(&records);
        assert!((knobs.temperature_delta - -0.3).abs() < 1e-6);
        assert_eq!(knobs.retrieval_k_delta, 5);
    }

    #[test]
    fn positive_feedback_decays_temperature_delta() {
        let mut records: Vec<Feedback> =
            vec![Feedback::new("q", "r", FeedbackKind::Negative); 2];
        records.extend(vec![Feedback::new("q", "r", FeedbackKind::Positive); 3]);
        let knobs = learn_knobs(&records);
        // Two negatives push to -0.1; three positives decay it by 0.8 each.
        assert!(knobs.temperature_delta > -0.06);
        assert!(knobs.temperature_delta < 0.0);
    }

    #[tokio::test]
    async fn store_round_trip_and_query_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("feedback.db").to_str().unwrap())
            .await
            .unwrap();

        let id = store
            .record(
                &Feedback::new("How many leave days?", "20 days", FeedbackKind::Positive)
                    .with_comment("spot on"),
            )
            .await
            .unwrap();
        assert!(!id.is_empty());
        store
            .record(&Feedback::new("unrelated question", "answer", FeedbackKind::Negative))
            .await
            .unwrap();

        let bucket = store.for_query("how many LEAVE days?").await.unwrap();
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].comment.as_deref(), Some("spot on"));

        let summary = store.summarize().await.unwrap();
        assert_eq!(summary.total, 2);
    }
}
