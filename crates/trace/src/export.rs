//! Span exporters: console and embedded SQLite.

use crate::model::{Span, SpanStatus};
use crate::TraceError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Where finished spans go.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Exporter name (e.g. "console", "sqlite").
    fn name(&self) -> &str;

    /// Export a batch of finished spans.
    async fn export(&self, spans: &[Span]) -> Result<(), TraceError>;
}

/// Writes one diagnostic line per span.
pub struct ConsoleExporter;

#[async_trait]
impl SpanExporter for ConsoleExporter {
    fn name(&self) -> &str {
        "console"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), TraceError> {
        for span in spans {
            let status = match span.status {
                SpanStatus::Ok => "ok",
                SpanStatus::Error => "error",
            };
            tracing::debug!(
                trace_id = %span.context.trace_id,
                span_id = %span.context.span_id,
                duration_ms = span.duration_ms(),
                status,
                "SPAN {}",
                span.name
            );
        }
        Ok(())
    }
}

/// Persists spans into a SQLite database under the traces directory.
pub struct SqliteExporter {
    pool: SqlitePool,
}

impl SqliteExporter {
    /// Open (or create) the trace database at the given path.
    pub async fn new(path: &str) -> Result<Self, TraceError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| TraceError::ExportFailed(format!("invalid sqlite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| TraceError::ExportFailed(format!("failed to open trace db: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spans (
                trace_id    TEXT NOT NULL,
                span_id     TEXT NOT NULL,
                parent_id   TEXT,
                name        TEXT NOT NULL,
                kind        TEXT NOT NULL,
                status      TEXT NOT NULL,
                start_ts    TEXT NOT NULL,
                end_ts      TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                attributes  TEXT NOT NULL DEFAULT '{}',
                events      TEXT NOT NULL DEFAULT '[]',
                error       TEXT,
                PRIMARY KEY (trace_id, span_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| TraceError::ExportFailed(format!("spans table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_spans_start ON spans(start_ts DESC)")
            .execute(&pool)
            .await
            .map_err(|e| TraceError::ExportFailed(format!("spans index: {e}")))?;

        Ok(Self { pool })
    }

    /// The most recently started spans, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Span>, TraceError> {
        let rows = sqlx::query(
            "SELECT trace_id, span_id, parent_id, name, kind, status, start_ts, end_ts, \
             attributes, events, error FROM spans ORDER BY start_ts DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TraceError::ExportFailed(format!("query spans: {e}")))?;

        rows.iter().map(Self::row_to_span).collect()
    }

    fn row_to_span(row: &sqlx::sqlite::SqliteRow) -> Result<Span, TraceError> {
        let get = |col: &str| -> Result<String, TraceError> {
            row.try_get::<String, _>(col)
                .map_err(|e| TraceError::ExportFailed(format!("{col} column: {e}")))
        };

        let kind = serde_json::from_value(serde_json::Value::String(get("kind")?))?;
        let status = serde_json::from_value(serde_json::Value::String(get("status")?))?;
        let start = chrono::DateTime::parse_from_rfc3339(&get("start_ts")?)
            .map_err(|e| TraceError::ExportFailed(format!("start_ts: {e}")))?
            .with_timezone(&chrono::Utc);
        let end = row
            .try_get::<Option<String>, _>("end_ts")
            .ok()
            .flatten()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        Ok(Span {
            context: crate::model::SpanContext {
                trace_id: get("trace_id")?,
                span_id: get("span_id")?,
                parent_id: row.try_get("parent_id").ok().flatten(),
            },
            name: get("name")?,
            kind,
            status,
            start,
            end,
            attributes: serde_json::from_str(&get("attributes")?).unwrap_or_default(),
            events: serde_json::from_str(&get("events")?).unwrap_or_default(),
            error: row.try_get("error").ok().flatten(),
        })
    }
}

#[async_trait]
impl SpanExporter for SqliteExporter {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), TraceError> {
        for span in spans {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO spans
                (trace_id, span_id, parent_id, name, kind, status, start_ts, end_ts,
                 duration_ms, attributes, events, error)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&span.context.trace_id)
            .bind(&span.context.span_id)
            .bind(&span.context.parent_id)
            .bind(&span.name)
            .bind(span.kind.to_string())
            .bind(match span.status {
                SpanStatus::Ok => "ok",
                SpanStatus::Error => "error",
            })
            .bind(span.start.to_rfc3339())
            .bind(span.end.map(|e| e.to_rfc3339()))
            .bind(span.duration_ms())
            .bind(serde_json::to_string(&span.attributes)?)
            .bind(serde_json::to_string(&span.events)?)
            .bind(&span.error)
            .execute(&self.pool)
            .await
            .map_err(|e| TraceError::ExportFailed(format!("insert span: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SpanContext, SpanKind};

    #[tokio::test]
    async fn sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.db");
        let exporter = SqliteExporter::new(path.to_str().unwrap()).await.unwrap();

        let mut span = Span::start(SpanContext::root(), "retrieve", SpanKind::Internal);
        span.set_attr("query", serde_json::json!("annual leave"));
        span.finish();

        exporter.export(std::slice::from_ref(&span)).await.unwrap();

        let recent = exporter.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "retrieve");
        assert_eq!(recent[0].context.trace_id, span.context.trace_id);
        assert_eq!(recent[0].attributes["query"], "annual leave");
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.db");
        let exporter = SqliteExporter::new(path.to_str().unwrap()).await.unwrap();

        for i in 0..5 {
            let mut span = Span::start(SpanContext::root(), format!("op-{i}"), SpanKind::Internal);
            span.finish();
            exporter.export(&[span]).await.unwrap();
        }

        assert_eq!(exporter.recent(3).await.unwrap().len(), 3);
    }
}
