//! SQLite chunk store.
//!
//! Two tables: `sources` and `chunks`, with `(source_id, ordinal)` unique
//! and a content-hash guard against duplicate ingest. Deleting a source
//! removes its chunks in the same transaction and returns the removed
//! chunk IDs so the caller can cascade into the vector index and the
//! knowledge graph.

use async_trait::async_trait;
use chrono::Utc;
use hearthmind_core::chunk::{Chunk, Source, SourceKind};
use hearthmind_core::error::StoreError;
use hearthmind_core::store::ChunkStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed chunk store.
pub struct SqliteChunkStore {
    pool: SqlitePool,
}

impl SqliteChunkStore {
    /// Open (or create) the store at the given path. Pass `":memory:"` for
    /// an ephemeral database in tests.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("chunk store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id           TEXT PRIMARY KEY,
                uri          TEXT NOT NULL,
                kind         TEXT NOT NULL,
                mime         TEXT NOT NULL,
                ingest_time  TEXT NOT NULL,
                content_hash TEXT UNIQUE NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sources table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id        TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                ordinal   INTEGER NOT NULL,
                text      TEXT NOT NULL,
                page      INTEGER,
                metadata  TEXT NOT NULL DEFAULT '{}',
                embedded  INTEGER NOT NULL DEFAULT 0,
                UNIQUE (source_id, ordinal)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chunks table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("chunks index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_pending ON chunks(embedded) WHERE embedded = 0")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("pending index: {e}")))?;

        debug!("chunk store migrations complete");
        Ok(())
    }

    fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source, StoreError> {
        let kind_str: String = row
            .try_get("kind")
            .map_err(|e| StoreError::QueryFailed(format!("kind column: {e}")))?;
        let kind: SourceKind =
            serde_json::from_value(serde_json::Value::String(kind_str.clone()))
                .unwrap_or(SourceKind::Text);
        let ingest_str: String = row
            .try_get("ingest_time")
            .map_err(|e| StoreError::QueryFailed(format!("ingest_time column: {e}")))?;
        let ingest_time = chrono::DateTime::parse_from_rfc3339(&ingest_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Source {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            uri: row
                .try_get("uri")
                .map_err(|e| StoreError::QueryFailed(format!("uri column: {e}")))?,
            kind,
            mime: row
                .try_get("mime")
                .map_err(|e| StoreError::QueryFailed(format!("mime column: {e}")))?,
            ingest_time,
            content_hash: row
                .try_get("content_hash")
                .map_err(|e| StoreError::QueryFailed(format!("content_hash column: {e}")))?,
        })
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, StoreError> {
        let metadata_json: String = row
            .try_get("metadata")
            .map_err(|e| StoreError::QueryFailed(format!("metadata column: {e}")))?;
        let page: Option<i64> = row.try_get("page").ok().flatten();

        Ok(Chunk {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            source_id: row
                .try_get("source_id")
                .map_err(|e| StoreError::QueryFailed(format!("source_id column: {e}")))?,
            ordinal: row
                .try_get::<i64, _>("ordinal")
                .map_err(|e| StoreError::QueryFailed(format!("ordinal column: {e}")))?
                as u32,
            text: row
                .try_get("text")
                .map_err(|e| StoreError::QueryFailed(format!("text column: {e}")))?,
            page: page.map(|p| p as u32),
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            embedding: None,
        })
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn put_source(&self, source: &Source) -> Result<(), StoreError> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT uri FROM sources WHERE content_hash = ?")
                .bind(&source.content_hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("hash lookup: {e}")))?;

        if let Some(uri) = existing {
            return Err(StoreError::Conflict(format!(
                "content already ingested as '{uri}'"
            )));
        }

        sqlx::query(
            "INSERT INTO sources (id, uri, kind, mime, ingest_time, content_hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&source.id)
        .bind(&source.uri)
        .bind(source.kind.to_string())
        .bind(&source.mime)
        .bind(source.ingest_time.to_rfc3339())
        .bind(&source.content_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert source: {e}")))?;

        debug!(source = %source.id, uri = %source.uri, "source registered");
        Ok(())
    }

    async fn put_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, source_id, ordinal, text, page, metadata, embedded) \
                 VALUES (?, ?, ?, ?, ?, ?, 0)",
            )
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(chunk.page.map(|p| p as i64))
            .bind(serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".into()))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("insert chunk {}: {e}", chunk.id)))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get chunk: {e}")))?;
        row.as_ref().map(Self::row_to_chunk).transpose()
    }

    async fn sources(&self) -> Result<Vec<Source>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sources ORDER BY ingest_time DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("list sources: {e}")))?;
        rows.iter().map(Self::row_to_source).collect()
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>, StoreError> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get source: {e}")))?;
        row.as_ref().map(Self::row_to_source).transpose()
    }

    async fn chunks_by_source(&self, source_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE source_id = ? ORDER BY ordinal")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("chunks by source: {e}")))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chunks ORDER BY source_id, ordinal")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("all chunks: {e}")))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn delete_source(&self, source_id: &str) -> Result<Vec<String>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE source_id = ?")
                .bind(source_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("chunk ids: {e}")))?;

        let deleted = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("delete source: {e}")))?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("source {source_id}")));
        }

        // Foreign key cascade removes the chunks; issue the delete
        // explicitly so the store also works with foreign_keys off.
        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("delete chunks: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;

        info!(source = source_id, chunks = ids.len(), "source deleted");
        Ok(ids)
    }

    async fn pending_embed(&self, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE embedded = 0 ORDER BY rowid LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("pending chunks: {e}")))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn mark_embedded(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;
        for id in ids {
            sqlx::query("UPDATE chunks SET embedded = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("mark embedded: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("count: {e}")))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChunkStore::new(dir.path().join("chunks.db").to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_source(hash: &str) -> Source {
        Source::new("docs/policy.txt", SourceKind::Text, "text/plain", hash)
    }

    #[tokio::test]
    async fn duplicate_content_hash_is_conflict() {
        let (_dir, store) = store().await;
        store.put_source(&sample_source("same-hash")).await.unwrap();

        let err = store
            .put_source(&sample_source("same-hash"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunks_round_trip_ordered_by_ordinal() {
        let (_dir, store) = store().await;
        let source = sample_source("h1");
        store.put_source(&source).await.unwrap();

        store
            .put_chunks(&[
                Chunk::new(&source.id, 1, "second").with_page(2),
                Chunk::new(&source.id, 0, "first"),
            ])
            .await
            .unwrap();

        let chunks = store.chunks_by_source(&source.id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "first");
        assert_eq!(chunks[1].page, Some(2));

        let fetched = store.get(&chunks[0].id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "first");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ordinal_rejected() {
        let (_dir, store) = store().await;
        let source = sample_source("h1");
        store.put_source(&source).await.unwrap();

        store
            .put_chunks(&[Chunk::new(&source.id, 0, "a")])
            .await
            .unwrap();
        let err = store
            .put_chunks(&[Chunk::new(&source.id, 0, "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn delete_source_cascades_and_reports_chunk_ids() {
        let (_dir, store) = store().await;
        let source = sample_source("h1");
        store.put_source(&source).await.unwrap();
        store
            .put_chunks(&[
                Chunk::new(&source.id, 0, "a"),
                Chunk::new(&source.id, 1, "b"),
            ])
            .await
            .unwrap();

        let deleted = store.delete_source(&source.id).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.sources().await.unwrap().is_empty());

        let err = store.delete_source(&source.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_embed_lifecycle() {
        let (_dir, store) = store().await;
        let source = sample_source("h1");
        store.put_source(&source).await.unwrap();
        store
            .put_chunks(&[
                Chunk::new(&source.id, 0, "a"),
                Chunk::new(&source.id, 1, "b"),
            ])
            .await
            .unwrap();

        let pending = store.pending_embed(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        store
            .mark_embedded(&[pending[0].id.clone()])
            .await
            .unwrap();
        assert_eq!(store.pending_embed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");
        let source = sample_source("h1");
        {
            let store = SqliteChunkStore::new(path.to_str().unwrap()).await.unwrap();
            store.put_source(&source).await.unwrap();
            store
                .put_chunks(&[Chunk::new(&source.id, 0, "persisted")])
                .await
                .unwrap();
        }

        let store = SqliteChunkStore::new(path.to_str().unwrap()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let src = store.get_source(&source.id).await.unwrap().unwrap();
        assert_eq!(src.content_hash, "h1");
    }
}
