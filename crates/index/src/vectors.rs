//! SQLite-backed vector index with an in-memory read cache.
//!
//! Vectors persist as little-endian f32 BLOBs keyed by chunk ID. The whole
//! index is loaded into memory at open; queries scan the cache (many
//! readers in parallel) while writes serialize through a write lock and
//! hit the database first, so a crash never leaves the cache ahead of disk.

use async_trait::async_trait;
use hearthmind_core::error::StoreError;
use hearthmind_core::store::{MetadataFilter, VectorIndex};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::vector::{cosine, decode, encode};

type Metadata = serde_json::Map<String, serde_json::Value>;

/// A persistent cosine-similarity index.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    dimension: usize,
    cache: RwLock<HashMap<String, (Vec<f32>, Metadata)>>,
}

impl SqliteVectorIndex {
    /// Open (or create) the index at the given path and load the cache.
    pub async fn new(path: &str, dimension: usize) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to open SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id       TEXT PRIMARY KEY,
                vector   BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("vectors table: {e}")))?;

        let index = Self {
            pool,
            dimension,
            cache: RwLock::new(HashMap::new()),
        };
        index.load_cache().await?;
        info!(
            vectors = index.cache.read().await.len(),
            dimension, "vector index initialized at {path}"
        );
        Ok(index)
    }

    async fn load_cache(&self) -> Result<(), StoreError> {
        let rows = sqlx::query("SELECT id, vector, metadata FROM vectors")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("load vectors: {e}")))?;

        let mut cache = self.cache.write().await;
        cache.clear();
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
            let blob: Vec<u8> = row
                .try_get("vector")
                .map_err(|e| StoreError::QueryFailed(format!("vector column: {e}")))?;
            let metadata_json: String = row
                .try_get("metadata")
                .map_err(|e| StoreError::QueryFailed(format!("metadata column: {e}")))?;
            let vector = decode(&blob)?;
            if vector.len() != self.dimension {
                // Stale row from an older embedding model; skip it. The
                // chunk stays pending and gets re-embedded on demand.
                debug!(id = %id, "skipping vector with stale dimension {}", vector.len());
                continue;
            }
            cache.insert(
                id,
                (vector, serde_json::from_str(&metadata_json).unwrap_or_default()),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn put(
        &self,
        id: &str,
        vector: &[f32],
        metadata: Metadata,
    ) -> Result<(), StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        // Hold the write lock across the DB write so concurrent writers
        // serialize and the cache mirrors the durable state.
        let mut cache = self.cache.write().await;
        sqlx::query("INSERT OR REPLACE INTO vectors (id, vector, metadata) VALUES (?, ?, ?)")
            .bind(id)
            .bind(encode(vector))
            .bind(serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".into()))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("insert vector: {e}")))?;
        cache.insert(id.to_string(), (vector.to_vec(), metadata));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut cache = self.cache.write().await;
        sqlx::query("DELETE FROM vectors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("delete vector: {e}")))?;
        Ok(cache.remove(id).is_some())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let cache = self.cache.read().await;
        let mut scored: Vec<(String, f32)> = cache
            .iter()
            .filter(|(_, (_, metadata))| filter.map(|f| f.matches(metadata)).unwrap_or(true))
            .map(|(id, (stored, _))| (id.clone(), cosine(vector, stored)))
            .collect();

        // Stable ordering: score desc, then ID for deterministic ties.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.cache.read().await.len())
    }
}
