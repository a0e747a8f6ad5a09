//! Chunk store and vector index.
//!
//! The chunk store is the authoritative record of ingested sources and
//! their chunks; the vector index holds dense embeddings keyed by chunk ID.
//! On startup the two are reconciled: chunks without a vector stay in the
//! pending-embed state and are embedded on demand via [`sync_pending`].

pub mod chunking;
pub mod chunks;
pub mod vector;
pub mod vectors;

pub use chunking::split_text;
pub use chunks::SqliteChunkStore;
pub use vectors::SqliteVectorIndex;

use hearthmind_core::error::StoreError;
use hearthmind_core::{ChunkStore, Gateway, VectorIndex};
use tracing::{debug, warn};

/// Embed every pending chunk and store its vector. Returns how many chunks
/// were embedded. Chunks whose embedding fails stay pending and are retried
/// on the next call.
pub async fn sync_pending(
    store: &dyn ChunkStore,
    index: &dyn VectorIndex,
    gateway: &dyn Gateway,
    batch: usize,
) -> Result<usize, StoreError> {
    let mut embedded_total = 0;
    loop {
        let pending = store.pending_embed(batch).await?;
        if pending.is_empty() {
            return Ok(embedded_total);
        }

        let mut done = Vec::with_capacity(pending.len());
        for chunk in &pending {
            match gateway.embed(&chunk.text).await {
                Ok(vector) => {
                    let mut metadata = chunk.metadata.clone();
                    metadata.insert(
                        "source_id".into(),
                        serde_json::Value::String(chunk.source_id.clone()),
                    );
                    index.put(&chunk.id, &vector, metadata).await?;
                    done.push(chunk.id.clone());
                }
                Err(e) => {
                    warn!(chunk = %chunk.id, "embedding failed, chunk stays pending: {e}");
                }
            }
        }

        if done.is_empty() {
            // Backend is down; give up for now rather than spinning.
            return Ok(embedded_total);
        }
        store.mark_embedded(&done).await?;
        embedded_total += done.len();
        debug!(count = done.len(), "embedded pending chunks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_core::chunk::{Chunk, Source, SourceKind};
    use hearthmind_gateway::testing::StaticGateway;

    #[tokio::test]
    async fn sync_embeds_and_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChunkStore::new(dir.path().join("chunks.db").to_str().unwrap())
            .await
            .unwrap();
        let gateway = StaticGateway::new(vec![]);
        let index = SqliteVectorIndex::new(
            dir.path().join("vectors.db").to_str().unwrap(),
            gateway.dimension(),
        )
        .await
        .unwrap();

        let source = Source::new("a.txt", SourceKind::Text, "text/plain", "hash-a");
        store.put_source(&source).await.unwrap();
        store
            .put_chunks(&[
                Chunk::new(&source.id, 0, "first chunk"),
                Chunk::new(&source.id, 1, "second chunk"),
            ])
            .await
            .unwrap();

        let n = sync_pending(&store, &index, &gateway, 16).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(index.len().await.unwrap(), 2);
        assert!(store.pending_embed(16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_down_leaves_chunks_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChunkStore::new(dir.path().join("chunks.db").to_str().unwrap())
            .await
            .unwrap();
        let gateway = StaticGateway::unavailable();
        let index = SqliteVectorIndex::new(
            dir.path().join("vectors.db").to_str().unwrap(),
            gateway.dimension(),
        )
        .await
        .unwrap();

        let source = Source::new("a.txt", SourceKind::Text, "text/plain", "hash-a");
        store.put_source(&source).await.unwrap();
        store
            .put_chunks(&[Chunk::new(&source.id, 0, "first chunk")])
            .await
            .unwrap();

        let n = sync_pending(&store, &index, &gateway, 16).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.pending_embed(16).await.unwrap().len(), 1);
    }
}
