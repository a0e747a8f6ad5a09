//! Storage traits: chunk store and vector index.
//!
//! The chunk store is authoritative; the vector index and the knowledge
//! graph hold only chunk IDs and re-fetch on demand. Deleting a source
//! cascades through the store and the caller propagates the deleted chunk
//! IDs to the index and the graph.

use crate::chunk::{Chunk, Source};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One clause of a metadata filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterClause {
    /// Field equals value.
    Eq(String, serde_json::Value),
    /// Field is one of the values.
    In(String, Vec<serde_json::Value>),
}

/// A conjunction of metadata clauses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub clauses: Vec<FilterClause>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.clauses.push(FilterClause::Eq(field.into(), value));
        self
    }

    pub fn is_in(mut self, field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.clauses.push(FilterClause::In(field.into(), values));
        self
    }

    /// Whether a metadata map satisfies every clause.
    pub fn matches(&self, metadata: &serde_json::Map<String, serde_json::Value>) -> bool {
        self.clauses.iter().all(|clause| match clause {
            FilterClause::Eq(field, value) => metadata.get(field) == Some(value),
            FilterClause::In(field, values) => metadata
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Durable mapping from chunk ID to chunk, and source bookkeeping.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Register a source. Fails with [`StoreError::Conflict`] when a source
    /// with the same content hash already exists.
    async fn put_source(&self, source: &Source) -> std::result::Result<(), StoreError>;

    /// Store chunks for an already-registered source. New chunks start in
    /// the pending-embed state.
    async fn put_chunks(&self, chunks: &[Chunk]) -> std::result::Result<(), StoreError>;

    /// Fetch a chunk by ID.
    async fn get(&self, id: &str) -> std::result::Result<Option<Chunk>, StoreError>;

    /// All registered sources.
    async fn sources(&self) -> std::result::Result<Vec<Source>, StoreError>;

    /// Fetch a source by ID.
    async fn get_source(&self, id: &str) -> std::result::Result<Option<Source>, StoreError>;

    /// Chunks of one source, ordered by ordinal.
    async fn chunks_by_source(&self, source_id: &str)
    -> std::result::Result<Vec<Chunk>, StoreError>;

    /// All chunks. Feeds sparse search and index rebuilds.
    async fn all_chunks(&self) -> std::result::Result<Vec<Chunk>, StoreError>;

    /// Delete a source and all of its chunks atomically. Returns the
    /// deleted chunk IDs so the caller can cascade to the vector index and
    /// the knowledge graph.
    async fn delete_source(&self, source_id: &str)
    -> std::result::Result<Vec<String>, StoreError>;

    /// Chunks still waiting for an embedding.
    async fn pending_embed(&self, limit: usize) -> std::result::Result<Vec<Chunk>, StoreError>;

    /// Mark chunks as embedded.
    async fn mark_embedded(&self, ids: &[String]) -> std::result::Result<(), StoreError>;

    /// Total chunk count.
    async fn count(&self) -> std::result::Result<usize, StoreError>;
}

/// Persistent dense index keyed by chunk ID.
///
/// Concurrency contract: safe for many concurrent queries; writes are
/// serialized by the implementation.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Declared dimensionality; must match the gateway's.
    fn dimension(&self) -> usize;

    /// Insert or replace a vector.
    async fn put(
        &self,
        id: &str,
        vector: &[f32],
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<(), StoreError>;

    /// Remove a vector. Returns whether it existed.
    async fn delete(&self, id: &str) -> std::result::Result<bool, StoreError>;

    /// Cosine top-k. Scores are in `[0, 1]`. The filter is a conjunction
    /// over metadata equality and set membership.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> std::result::Result<Vec<(String, f32)>, StoreError>;

    /// Number of stored vectors.
    async fn len(&self) -> std::result::Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = MetadataFilter::new();
        assert!(filter.matches(&meta(&[])));
        assert!(filter.matches(&meta(&[("a", json!(1))])));
    }

    #[test]
    fn eq_and_membership_are_conjunctive() {
        let filter = MetadataFilter::new()
            .eq("lang", json!("en"))
            .is_in("kind", vec![json!("text"), json!("pdf")]);

        assert!(filter.matches(&meta(&[("lang", json!("en")), ("kind", json!("pdf"))])));
        assert!(!filter.matches(&meta(&[("lang", json!("en")), ("kind", json!("code"))])));
        assert!(!filter.matches(&meta(&[("kind", json!("pdf"))])));
    }
}
