//! Retrieval domain types: results, citations, options.
//!
//! Retrieval results are transient — their lifetime is at most one request.
//! Scores are not stable across calls (they depend on live index state) but
//! a single call is deterministic.

use crate::store::MetadataFilter;
use serde::{Deserialize, Serialize};

/// Which search path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Dense,
    Sparse,
    Graph,
}

/// Search strategy for a retrieval call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Dense,
    Sparse,
    #[default]
    Hybrid,
}

/// One scored candidate from a retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The matched chunk.
    pub chunk_id: String,

    /// Fused relevance score.
    pub score: f32,

    /// Which search path found it.
    pub match_kind: MatchKind,

    /// Owning source.
    pub source_id: String,

    /// Cross-encoder score when reranking ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// A citation anchor emitted into packed context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Anchor index as it appears in the packed context (`[1]`, `[2]`, …).
    pub index: usize,

    /// Cited chunk.
    pub chunk_id: String,

    /// Owning source.
    pub source_id: String,

    /// Optional character span within the chunk text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
}

/// The response of a retrieval call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResponse {
    /// Ranked results.
    pub results: Vec<RetrievalResult>,

    /// Chunk texts concatenated in rank order with citation anchors,
    /// bounded by the token budget.
    pub packed_context: String,

    /// Citation anchors in the packed context.
    pub citations: Vec<Citation>,

    /// Estimated token cost of `packed_context`.
    pub token_est: usize,

    /// Subsystems that failed non-critically during this call (e.g.
    /// "dense_search", "rerank"). Empty on a clean run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

impl RetrievalResponse {
    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Options for a retrieval call.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// How many results to return.
    pub top_k: usize,

    /// Metadata filter conjunction.
    pub filter: Option<MetadataFilter>,

    /// Dense, sparse, or hybrid.
    pub strategy: SearchStrategy,

    /// Run the cross-encoder rerank pass.
    pub rerank: bool,

    /// Expand context through the knowledge graph.
    pub expand_graph: bool,

    /// Treat an empty corpus as an error instead of an empty response.
    pub strict: bool,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            filter: None,
            strategy: SearchStrategy::Hybrid,
            rerank: true,
            expand_graph: false,
            strict: false,
        }
    }
}
