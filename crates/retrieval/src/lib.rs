//! The retrieval engine.
//!
//! Hybrid retrieval: optional query rewrites, dense vector search and
//! sparse BM25 fused with reciprocal-rank fusion, an optional cross-encoder
//! rerank via the generation gateway, optional knowledge-graph expansion,
//! and citation-anchored context packing. A single call is deterministic;
//! ranks are not stable across calls because they depend on live index
//! state.

pub mod pack;
pub mod rewrite;
pub mod sparse;

use hearthmind_core::chunk::Chunk;
use hearthmind_core::error::{Error, StoreError};
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::retrieval::{
    MatchKind, RetrievalResponse, RetrievalResult, RetrieveOptions, SearchStrategy,
};
use hearthmind_core::{CancellationToken, ChunkStore, VectorIndex};
use hearthmind_config::RetrievalConfig;
use hearthmind_graph::KnowledgeGraph;
use sparse::Bm25;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reciprocal-rank fusion constant.
const RRF_K: f64 = 60.0;
/// Fusion weight for dense ranks in hybrid mode.
const DENSE_WEIGHT: f64 = 0.7;
/// Fusion weight for sparse ranks in hybrid mode.
const SPARSE_WEIGHT: f64 = 0.3;
/// Fused weight given to graph-expansion chunks.
const GRAPH_WEIGHT: f64 = 0.1;
/// Subgraph expansion depth.
const GRAPH_DEPTH: usize = 2;
/// At most this many matched entities are expanded.
const GRAPH_ENTITY_CAP: usize = 3;

struct Candidate {
    chunk: Chunk,
    fused: f64,
    match_kind: MatchKind,
    rerank: Option<f32>,
}

/// The retrieval engine.
pub struct RetrievalEngine {
    store: Arc<dyn ChunkStore>,
    index: Arc<dyn VectorIndex>,
    gateway: Arc<dyn Gateway>,
    graph: Option<Arc<KnowledgeGraph>>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        index: Arc<dyn VectorIndex>,
        gateway: Arc<dyn Gateway>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            gateway,
            graph: None,
            config,
        }
    }

    /// Attach a knowledge graph for `expand_graph` calls.
    pub fn with_graph(mut self, graph: Arc<KnowledgeGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Run a retrieval.
    pub async fn retrieve(
        &self,
        query: &str,
        opts: &RetrieveOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.store.count().await.map_err(Error::Store)? == 0 {
            if opts.strict {
                return Err(Error::Store(StoreError::NotFound("corpus is empty".into())));
            }
            return Ok(RetrievalResponse::default());
        }
        if opts.top_k == 0 {
            return Ok(RetrievalResponse::default());
        }

        let candidate_count = opts.top_k * 3;
        let mut degraded: Vec<String> = Vec::new();

        // Query rewrites are additive: the original always searches too.
        let mut queries = vec![query.to_string()];
        if self.config.rewrite {
            queries.extend(rewrite::rewrites(self.gateway.as_ref(), query).await);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Sparse corpus, filtered up front so both paths see the same view.
        let all_chunks: Vec<Chunk> = self
            .store
            .all_chunks()
            .await
            .map_err(Error::Store)?
            .into_iter()
            .filter(|c| {
                opts.filter
                    .as_ref()
                    .map(|f| f.matches(&c.metadata))
                    .unwrap_or(true)
            })
            .collect();

        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        // Dense search.
        if opts.strategy != SearchStrategy::Sparse {
            let weight = if opts.strategy == SearchStrategy::Dense {
                1.0
            } else {
                DENSE_WEIGHT
            };
            match self
                .dense_ranks(&queries, candidate_count, opts, weight, &mut candidates)
                .await
            {
                Ok(()) => {}
                Err(e) if opts.strategy == SearchStrategy::Dense => return Err(e),
                Err(e) => {
                    warn!("dense search degraded, continuing sparse-only: {e}");
                    degraded.push("dense_search".into());
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Sparse search.
        if opts.strategy != SearchStrategy::Dense {
            let weight = if opts.strategy == SearchStrategy::Sparse {
                1.0
            } else {
                SPARSE_WEIGHT
            };
            let bm25 = Bm25::new(&all_chunks);
            for q in &queries {
                for (rank, (pos, _)) in bm25.search(q, candidate_count).iter().enumerate() {
                    let chunk = &all_chunks[*pos];
                    let bump = weight / (RRF_K + rank as f64 + 1.0);
                    candidates
                        .entry(chunk.id.clone())
                        .and_modify(|c| c.fused += bump)
                        .or_insert(Candidate {
                            chunk: chunk.clone(),
                            fused: bump,
                            match_kind: MatchKind::Sparse,
                            rerank: None,
                        });
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Rerank the head of the fused list.
        let mut ranked: Vec<Candidate> = candidates.into_values().collect();
        sort_candidates(&mut ranked);
        if opts.rerank {
            let head = ranked.len().min(20).min(candidate_count);
            if let Err(e) = self.rerank(query, &mut ranked[..head]).await {
                debug!("rerank degraded: {e}");
                degraded.push("rerank".into());
            }
            sort_candidates(&mut ranked);
        }

        // Graph expansion merges referenced chunks at low weight.
        let mut graph_context = None;
        if opts.expand_graph {
            match self.expand_graph(query, &mut ranked).await {
                Ok(context) => graph_context = context,
                Err(e) => {
                    warn!("graph expansion degraded: {e}");
                    degraded.push("graph_expansion".into());
                }
            }
            sort_candidates(&mut ranked);
        }

        // Final ordering ties break on source recency then ordinal.
        let sources: HashMap<String, chrono::DateTime<chrono::Utc>> = self
            .store
            .sources()
            .await
            .map_err(Error::Store)?
            .into_iter()
            .map(|s| (s.id, s.ingest_time))
            .collect();
        ranked.sort_by(|a, b| {
            b.fused
                .partial_cmp(&a.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.rerank
                        .unwrap_or(f32::MIN)
                        .partial_cmp(&a.rerank.unwrap_or(f32::MIN))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    let a_time = sources.get(&a.chunk.source_id);
                    let b_time = sources.get(&b.chunk.source_id);
                    b_time.cmp(&a_time)
                })
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        ranked.truncate(opts.top_k);

        let chunks: Vec<Chunk> = ranked.iter().map(|c| c.chunk.clone()).collect();
        let packed = pack::pack(&chunks, graph_context.as_deref(), self.config.token_budget);

        let results = ranked
            .iter()
            .map(|c| RetrievalResult {
                chunk_id: c.chunk.id.clone(),
                score: c.fused as f32,
                match_kind: c.match_kind,
                source_id: c.chunk.source_id.clone(),
                rerank_score: c.rerank,
            })
            .collect();

        debug!(
            results = ranked.len(),
            tokens = packed.token_est,
            "retrieval complete"
        );

        Ok(RetrievalResponse {
            results,
            packed_context: packed.context,
            citations: packed.citations,
            token_est: packed.token_est,
            degraded,
        })
    }

    async fn dense_ranks(
        &self,
        queries: &[String],
        candidate_count: usize,
        opts: &RetrieveOptions,
        weight: f64,
        candidates: &mut HashMap<String, Candidate>,
    ) -> Result<(), Error> {
        for q in queries {
            let vector = self.gateway.embed(q).await.map_err(Error::Gateway)?;
            let hits = self
                .index
                .query(&vector, candidate_count, opts.filter.as_ref())
                .await
                .map_err(Error::Store)?;

            for (rank, (id, _score)) in hits.iter().enumerate() {
                let bump = weight / (RRF_K + rank as f64 + 1.0);
                if let Some(existing) = candidates.get_mut(id) {
                    existing.fused += bump;
                    existing.match_kind = MatchKind::Dense;
                    continue;
                }
                let Some(chunk) = self.store.get(id).await.map_err(Error::Store)? else {
                    // Dangling vector; the store is authoritative.
                    continue;
                };
                candidates.insert(
                    id.clone(),
                    Candidate {
                        chunk,
                        fused: bump,
                        match_kind: MatchKind::Dense,
                        rerank: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Pairwise relevance scoring through the generation gateway.
    async fn rerank(&self, query: &str, head: &mut [Candidate]) -> Result<(), Error> {
        if head.is_empty() || !self.gateway.is_available().await {
            return Ok(());
        }
        let opts = GenerateOptions::default()
            .with_temperature(0.0)
            .with_max_tokens(8);

        for candidate in head.iter_mut() {
            let prompt = format!(
                "Rate how relevant the passage is to the query on a scale of 0 to 10.\n\
                 Respond with a single number.\n\nQuery: {query}\n\nPassage: {}",
                candidate.chunk.text
            );
            let raw = self
                .gateway
                .generate(&prompt, &opts)
                .await
                .map_err(Error::Gateway)?;
            if let Ok(score) = raw.trim().parse::<f32>() {
                candidate.rerank = Some(score.clamp(0.0, 10.0));
            }
        }
        Ok(())
    }

    /// Expand through the knowledge graph. Skips silently when no entity
    /// in the query matches the graph.
    async fn expand_graph(
        &self,
        query: &str,
        ranked: &mut Vec<Candidate>,
    ) -> Result<Option<String>, Error> {
        let Some(graph) = &self.graph else {
            return Ok(None);
        };
        let entities = graph.search_entities(query).await;
        if entities.is_empty() {
            return Ok(None);
        }

        let mut combined = hearthmind_graph::Subgraph::default();
        for entity in entities.iter().take(GRAPH_ENTITY_CAP) {
            let sub = graph
                .neighbors(&entity.id, GRAPH_DEPTH, None)
                .await
                .map_err(Error::Graph)?;
            for e in sub.entities {
                if !combined.entities.iter().any(|x| x.id == e.id) {
                    combined.entities.push(e);
                }
            }
            for r in sub.relations {
                if !combined.relations.iter().any(|x| x.id == r.id) {
                    combined.relations.push(r);
                }
            }
        }

        for chunk_id in combined.chunk_ids() {
            if ranked.iter().any(|c| c.chunk.id == chunk_id) {
                continue;
            }
            if let Some(chunk) = self.store.get(&chunk_id).await.map_err(Error::Store)? {
                ranked.push(Candidate {
                    chunk,
                    fused: GRAPH_WEIGHT,
                    match_kind: MatchKind::Graph,
                    rerank: None,
                });
            }
        }

        let serialized = combined.serialize();
        Ok((!serialized.is_empty()).then_some(serialized))
    }
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.rerank
                    .unwrap_or(f32::MIN)
                    .partial_cmp(&a.rerank.unwrap_or(f32::MIN))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_core::chunk::{Source, SourceKind};
    use hearthmind_core::entity::EntityKind;
    use hearthmind_core::store::MetadataFilter;
    use hearthmind_gateway::testing::StaticGateway;
    use hearthmind_index::{SqliteChunkStore, SqliteVectorIndex, sync_pending};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteChunkStore>,
        index: Arc<SqliteVectorIndex>,
        gateway: Arc<StaticGateway>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteChunkStore::new(dir.path().join("chunks.db").to_str().unwrap())
                .await
                .unwrap(),
        );
        let gateway = Arc::new(StaticGateway::new(vec![]));
        let index = Arc::new(
            SqliteVectorIndex::new(
                dir.path().join("vectors.db").to_str().unwrap(),
                gateway.dimension(),
            )
            .await
            .unwrap(),
        );
        Fixture {
            _dir: dir,
            store,
            index,
            gateway,
        }
    }

    async fn seed(fx: &Fixture, docs: &[(&str, &[&str])]) {
        for (uri, texts) in docs {
            let source = Source::new(*uri, SourceKind::Text, "text/plain", format!("hash-{uri}"));
            fx.store.put_source(&source).await.unwrap();
            let chunks: Vec<Chunk> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| Chunk::new(&source.id, i as u32, *t))
                .collect();
            fx.store.put_chunks(&chunks).await.unwrap();
        }
        sync_pending(
            fx.store.as_ref(),
            fx.index.as_ref(),
            fx.gateway.as_ref(),
            64,
        )
        .await
        .unwrap();
    }

    fn engine(fx: &Fixture) -> RetrievalEngine {
        RetrievalEngine::new(
            fx.store.clone(),
            fx.index.clone(),
            fx.gateway.clone(),
            RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_corpus_returns_empty_response() {
        let fx = fixture().await;
        let resp = engine(&fx)
            .retrieve(
                "anything",
                &RetrieveOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(resp.is_empty());
        assert_eq!(resp.packed_context, "");
    }

    #[tokio::test]
    async fn empty_corpus_strict_is_an_error() {
        let fx = fixture().await;
        let opts = RetrieveOptions {
            strict: true,
            ..RetrieveOptions::default()
        };
        let err = engine(&fx)
            .retrieve("anything", &opts, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn hybrid_finds_relevant_chunk() {
        let fx = fixture().await;
        seed(
            &fx,
            &[
                (
                    "policy.txt",
                    &["Annual leave is 20 working days for employees after one year."],
                ),
                ("db.txt", &["Vacuum the database weekly to reclaim space."]),
            ],
        )
        .await;

        let opts = RetrieveOptions {
            rerank: false,
            ..RetrieveOptions::default()
        };
        let resp = engine(&fx)
            .retrieve("How many days of annual leave?", &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!resp.is_empty());
        let top = fx.store.get(&resp.results[0].chunk_id).await.unwrap().unwrap();
        assert!(top.text.contains("Annual leave"));
        assert!(resp.packed_context.contains("[1]"));
        assert_eq!(resp.citations[0].chunk_id, resp.results[0].chunk_id);
        assert!(resp.degraded.is_empty());
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty() {
        let fx = fixture().await;
        seed(&fx, &[("a.txt", &["some text"])]).await;
        let opts = RetrieveOptions {
            top_k: 0,
            ..RetrieveOptions::default()
        };
        let resp = engine(&fx)
            .retrieve("some", &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.is_empty());
    }

    #[tokio::test]
    async fn top_k_larger_than_corpus_returns_all() {
        let fx = fixture().await;
        seed(&fx, &[("a.txt", &["alpha text here", "beta text here"])]).await;
        let opts = RetrieveOptions {
            top_k: 50,
            rerank: false,
            ..RetrieveOptions::default()
        };
        let resp = engine(&fx)
            .retrieve("text here", &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.results.len(), 2);
    }

    #[tokio::test]
    async fn metadata_filter_restricts_results() {
        let fx = fixture().await;
        let source = Source::new("tagged.txt", SourceKind::Text, "text/plain", "hash-t");
        fx.store.put_source(&source).await.unwrap();
        fx.store
            .put_chunks(&[
                Chunk::new(&source.id, 0, "filtered leave content")
                    .with_metadata("lang", serde_json::json!("en")),
                Chunk::new(&source.id, 1, "other leave content")
                    .with_metadata("lang", serde_json::json!("de")),
            ])
            .await
            .unwrap();
        sync_pending(fx.store.as_ref(), fx.index.as_ref(), fx.gateway.as_ref(), 64)
            .await
            .unwrap();

        let opts = RetrieveOptions {
            filter: Some(MetadataFilter::new().eq("lang", serde_json::json!("de"))),
            rerank: false,
            ..RetrieveOptions::default()
        };
        let resp = engine(&fx)
            .retrieve("leave content", &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.results.len(), 1);
        let chunk = fx.store.get(&resp.results[0].chunk_id).await.unwrap().unwrap();
        assert_eq!(chunk.metadata["lang"], "de");
    }

    #[tokio::test]
    async fn rerank_scores_come_from_gateway() {
        let fx = fixture().await;
        seed(&fx, &[("a.txt", &["annual leave policy text", "unrelated database notes"])]).await;

        // Scripted rerank scores: first candidate 9, second 2.
        let gateway = Arc::new(StaticGateway::new(vec!["9", "2"]));
        let engine = RetrievalEngine::new(
            fx.store.clone(),
            fx.index.clone(),
            gateway,
            RetrievalConfig::default(),
        );

        let opts = RetrieveOptions {
            strategy: SearchStrategy::Sparse,
            ..RetrieveOptions::default()
        };
        let resp = engine
            .retrieve("annual leave", &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.results[0].rerank_score.is_some());
    }

    #[tokio::test]
    async fn graph_expansion_prepends_subgraph_and_merges_chunks() {
        let fx = fixture().await;
        seed(
            &fx,
            &[
                ("people.txt", &["Ada Lovelace leads the research division."]),
                ("orgs.txt", &["Acme Corp quarterly report mentions growth."]),
            ],
        )
        .await;

        let all = fx.store.all_chunks().await.unwrap();
        let people_chunk = all.iter().find(|c| c.text.contains("Ada")).unwrap();
        let org_chunk = all.iter().find(|c| c.text.contains("Acme")).unwrap();

        let graph = Arc::new(KnowledgeGraph::in_memory());
        let ada = graph
            .upsert_entity("Ada Lovelace", EntityKind::Person, 0.9, Some(&people_chunk.id))
            .await
            .unwrap();
        let acme = graph
            .upsert_entity("Acme Corp", EntityKind::Org, 0.9, Some(&org_chunk.id))
            .await
            .unwrap();
        graph
            .upsert_relation(&ada, &acme, "works_at", 0.9, None)
            .await
            .unwrap();

        let engine = engine(&fx).with_graph(graph);
        let opts = RetrieveOptions {
            expand_graph: true,
            rerank: false,
            ..RetrieveOptions::default()
        };
        let resp = engine
            .retrieve("Ada Lovelace", &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert!(resp.packed_context.contains("Ada Lovelace —[works_at]→ Acme Corp"));
        assert!(resp.results.iter().any(|r| r.chunk_id == org_chunk.id));
        // Expansion without a failure is not a degradation.
        assert!(resp.degraded.is_empty());
    }

    #[tokio::test]
    async fn no_matched_entity_skips_expansion_silently() {
        let fx = fixture().await;
        seed(&fx, &[("a.txt", &["plain text with no entities"])]).await;

        let engine = engine(&fx).with_graph(Arc::new(KnowledgeGraph::in_memory()));
        let opts = RetrieveOptions {
            expand_graph: true,
            rerank: false,
            ..RetrieveOptions::default()
        };
        let resp = engine
            .retrieve("plain text", &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!resp.packed_context.contains("Knowledge Graph"));
        assert!(resp.degraded.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_the_call() {
        let fx = fixture().await;
        seed(&fx, &[("a.txt", &["text"])]).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(&fx)
            .retrieve("text", &RetrieveOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn single_call_is_deterministic() {
        let fx = fixture().await;
        seed(
            &fx,
            &[("a.txt", &["annual leave days", "annual leave policy", "unrelated"])],
        )
        .await;

        let opts = RetrieveOptions {
            rerank: false,
            ..RetrieveOptions::default()
        };
        let first = engine(&fx)
            .retrieve("annual leave", &opts, &CancellationToken::new())
            .await
            .unwrap();
        let second = engine(&fx)
            .retrieve("annual leave", &opts, &CancellationToken::new())
            .await
            .unwrap();

        let ids = |r: &RetrievalResponse| {
            r.results.iter().map(|x| x.chunk_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.packed_context, second.packed_context);
    }
}
