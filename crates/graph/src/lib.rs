//! Knowledge graph with Graph-RAG subgraph expansion.
//!
//! In-memory graph with JSON snapshot persistence. Reads run concurrently;
//! upserts serialize behind a write lock. Entities merge on
//! `(canonical_name, kind)`, relations merge on `(src, kind, dst)` by
//! incrementing the weight.

pub mod extract;

pub use extract::{Extraction, GenerativeExtractor, PatternExtractor};

use hearthmind_core::entity::{Entity, EntityKind, Relation};
use hearthmind_core::error::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Limits applied when a subgraph is serialized into packed context.
pub const MAX_SERIALIZED_ENTITIES: usize = 20;
/// See [`MAX_SERIALIZED_ENTITIES`].
pub const MAX_SERIALIZED_RELATIONS: usize = 30;

/// A bounded neighborhood extracted around one or more entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Subgraph {
    /// Chunk IDs referenced by the subgraph's entities and relations.
    pub fn chunk_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for id in self
            .entities
            .iter()
            .flat_map(|e| e.mentions.iter())
            .chain(self.relations.iter().flat_map(|r| r.source_chunks.iter()))
        {
            if seen.insert(id.clone()) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Serialize as `A —[kind]→ B` lines, bounded to
    /// [`MAX_SERIALIZED_ENTITIES`] / [`MAX_SERIALIZED_RELATIONS`].
    pub fn serialize(&self) -> String {
        let names: HashMap<&str, &str> = self
            .entities
            .iter()
            .take(MAX_SERIALIZED_ENTITIES)
            .map(|e| (e.id.as_str(), e.canonical_name.as_str()))
            .collect();

        let mut lines = Vec::new();
        for relation in self.relations.iter().take(MAX_SERIALIZED_RELATIONS) {
            let (Some(src), Some(dst)) = (
                names.get(relation.src_entity_id.as_str()),
                names.get(relation.dst_entity_id.as_str()),
            ) else {
                continue;
            };
            lines.push(format!("{src} —[{}]→ {dst}", relation.kind));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphState {
    entities: HashMap<String, Entity>,
    relations: HashMap<String, Relation>,
    /// `(lowercased name, kind)` → entity ID.
    #[serde(skip)]
    name_index: HashMap<(String, EntityKind), String>,
    /// `(src, kind, dst)` → relation ID.
    #[serde(skip)]
    triple_index: HashMap<(String, String, String), String>,
}

impl GraphState {
    fn rebuild_indexes(&mut self) {
        self.name_index = self
            .entities
            .values()
            .map(|e| ((e.canonical_name.to_lowercase(), e.kind), e.id.clone()))
            .collect();
        self.triple_index = self
            .relations
            .values()
            .map(|r| {
                (
                    (
                        r.src_entity_id.clone(),
                        r.kind.clone(),
                        r.dst_entity_id.clone(),
                    ),
                    r.id.clone(),
                )
            })
            .collect();
    }
}

/// The knowledge graph.
pub struct KnowledgeGraph {
    state: RwLock<GraphState>,
    snapshot_path: Option<PathBuf>,
}

impl KnowledgeGraph {
    /// An empty in-memory graph without persistence.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            snapshot_path: None,
        }
    }

    /// A graph persisted as a JSON snapshot under the given directory.
    /// Loads the existing snapshot when present.
    pub async fn open(dir: &Path) -> Result<Self, GraphError> {
        let path = dir.join("graph.json");
        let mut state = GraphState::default();
        if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| GraphError::Storage(format!("read snapshot: {e}")))?;
            state = serde_json::from_str(&raw)
                .map_err(|e| GraphError::Storage(format!("parse snapshot: {e}")))?;
            state.rebuild_indexes();
            info!(
                entities = state.entities.len(),
                relations = state.relations.len(),
                "knowledge graph loaded from {}",
                path.display()
            );
        }
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    /// Write the snapshot to disk, when persistence is configured.
    pub async fn save(&self) -> Result<(), GraphError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let raw = {
            let state = self.state.read().await;
            serde_json::to_string(&*state)
                .map_err(|e| GraphError::Storage(format!("serialize snapshot: {e}")))?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GraphError::Storage(format!("create graph dir: {e}")))?;
        }
        tokio::fs::write(path, raw)
            .await
            .map_err(|e| GraphError::Storage(format!("write snapshot: {e}")))?;
        Ok(())
    }

    /// Insert or merge an entity. On re-observation of `(name, kind)` the
    /// confidence rises to the max of old and new and the observing chunk
    /// joins `mentions`. Returns the entity ID.
    pub async fn upsert_entity(
        &self,
        name: &str,
        kind: EntityKind,
        confidence: f64,
        chunk_id: Option<&str>,
    ) -> Result<String, GraphError> {
        let mut state = self.state.write().await;
        let key = (name.to_lowercase(), kind);

        if let Some(id) = state.name_index.get(&key).cloned() {
            let entity = state
                .entities
                .get_mut(&id)
                .ok_or_else(|| GraphError::Storage("name index out of sync".into()))?;
            entity.confidence = entity.confidence.max(confidence.clamp(0.0, 1.0));
            if let Some(chunk) = chunk_id
                && !entity.mentions.iter().any(|m| m == chunk)
            {
                entity.mentions.push(chunk.to_string());
            }
            return Ok(id);
        }

        let mut entity = Entity::new(name, kind, confidence);
        if let Some(chunk) = chunk_id {
            entity.mentions.push(chunk.to_string());
        }
        let id = entity.id.clone();
        state.name_index.insert(key, id.clone());
        state.entities.insert(id.clone(), entity);
        debug!(entity = name, %kind, "entity created");
        Ok(id)
    }

    /// Insert or merge a relation. On re-observation of `(src, kind, dst)`
    /// the weight increments instead of duplicating the edge. Returns the
    /// relation ID.
    pub async fn upsert_relation(
        &self,
        src_entity_id: &str,
        dst_entity_id: &str,
        kind: &str,
        confidence: f64,
        chunk_id: Option<&str>,
    ) -> Result<String, GraphError> {
        let mut state = self.state.write().await;
        if !state.entities.contains_key(src_entity_id) {
            return Err(GraphError::NotFound(src_entity_id.to_string()));
        }
        if !state.entities.contains_key(dst_entity_id) {
            return Err(GraphError::NotFound(dst_entity_id.to_string()));
        }

        let triple = (
            src_entity_id.to_string(),
            kind.to_string(),
            dst_entity_id.to_string(),
        );
        if let Some(id) = state.triple_index.get(&triple).cloned() {
            let relation = state
                .relations
                .get_mut(&id)
                .ok_or_else(|| GraphError::Storage("triple index out of sync".into()))?;
            relation.weight += 1.0;
            relation.confidence = relation.confidence.max(confidence.clamp(0.0, 1.0));
            if let Some(chunk) = chunk_id
                && !relation.source_chunks.iter().any(|c| c == chunk)
            {
                relation.source_chunks.push(chunk.to_string());
            }
            return Ok(id);
        }

        let mut relation = Relation::new(src_entity_id, dst_entity_id, kind, confidence);
        if let Some(chunk) = chunk_id {
            relation.source_chunks.push(chunk.to_string());
        }
        let id = relation.id.clone();
        state.triple_index.insert(triple, id.clone());
        state.relations.insert(id.clone(), relation);
        Ok(id)
    }

    /// Look up an entity by name (exact, case-insensitive), optionally
    /// restricted to a kind.
    pub async fn entity_by_name(&self, name: &str, kind: Option<EntityKind>) -> Option<Entity> {
        let state = self.state.read().await;
        let lowered = name.to_lowercase();
        match kind {
            Some(kind) => state
                .name_index
                .get(&(lowered, kind))
                .and_then(|id| state.entities.get(id))
                .cloned(),
            None => state
                .name_index
                .iter()
                .find(|((n, _), _)| *n == lowered)
                .and_then(|(_, id)| state.entities.get(id))
                .cloned(),
        }
    }

    /// Entities whose canonical name appears in the query (or vice versa),
    /// case-insensitive.
    pub async fn search_entities(&self, query: &str) -> Vec<Entity> {
        let state = self.state.read().await;
        let query_lower = query.to_lowercase();
        let mut matched: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| {
                let name = e.canonical_name.to_lowercase();
                query_lower.contains(&name) || name.contains(&query_lower)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });
        matched
    }

    /// The neighborhood of an entity up to `depth` hops, optionally
    /// restricted to relation kinds. Edges are followed in both directions.
    pub async fn neighbors(
        &self,
        entity_id: &str,
        depth: usize,
        kinds: Option<&[String]>,
    ) -> Result<Subgraph, GraphError> {
        let state = self.state.read().await;
        if !state.entities.contains_key(entity_id) {
            return Err(GraphError::NotFound(entity_id.to_string()));
        }

        let mut visited: HashSet<String> = HashSet::from([entity_id.to_string()]);
        let mut frontier: Vec<String> = vec![entity_id.to_string()];
        let mut relations: Vec<Relation> = Vec::new();
        let mut relation_ids: HashSet<String> = HashSet::new();

        for _ in 0..depth {
            let mut next = Vec::new();
            for relation in state.relations.values() {
                if let Some(kinds) = kinds
                    && !kinds.iter().any(|k| *k == relation.kind)
                {
                    continue;
                }
                for (from, to) in [
                    (&relation.src_entity_id, &relation.dst_entity_id),
                    (&relation.dst_entity_id, &relation.src_entity_id),
                ] {
                    if frontier.contains(from) {
                        if relation_ids.insert(relation.id.clone()) {
                            relations.push(relation.clone());
                        }
                        if visited.insert(to.clone()) {
                            next.push(to.clone());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut entities: Vec<Entity> = visited
            .iter()
            .filter_map(|id| state.entities.get(id))
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        relations.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(Subgraph {
            entities,
            relations,
        })
    }

    /// Shortest path between two entities (BFS over undirected edges),
    /// bounded by `max_depth`. Returns the entity IDs along the path, or
    /// `None` when unreachable within the bound.
    pub async fn path(
        &self,
        a: &str,
        b: &str,
        max_depth: usize,
    ) -> Result<Option<Vec<String>>, GraphError> {
        let state = self.state.read().await;
        for id in [a, b] {
            if !state.entities.contains_key(id) {
                return Err(GraphError::NotFound(id.to_string()));
            }
        }
        if a == b {
            return Ok(Some(vec![a.to_string()]));
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for relation in state.relations.values() {
            adjacency
                .entry(relation.src_entity_id.as_str())
                .or_default()
                .push(relation.dst_entity_id.as_str());
            adjacency
                .entry(relation.dst_entity_id.as_str())
                .or_default()
                .push(relation.src_entity_id.as_str());
        }

        let mut queue: VecDeque<Vec<String>> = VecDeque::from([vec![a.to_string()]]);
        let mut visited: HashSet<String> = HashSet::from([a.to_string()]);

        while let Some(path) = queue.pop_front() {
            if path.len() > max_depth {
                continue;
            }
            let last = path.last().expect("path never empty");
            for next in adjacency.get(last.as_str()).into_iter().flatten() {
                if *next == b {
                    let mut full = path.clone();
                    full.push(b.to_string());
                    return Ok(Some(full));
                }
                if visited.insert(next.to_string()) {
                    let mut longer = path.clone();
                    longer.push(next.to_string());
                    queue.push_back(longer);
                }
            }
        }
        Ok(None)
    }

    /// Apply low-importance decay: every relation weight is multiplied by
    /// `factor` and floored; confidence is untouched. Entities are never
    /// collected implicitly.
    pub async fn decay(&self, factor: f64, floor: f64) {
        let mut state = self.state.write().await;
        for relation in state.relations.values_mut() {
            relation.weight = (relation.weight * factor).max(floor);
        }
    }

    /// Drop references to deleted chunks. Called from the source-deletion
    /// cascade.
    pub async fn remove_chunk_references(&self, chunk_ids: &[String]) {
        let removed: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
        let mut state = self.state.write().await;
        for entity in state.entities.values_mut() {
            entity.mentions.retain(|m| !removed.contains(m.as_str()));
        }
        for relation in state.relations.values_mut() {
            relation
                .source_chunks
                .retain(|c| !removed.contains(c.as_str()));
        }
    }

    /// Entity and relation counts.
    pub async fn stats(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.entities.len(), state.relations.len())
    }
}
