//! Archival memory: unbounded, searchable, consolidated.
//!
//! Entries carry an importance in `[0, 1]`. Search is hybrid — ranked
//! keyword hits from the FTS index fused with cosine similarity over
//! lazily generated embeddings. Consolidation decays stale entries,
//! merges near-duplicates, and prunes the unimportant; it is idempotent.

use chrono::Utc;
use hearthmind_core::error::MemoryError;
use hearthmind_core::gateway::Gateway;
use hearthmind_core::memory::MemoryBlock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::SqliteMemoryStore;

/// Importance given to working-memory evictions.
pub const EVICTION_IMPORTANCE: f64 = 0.3;
/// Entries older than this many days decay.
const DECAY_AFTER_DAYS: i64 = 30;
/// Decay multiplier per consolidation day.
const DECAY_FACTOR: f64 = 0.95;
/// Word-set Jaccard similarity above which two entries merge.
const MERGE_THRESHOLD: f64 = 0.7;
/// Entries below this importance are pruned.
const PRUNE_THRESHOLD: f64 = 0.1;

/// What one consolidation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub decayed: usize,
    pub merged: usize,
    pub pruned: usize,
}

/// The archival tier.
pub struct ArchivalMemory {
    store: Arc<SqliteMemoryStore>,
    gateway: Arc<dyn Gateway>,
}

impl ArchivalMemory {
    pub fn new(store: Arc<SqliteMemoryStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Insert a block. Embeddings are generated lazily at search time, not
    /// here, so ingest never blocks on the backend.
    pub async fn insert(&self, block: &MemoryBlock) -> Result<(), MemoryError> {
        self.store.insert_archival(block).await
    }

    /// Hybrid search: keyword rank fused with cosine similarity
    /// (keyword 0.4 / vector 0.6). Falls back to keyword-only when the
    /// embedding backend is down.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(MemoryBlock, f64)>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let keyword_hits = self.store.keyword_search_archival(query, k * 3).await?;
        let mut scores: HashMap<String, (MemoryBlock, f64)> = HashMap::new();
        for (rank, block) in keyword_hits.into_iter().enumerate() {
            let score = 0.4 * (1.0 / (rank as f64 + 1.0));
            scores.insert(block.id.clone(), (block, score));
        }

        if let Ok(query_vec) = self.gateway.embed(query).await {
            for mut block in self.store.all_archival().await? {
                let embedding = match &block.embedding {
                    Some(v) => v.clone(),
                    None => match self.gateway.embed(&block.text).await {
                        Ok(v) => {
                            block.embedding = Some(v.clone());
                            self.store.insert_archival(&block).await?;
                            v
                        }
                        Err(_) => continue,
                    },
                };
                let sim = cosine(&query_vec, &embedding) as f64;
                scores
                    .entry(block.id.clone())
                    .and_modify(|(_, s)| *s += 0.6 * sim)
                    .or_insert((block, 0.6 * sim));
            }
        }

        let mut ranked: Vec<(MemoryBlock, f64)> = scores.into_values().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        ranked.truncate(k);

        for (block, _) in &ranked {
            self.store.touch_archival(&block.id).await?;
        }
        Ok(ranked)
    }

    /// Decay, merge, prune. Safe to run repeatedly: a second pass with no
    /// intervening writes is a no-op.
    pub async fn consolidate(&self) -> Result<ConsolidationReport, MemoryError> {
        let mut report = ConsolidationReport::default();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let now = Utc::now();

        // Decay: at most once per calendar day per entry.
        let mut blocks = self.store.all_archival().await?;
        for block in &mut blocks {
            let age_days = (now - block.created_at).num_days();
            let decayed_today = block
                .metadata
                .get("last_decay")
                .and_then(|v| v.as_str())
                .is_some_and(|d| d == today);
            if age_days > DECAY_AFTER_DAYS && !decayed_today {
                block.priority *= DECAY_FACTOR;
                block
                    .metadata
                    .insert("last_decay".into(), serde_json::Value::String(today.clone()));
                self.store.insert_archival(block).await?;
                report.decayed += 1;
            }
        }

        // Merge near-duplicates: keep the earlier entry, raise its
        // importance to the max, union the tags, drop the other.
        let mut blocks = self.store.all_archival().await?;
        let mut removed: Vec<usize> = Vec::new();
        for i in 0..blocks.len() {
            if removed.contains(&i) {
                continue;
            }
            for j in (i + 1)..blocks.len() {
                if removed.contains(&j) {
                    continue;
                }
                if jaccard(&blocks[i].text, &blocks[j].text) > MERGE_THRESHOLD {
                    let (left, right) = blocks.split_at_mut(j);
                    let keep = &mut left[i];
                    let drop = &right[0];
                    keep.priority = keep.priority.max(drop.priority);
                    let tags: BTreeSet<String> = keep
                        .tags
                        .iter()
                        .chain(drop.tags.iter())
                        .cloned()
                        .collect();
                    keep.tags = tags.into_iter().collect();
                    self.store.insert_archival(keep).await?;
                    self.store.delete_archival(&drop.id).await?;
                    removed.push(j);
                    report.merged += 1;
                }
            }
        }

        // Prune the unimportant.
        for block in self.store.all_archival().await? {
            if block.priority < PRUNE_THRESHOLD {
                self.store.delete_archival(&block.id).await?;
                report.pruned += 1;
            }
        }

        if report != ConsolidationReport::default() {
            info!(
                decayed = report.decayed,
                merged = report.merged,
                pruned = report.pruned,
                "archival consolidation complete"
            );
        } else {
            debug!("archival consolidation: nothing to do");
        }
        Ok(report)
    }

    pub async fn count(&self) -> Result<usize, MemoryError> {
        self.store.archival_count().await
    }
}

/// Word-set Jaccard similarity, case-insensitive.
fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: BTreeSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
