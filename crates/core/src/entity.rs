//! Knowledge graph domain types: entities and directed relations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Org,
    Place,
    Concept,
    Doc,
    Event,
    Product,
    Other,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Person => "person",
            Self::Org => "org",
            Self::Place => "place",
            Self::Concept => "concept",
            Self::Doc => "doc",
            Self::Event => "event",
            Self::Product => "product",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// A node in the knowledge graph.
///
/// Extraction is idempotent on `(canonical_name, kind)`: re-observing an
/// entity raises its confidence to the max of old and new and appends the
/// observing chunk to `mentions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity ID.
    pub id: String,

    /// Normalized display name.
    pub canonical_name: String,

    /// Entity category.
    pub kind: EntityKind,

    /// Free-form attributes.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,

    /// Chunk IDs where this entity was observed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
}

impl Entity {
    pub fn new(canonical_name: impl Into<String>, kind: EntityKind, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            canonical_name: canonical_name.into(),
            kind,
            attributes: serde_json::Map::new(),
            confidence: confidence.clamp(0.0, 1.0),
            mentions: Vec::new(),
        }
    }
}

/// A directed, weighted edge between two entities.
///
/// Invariant: `weight > 0`. Re-observing an existing `(src, kind, dst)`
/// triple increments the weight instead of duplicating the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Unique relation ID.
    pub id: String,

    /// Source entity.
    pub src_entity_id: String,

    /// Destination entity.
    pub dst_entity_id: String,

    /// Relation label (e.g. "works_at", "mentions", "part_of").
    pub kind: String,

    /// Strictly positive edge weight; incremented on re-observation.
    pub weight: f64,

    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,

    /// Chunks that evidence this relation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_chunks: Vec<String>,
}

impl Relation {
    pub fn new(
        src_entity_id: impl Into<String>,
        dst_entity_id: impl Into<String>,
        kind: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            src_entity_id: src_entity_id.into(),
            dst_entity_id: dst_entity_id.into(),
            kind: kind.into(),
            weight: 1.0,
            confidence: confidence.clamp(0.0, 1.0),
            source_chunks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_confidence_is_clamped() {
        let e = Entity::new("Ada Lovelace", EntityKind::Person, 1.7);
        assert!((e.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn relation_starts_at_weight_one() {
        let r = Relation::new("a", "b", "works_at", 0.8);
        assert!((r.weight - 1.0).abs() < f64::EPSILON);
        assert!(r.source_chunks.is_empty());
    }
}
