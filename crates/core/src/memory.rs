//! Tiered memory domain types.
//!
//! Four tiers: core (always in context), working (active conversation),
//! archival (long-term, searchable), recall (episodic, time-indexed).
//! The tier machinery itself lives in `hearthmind-memory`; these are the
//! shared value objects.

use crate::message::Role;
use crate::token::estimate_tokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which tier a memory block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Core,
    Working,
    Archival,
    Recall,
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Core => "core",
            Self::Working => "working",
            Self::Archival => "archival",
            Self::Recall => "recall",
        };
        write!(f, "{s}")
    }
}

/// A single block in the memory hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBlock {
    /// Unique block ID.
    pub id: String,

    /// Owning tier.
    pub tier: MemoryTier,

    /// The content.
    pub text: String,

    /// Importance/priority in `[0, 1]`. Archival decay and pruning operate
    /// on this value.
    pub priority: f64,

    /// Estimated token cost of `text`.
    pub token_est: usize,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last access time.
    pub accessed_at: DateTime<Utc>,

    /// How many times this block has been read back.
    pub access_count: u32,

    /// Message role; only meaningful for working-tier blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Where this block came from (e.g. "conversation", "consolidation").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Tags; unioned when archival entries merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Dense embedding, generated lazily for archival search.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,

    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryBlock {
    /// Create a block in the given tier with a fresh ID and timestamps.
    pub fn new(tier: MemoryTier, text: impl Into<String>, priority: f64) -> Self {
        let text = text.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tier,
            token_est: estimate_tokens(&text),
            text,
            priority: priority.clamp(0.0, 1.0),
            created_at: now,
            accessed_at: now,
            access_count: 0,
            role: None,
            source: None,
            tags: Vec::new(),
            embedding: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a working-tier block carrying a message role.
    pub fn working(role: Role, text: impl Into<String>) -> Self {
        let mut block = Self::new(MemoryTier::Working, text, 0.5);
        block.role = Some(role);
        block
    }

    /// Create an archival block; evicted working messages use importance 0.3.
    pub fn archival(text: impl Into<String>, priority: f64) -> Self {
        Self::new(MemoryTier::Archival, text, priority)
    }

    /// Record a read access.
    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
        self.access_count += 1;
    }

    /// Attach a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the source label.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// An episodic recall entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallEntry {
    /// Unique entry ID.
    pub id: String,

    /// Event category (e.g. "task_completed", "feedback_received").
    pub event_kind: String,

    /// What happened.
    pub description: String,

    /// When it happened.
    pub ts: DateTime<Utc>,

    /// Who was involved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,

    /// Affect labels attached to the episode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,

    /// Structured context.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl RecallEntry {
    pub fn new(event_kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_kind: event_kind.into(),
            description: description.into(),
            ts: Utc::now(),
            participants: Vec::new(),
            emotions: Vec::new(),
            context: serde_json::Map::new(),
        }
    }
}
