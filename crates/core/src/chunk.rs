//! Chunk and Source domain types.
//!
//! A source is an ingested document; it owns an ordered sequence of chunks.
//! Chunks are immutable once created and are deleted only by removing their
//! source. `(source_id, ordinal)` is unique within the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of document a source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Pdf,
    Html,
    Audio,
    Image,
    Code,
}

impl SourceKind {
    /// Guess the source kind from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "html" | "htm" => Self::Html,
            "mp3" | "wav" | "ogg" | "flac" => Self::Audio,
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Self::Image,
            "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "rb" => Self::Code,
            _ => Self::Text,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Code => "code",
        };
        write!(f, "{s}")
    }
}

/// An ingested document that owns many chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique source ID.
    pub id: String,

    /// Where the document came from (path, URL, …).
    pub uri: String,

    /// Document kind.
    pub kind: SourceKind,

    /// MIME type as reported at ingest.
    pub mime: String,

    /// When the source was ingested.
    pub ingest_time: DateTime<Utc>,

    /// SHA-256 of the raw content; guards against duplicate ingest.
    pub content_hash: String,
}

impl Source {
    /// Create a new source record with a fresh ID and the current time.
    pub fn new(
        uri: impl Into<String>,
        kind: SourceKind,
        mime: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            uri: uri.into(),
            kind,
            mime: mime.into(),
            ingest_time: Utc::now(),
            content_hash: content_hash.into(),
        }
    }

    /// The last path component of the URI, used as a display label in
    /// citations.
    pub fn label(&self) -> &str {
        self.uri.rsplit(['/', '\\']).next().unwrap_or(&self.uri)
    }
}

/// A bounded unit of source text indexed for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk ID.
    pub id: String,

    /// Owning source.
    pub source_id: String,

    /// Position of this chunk within the source. `(source_id, ordinal)` is
    /// unique.
    pub ordinal: u32,

    /// The text content.
    pub text: String,

    /// Page number for paginated sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Arbitrary metadata used for retrieval filters.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Dense embedding; `None` until embedded (pending-embed state).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create a chunk for the given source and position.
    pub fn new(source_id: impl Into<String>, ordinal: u32, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            ordinal,
            text: text.into(),
            page: None,
            metadata: serde_json::Map::new(),
            embedding: None,
        }
    }

    /// Set the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Attach a metadata key.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
