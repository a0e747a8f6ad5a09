//! Worker trait — the abstraction over specialist capabilities.
//!
//! A worker performs one kind of subtask (research, writing, analysis, …).
//! Behavior difference lives in per-worker configuration, not inheritance;
//! the registry is a flat `name → Worker` map. Workers receive a normalized
//! context and must not depend on global mutable state beyond the
//! capabilities they were constructed with.

use crate::error::WorkerError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Normalized input context handed to every worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerContext {
    /// Packed retrieval context (with citation anchors), if any.
    pub documents: Option<String>,

    /// Output carried forward from previous plan steps.
    pub previous_results: Option<String>,

    /// Assembled memory context (core + relevant archival).
    pub memory_context: Option<String>,

    /// Recent conversation slice.
    pub chat_history: Vec<Message>,
}

impl WorkerContext {
    /// Render the context sections that are present, in a stable order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(memory) = &self.memory_context {
            out.push_str(memory);
            if !memory.ends_with('\n') {
                out.push('\n');
            }
        }
        if let Some(documents) = &self.documents {
            out.push_str("## Retrieved Documents\n");
            out.push_str(documents);
            out.push('\n');
        }
        if let Some(previous) = &self.previous_results {
            out.push_str("## Previous Step Results\n");
            out.push_str(previous);
            out.push('\n');
        }
        if !self.chat_history.is_empty() {
            out.push_str("## Conversation\n");
            for msg in &self.chat_history {
                out.push_str(&format!("{}: {}\n", msg.role, msg.content));
            }
        }
        out
    }
}

/// What a worker produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// The generated content.
    pub content: String,

    /// Source identifiers (chunk IDs, URIs) backing the content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    /// Worker-specific metadata (detected format, scores, …).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Whether execution succeeded.
    pub ok: bool,

    /// Error description when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    /// A successful response.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
            metadata: serde_json::Map::new(),
            ok: true,
            error: None,
        }
    }

    /// A failed response carrying an error description.
    pub fn err(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            content: String::new(),
            sources: Vec::new(),
            metadata: serde_json::Map::new(),
            ok: false,
            error: Some(error),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The core Worker trait.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Unique worker name (e.g. "research", "writer").
    fn name(&self) -> &str;

    /// Short role description.
    fn role(&self) -> &str;

    /// Capability labels (e.g. "retrieval", "synthesis").
    fn capabilities(&self) -> &[String];

    /// The worker's system prompt.
    fn system_prompt(&self) -> &str;

    /// Execute a task. Implementations check `cancel` between suspension
    /// points and abort with [`WorkerError::Cancelled`].
    async fn execute(
        &self,
        task: &str,
        ctx: &WorkerContext,
        cancel: &CancellationToken,
    ) -> std::result::Result<WorkerResponse, WorkerError>;
}

/// A registry of available workers.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Register a worker. Replaces any existing worker with the same name.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    /// Get a worker by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    /// All registered worker names, sorted for stable iteration.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a worker, failing with [`WorkerError::NotFound`].
    pub fn require(&self, name: &str) -> std::result::Result<Arc<dyn Worker>, WorkerError> {
        self.get(name)
            .ok_or_else(|| WorkerError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        fn name(&self) -> &str {
            "echo"
        }
        fn role(&self) -> &str {
            "Repeats the task"
        }
        fn capabilities(&self) -> &[String] {
            &[]
        }
        fn system_prompt(&self) -> &str {
            "You echo."
        }
        async fn execute(
            &self,
            task: &str,
            _ctx: &WorkerContext,
            _cancel: &CancellationToken,
        ) -> std::result::Result<WorkerResponse, WorkerError> {
            Ok(WorkerResponse::ok(task))
        }
    }

    #[tokio::test]
    async fn registry_lookup_and_require() {
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(EchoWorker));

        assert!(registry.get("echo").is_some());
        assert!(registry.require("missing").is_err());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn echo_worker_round_trip() {
        let worker = EchoWorker;
        let resp = worker
            .execute("hello", &WorkerContext::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.content, "hello");
    }

    #[test]
    fn context_render_orders_sections() {
        let ctx = WorkerContext {
            documents: Some("[1] doc text".into()),
            previous_results: Some("earlier output".into()),
            memory_context: Some("## Core Memory\npersona\n".into()),
            chat_history: vec![Message::user("hi")],
        };
        let rendered = ctx.render();
        let memory_pos = rendered.find("Core Memory").unwrap();
        let docs_pos = rendered.find("Retrieved Documents").unwrap();
        let prev_pos = rendered.find("Previous Step Results").unwrap();
        let chat_pos = rendered.find("## Conversation").unwrap();
        assert!(memory_pos < docs_pos && docs_pos < prev_pos && prev_pos < chat_pos);
    }
}
