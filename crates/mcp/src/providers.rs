//! Resource, tool, and prompt providers.
//!
//! Providers are pluggable: the server tries each resource provider on
//! `read` until one returns a value, routes tool calls to the provider
//! owning the name, and concatenates prompt catalogues. The built-in
//! providers expose the corpus, the memory tiers, the knowledge graph,
//! and a sandboxed slice of the filesystem.

use async_trait::async_trait;
use hearthmind_core::error::Error;
use hearthmind_core::memory::MemoryBlock;
use hearthmind_core::retrieval::RetrieveOptions;
use hearthmind_core::tool::{ToolDispatcher, ToolSummary};
use hearthmind_core::{CancellationToken, ChunkStore};
use hearthmind_graph::KnowledgeGraph;
use hearthmind_memory::{CoreSection, MemoryHandle};
use hearthmind_retrieval::RetrievalEngine;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::sandbox;
use crate::types::{
    ContentItem, Prompt, PromptArgument, PromptMessage, Resource, ResourceContent, Tool,
    ToolResult,
};

/// Lists and reads resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<Resource>, Error>;

    /// `Ok(None)` means "not mine"; the server tries the next provider.
    async fn read(&self, uri: &str) -> Result<Option<ResourceContent>, Error>;
}

/// Advertises and executes tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn tools(&self) -> Vec<Tool>;

    async fn call(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, Error>;
}

/// Lists and renders prompt templates.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    fn prompts(&self) -> Vec<Prompt>;

    /// `Ok(None)` means "not mine".
    async fn get(&self, name: &str, args: Value) -> Result<Option<Vec<PromptMessage>>, Error>;
}

// --- Corpus resources ---

/// Exposes ingested sources and chunks as `corpus://` resources.
pub struct CorpusResources {
    store: Arc<dyn ChunkStore>,
}

impl CorpusResources {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceProvider for CorpusResources {
    async fn list(&self) -> Result<Vec<Resource>, Error> {
        let sources = self.store.sources().await.map_err(Error::Store)?;
        Ok(sources
            .into_iter()
            .map(|s| Resource {
                uri: format!("corpus://source/{}", s.id),
                name: s.label().to_string(),
                description: Some(format!("Ingested {} document", s.kind)),
                mime_type: Some(s.mime),
                annotations: None,
            })
            .collect())
    }

    async fn read(&self, uri: &str) -> Result<Option<ResourceContent>, Error> {
        if let Some(source_id) = uri.strip_prefix("corpus://source/") {
            let chunks = self
                .store
                .chunks_by_source(source_id)
                .await
                .map_err(Error::Store)?;
            if chunks.is_empty() && self.store.get_source(source_id).await.map_err(Error::Store)?.is_none() {
                return Ok(None);
            }
            let text: String = chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(Some(ResourceContent {
                uri: uri.to_string(),
                mime_type: Some("text/plain".into()),
                text: Some(text),
                blob: None,
            }));
        }
        if let Some(chunk_id) = uri.strip_prefix("corpus://chunk/") {
            let Some(chunk) = self.store.get(chunk_id).await.map_err(Error::Store)? else {
                return Ok(None);
            };
            return Ok(Some(ResourceContent {
                uri: uri.to_string(),
                mime_type: Some("text/plain".into()),
                text: Some(chunk.text),
                blob: None,
            }));
        }
        Ok(None)
    }
}

// --- Memory resources ---

/// Exposes the core memory as `memory://core`.
pub struct MemoryResources {
    memory: MemoryHandle,
}

impl MemoryResources {
    pub fn new(memory: MemoryHandle) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ResourceProvider for MemoryResources {
    async fn list(&self) -> Result<Vec<Resource>, Error> {
        Ok(vec![Resource {
            uri: "memory://core".into(),
            name: "Core memory".into(),
            description: Some("Persona, user profile, and standing facts".into()),
            mime_type: Some("text/markdown".into()),
            annotations: None,
        }])
    }

    async fn read(&self, uri: &str) -> Result<Option<ResourceContent>, Error> {
        if uri != "memory://core" {
            return Ok(None);
        }
        let context = self
            .memory
            .build_context(None, 0)
            .await
            .map_err(Error::Memory)?;
        Ok(Some(ResourceContent {
            uri: uri.to_string(),
            mime_type: Some("text/markdown".into()),
            text: Some(context),
            blob: None,
        }))
    }
}

// --- Platform tools ---

/// The built-in tool set: corpus search and maintenance, memory access,
/// graph lookup, and sandboxed file access.
pub struct PlatformTools {
    store: Arc<dyn ChunkStore>,
    index: Arc<dyn hearthmind_core::VectorIndex>,
    retrieval: Arc<RetrievalEngine>,
    memory: MemoryHandle,
    graph: Arc<KnowledgeGraph>,
    data_root: PathBuf,
}

impl PlatformTools {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        index: Arc<dyn hearthmind_core::VectorIndex>,
        retrieval: Arc<RetrievalEngine>,
        memory: MemoryHandle,
        graph: Arc<KnowledgeGraph>,
        data_root: PathBuf,
    ) -> Self {
        Self {
            store,
            index,
            retrieval,
            memory,
            graph,
            data_root,
        }
    }

    /// Delete a source: its chunks leave the store, their vectors leave
    /// the index, and the graph drops the chunk references.
    async fn corpus_delete_source(&self, args: &Value) -> Result<ToolResult, Error> {
        let source_id = args["source_id"].as_str().unwrap_or_default();
        let chunk_ids = match self.store.delete_source(source_id).await {
            Ok(ids) => ids,
            Err(hearthmind_core::error::StoreError::NotFound(_)) => {
                return Ok(ToolResult::error(format!("source '{source_id}' not found")));
            }
            Err(e) => return Err(Error::Store(e)),
        };
        for id in &chunk_ids {
            self.index.delete(id).await.map_err(Error::Store)?;
        }
        self.graph.remove_chunk_references(&chunk_ids).await;
        Ok(ToolResult::ok(format!(
            "deleted source {source_id} and {} chunks",
            chunk_ids.len()
        )))
    }

    async fn corpus_search(
        &self,
        args: &Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, Error> {
        let query = args["query"].as_str().unwrap_or_default();
        let top_k = args["top_k"].as_u64().unwrap_or(5) as usize;
        let opts = RetrieveOptions {
            top_k,
            rerank: false,
            ..RetrieveOptions::default()
        };
        let response = self.retrieval.retrieve(query, &opts, cancel).await?;
        if response.is_empty() {
            return Ok(ToolResult::ok("No matching documents."));
        }
        Ok(ToolResult::ok(response.packed_context))
    }

    async fn memory_search(&self, args: &Value) -> Result<ToolResult, Error> {
        let query = args["query"].as_str().unwrap_or_default();
        let k = args["k"].as_u64().unwrap_or(5) as usize;
        let hits = self
            .memory
            .archival_search(query, k)
            .await
            .map_err(Error::Memory)?;
        if hits.is_empty() {
            return Ok(ToolResult::ok("No matching memories."));
        }
        let text: String = hits
            .iter()
            .map(|(block, score)| format!("[{score:.2}] {}\n", block.text))
            .collect();
        Ok(ToolResult::ok(text))
    }

    async fn memory_append(&self, args: &Value) -> Result<ToolResult, Error> {
        let section = match args["section"].as_str().unwrap_or_default() {
            "persona" => CoreSection::Persona,
            "human" => CoreSection::Human,
            "system_facts" => CoreSection::SystemFacts,
            "user_facts" => CoreSection::UserFacts,
            other => CoreSection::Custom(other.to_string()),
        };
        let content = args["content"].as_str().unwrap_or_default();
        self.memory
            .core_append(section, content)
            .await
            .map_err(Error::Memory)?;
        Ok(ToolResult::ok("Core memory updated."))
    }

    async fn memory_insert(&self, args: &Value) -> Result<ToolResult, Error> {
        let text = args["text"].as_str().unwrap_or_default();
        let importance = args["importance"].as_f64().unwrap_or(0.5);
        self.memory
            .archival_insert(MemoryBlock::archival(text, importance).with_source("tool"))
            .await
            .map_err(Error::Memory)?;
        Ok(ToolResult::ok("Stored in archival memory."))
    }

    async fn graph_lookup(&self, args: &Value) -> Result<ToolResult, Error> {
        let name = args["entity"].as_str().unwrap_or_default();
        let depth = args["depth"].as_u64().unwrap_or(1) as usize;
        let Some(entity) = self.graph.entity_by_name(name, None).await else {
            return Ok(ToolResult::error(format!("entity '{name}' not found")));
        };
        let subgraph = self
            .graph
            .neighbors(&entity.id, depth, None)
            .await
            .map_err(Error::Graph)?;
        let serialized = subgraph.serialize();
        if serialized.is_empty() {
            return Ok(ToolResult::ok(format!(
                "{} ({}) has no recorded relations.",
                entity.canonical_name, entity.kind
            )));
        }
        Ok(ToolResult::ok(serialized))
    }

    async fn file_read(&self, args: &Value) -> Result<ToolResult, Error> {
        let path = args["path"].as_str().unwrap_or_default();
        let resolved = sandbox::validate_path(path, &self.data_root)
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(ToolResult::ok(content)),
            Err(e) => Ok(ToolResult::error(format!("read failed: {e}"))),
        }
    }

    async fn file_write(&self, args: &Value) -> Result<ToolResult, Error> {
        let path = args["path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();
        // Writes are restricted to the data root; anything else is INVALID.
        let resolved = sandbox::validate_path(path, &self.data_root)
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        if let Some(parent) = resolved.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => Ok(ToolResult::ok(format!("wrote {}", resolved.display()))),
            Err(e) => Ok(ToolResult::error(format!("write failed: {e}"))),
        }
    }
}

#[async_trait]
impl ToolProvider for PlatformTools {
    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "corpus_search".into(),
                description: Some("Hybrid search over the ingested corpus".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "top_k": { "type": "integer", "minimum": 0 }
                    },
                    "required": ["query"]
                }),
            },
            Tool {
                name: "corpus_delete_source".into(),
                description: Some(
                    "Delete an ingested source, cascading to its chunks, vectors, and graph references"
                        .into(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": { "source_id": { "type": "string" } },
                    "required": ["source_id"]
                }),
            },
            Tool {
                name: "memory_search".into(),
                description: Some("Search archival memory".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "k": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["query"]
                }),
            },
            Tool {
                name: "memory_append".into(),
                description: Some("Append to a core memory section".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "section": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["section", "content"]
                }),
            },
            Tool {
                name: "memory_insert".into(),
                description: Some("Store a fact in archival memory".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "importance": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "required": ["text"]
                }),
            },
            Tool {
                name: "graph_lookup".into(),
                description: Some("Look up an entity's neighborhood in the knowledge graph".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "entity": { "type": "string" },
                        "depth": { "type": "integer", "minimum": 1, "maximum": 5 }
                    },
                    "required": ["entity"]
                }),
            },
            Tool {
                name: "file_read".into(),
                description: Some("Read a file under the data root".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            },
            Tool {
                name: "file_write".into(),
                description: Some("Write a file under the data root".into()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["path", "content"]
                }),
            },
        ]
    }

    async fn call(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, Error> {
        debug!(tool = name, "platform tool call");
        match name {
            "corpus_search" => self.corpus_search(&args, cancel).await,
            "corpus_delete_source" => self.corpus_delete_source(&args).await,
            "memory_search" => self.memory_search(&args).await,
            "memory_append" => self.memory_append(&args).await,
            "memory_insert" => self.memory_insert(&args).await,
            "graph_lookup" => self.graph_lookup(&args).await,
            "file_read" => self.file_read(&args).await,
            "file_write" => self.file_write(&args).await,
            other => Err(Error::InvalidInput(format!("unknown tool {other}"))),
        }
    }
}

// --- Prompts ---

/// Built-in prompt templates.
pub struct BuiltinPrompts;

#[async_trait]
impl PromptProvider for BuiltinPrompts {
    fn prompts(&self) -> Vec<Prompt> {
        vec![
            Prompt {
                name: "research_brief".into(),
                description: Some("Structured research brief for a topic".into()),
                arguments: vec![PromptArgument {
                    name: "topic".into(),
                    description: Some("What to research".into()),
                    required: true,
                }],
            },
            Prompt {
                name: "grounded_answer".into(),
                description: Some("Answer a question strictly from provided context".into()),
                arguments: vec![
                    PromptArgument {
                        name: "question".into(),
                        description: Some("The question".into()),
                        required: true,
                    },
                    PromptArgument {
                        name: "context".into(),
                        description: Some("Supporting context".into()),
                        required: false,
                    },
                ],
            },
        ]
    }

    async fn get(&self, name: &str, args: Value) -> Result<Option<Vec<PromptMessage>>, Error> {
        let text = match name {
            "research_brief" => {
                let topic = args["topic"].as_str().unwrap_or("the topic");
                format!(
                    "Prepare a research brief on {topic}: background, key facts with \
                     sources, open questions, and a short summary."
                )
            }
            "grounded_answer" => {
                let question = args["question"].as_str().unwrap_or_default();
                let context = args["context"].as_str().unwrap_or_default();
                format!(
                    "Answer strictly from the context below. Cite the [n] anchors.\n\n\
                     Context:\n{context}\n\nQuestion: {question}"
                )
            }
            _ => return Ok(None),
        };
        Ok(Some(vec![PromptMessage {
            role: "user".into(),
            content: ContentItem::text(text),
        }]))
    }
}

// --- Tool registry (dispatcher facade) ---

/// The server's aggregate tool view, also usable by the ReAct loop through
/// [`ToolDispatcher`].
pub struct ToolRegistry {
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl ToolRegistry {
    pub fn new(providers: Vec<Arc<dyn ToolProvider>>) -> Self {
        Self { providers }
    }

    /// All advertised tools, in provider order.
    pub fn tools(&self) -> Vec<Tool> {
        self.providers.iter().flat_map(|p| p.tools()).collect()
    }

    /// The provider owning a tool name.
    pub fn provider_for(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers
            .iter()
            .find(|p| p.tools().iter().any(|t| t.name == name))
            .cloned()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn list_tools(&self) -> Vec<ToolSummary> {
        self.tools()
            .into_iter()
            .map(|t| ToolSummary {
                name: t.name,
                description: t.description.unwrap_or_default(),
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, Error> {
        let provider = self
            .provider_for(name)
            .ok_or_else(|| Error::InvalidInput(format!("tool not found: {name}")))?;
        let result = provider.call(name, args, &CancellationToken::new()).await?;
        let text: String = result
            .content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.as_str(),
                ContentItem::Image { .. } => "[image]",
            })
            .collect::<Vec<_>>()
            .join("\n");
        if result.is_error {
            return Ok(format!("error: {text}"));
        }
        Ok(text)
    }
}
