//! Stack assembly: one place that wires every subsystem together from
//! configuration. Commands pick the pieces they need.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hearthmind_config::AppConfig;
use hearthmind_core::error::Error;
use hearthmind_core::{CancellationToken, Gateway, WorkerRegistry};
use hearthmind_feedback::FeedbackStore;
use hearthmind_graph::KnowledgeGraph;
use hearthmind_index::{SqliteChunkStore, SqliteVectorIndex};
use hearthmind_mcp::types::{Tool, ToolResult};
use hearthmind_mcp::{
    BuiltinPrompts, CorpusResources, McpServer, MemoryResources, PlatformTools, ToolProvider,
    ToolRegistry,
};
use hearthmind_memory::{MemoryHandle, SqliteMemoryStore};
use hearthmind_orchestrator::Coordinator;
use hearthmind_retrieval::RetrievalEngine;
use hearthmind_router::Router;
use hearthmind_sessions::SessionStore;
use hearthmind_trace::{ConsoleExporter, SpanExporter, SqliteExporter, Tracer};
use hearthmind_workers::default_registry;
use serde_json::{json, Value};
use std::sync::Arc;

/// The fully wired platform.
pub struct App {
    pub config: AppConfig,
    pub tracer: Tracer,
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<SqliteChunkStore>,
    pub index: Arc<SqliteVectorIndex>,
    pub graph: Arc<KnowledgeGraph>,
    pub retrieval: Arc<RetrievalEngine>,
    pub memory: MemoryHandle,
    pub coordinator: Arc<Coordinator>,
    pub mcp: Arc<McpServer>,
}

impl App {
    /// Build everything from configuration.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let tracer = build_tracer(&config).await?;
        let gateway = hearthmind_gateway::from_config(&config.gateway);

        let store = Arc::new(
            SqliteChunkStore::new(
                config
                    .chunks_dir()
                    .join("chunks.db")
                    .to_str()
                    .context("non-utf8 data root")?,
            )
            .await?,
        );
        let index = Arc::new(
            SqliteVectorIndex::new(
                config
                    .vectors_dir()
                    .join("vectors.db")
                    .to_str()
                    .context("non-utf8 data root")?,
                config.gateway.dimension,
            )
            .await?,
        );
        let graph = Arc::new(KnowledgeGraph::open(&config.graph_dir()).await?);

        let retrieval = Arc::new(
            RetrievalEngine::new(
                store.clone(),
                index.clone(),
                gateway.clone(),
                config.retrieval.clone(),
            )
            .with_graph(graph.clone()),
        );

        let memory_store = Arc::new(
            SqliteMemoryStore::new(
                config
                    .memory_dir()
                    .join("memory.db")
                    .to_str()
                    .context("non-utf8 data root")?,
            )
            .await?,
        );
        let memory =
            hearthmind_memory::spawn(config.memory.clone(), memory_store, gateway.clone()).await?;

        let sessions = Arc::new(
            SessionStore::new(
                config
                    .sessions_dir()
                    .join("sessions.db")
                    .to_str()
                    .context("non-utf8 data root")?,
            )
            .await?,
        );
        let feedback = Arc::new(
            FeedbackStore::new(
                config
                    .feedback_dir()
                    .join("feedback.db")
                    .to_str()
                    .context("non-utf8 data root")?,
            )
            .await?,
        );

        let registry: Arc<WorkerRegistry> =
            Arc::new(default_registry(gateway.clone(), retrieval.clone()));
        let router = Arc::new(
            Router::with_defaults(gateway.clone(), config.router.clone())
                .await
                .map_err(Error::Router)?,
        );

        let tools = Arc::new(ToolRegistry::new(vec![Arc::new(PlatformTools::new(
            store.clone(),
            index.clone(),
            retrieval.clone(),
            memory.clone(),
            graph.clone(),
            config.data_root.clone(),
        ))]));

        let coordinator = Arc::new(
            Coordinator::new(
                registry,
                router,
                memory.clone(),
                retrieval.clone(),
                store.clone(),
                gateway.clone(),
                config.orchestrator.clone(),
            )
            .with_tracer(tracer.clone())
            .with_feedback(feedback)
            .with_sessions(sessions)
            .with_tools(tools.clone())
            .with_retrieval_top_k(config.retrieval.top_k),
        );

        // The coordinator itself is exposed as an MCP tool alongside the
        // platform tools.
        let mcp_tools = Arc::new(ToolRegistry::new(vec![
            Arc::new(PlatformTools::new(
                store.clone(),
                index.clone(),
                retrieval.clone(),
                memory.clone(),
                graph.clone(),
                config.data_root.clone(),
            )),
            Arc::new(CoordinatorTools {
                coordinator: coordinator.clone(),
            }),
        ]));
        let mcp = McpServer::new(
            "hearthmind",
            env!("CARGO_PKG_VERSION"),
            vec![
                Arc::new(CorpusResources::new(store.clone())),
                Arc::new(MemoryResources::new(memory.clone())),
            ],
            mcp_tools,
            vec![Arc::new(BuiltinPrompts)],
            config.data_root.clone(),
            config.mcp.page_size,
        );

        Ok(Self {
            config,
            tracer,
            gateway,
            store,
            index,
            graph,
            retrieval,
            memory,
            coordinator,
            mcp,
        })
    }
}

async fn build_tracer(config: &AppConfig) -> Result<Tracer> {
    let exporters: Vec<Arc<dyn SpanExporter>> = match config.trace.export.as_str() {
        "none" => Vec::new(),
        "console" => vec![Arc::new(ConsoleExporter)],
        _ => vec![Arc::new(
            SqliteExporter::new(
                config
                    .traces_dir()
                    .join("traces.db")
                    .to_str()
                    .context("non-utf8 data root")?,
            )
            .await?,
        )],
    };
    Ok(Tracer::with_batch_size(exporters, config.trace.batch_size))
}

/// Exposes the coordinator as the `ask` MCP tool.
struct CoordinatorTools {
    coordinator: Arc<Coordinator>,
}

#[async_trait]
impl ToolProvider for CoordinatorTools {
    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "ask".into(),
                description: Some(
                    "Run a task through the assistant: routing, retrieval, workers, verification"
                        .into(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": { "task": { "type": "string" } },
                    "required": ["task"]
                }),
            },
            Tool {
                name: "reason".into(),
                description: Some(
                    "Run a complex task through the iterative reasoning loop with tool use".into(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": { "task": { "type": "string" } },
                    "required": ["task"]
                }),
            },
        ]
    }

    async fn call(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<ToolResult, Error> {
        let task = args["task"].as_str().unwrap_or_default();
        match name {
            "reason" => {
                let outcome = self.coordinator.execute_react(task, cancel).await?;
                let mut text = outcome.answer;
                text.push_str(&format!(
                    "\n\n({} iterations{})",
                    outcome.iterations,
                    if outcome.completed { "" } else { ", budget exhausted" }
                ));
                Ok(ToolResult::ok(text))
            }
            _ => {
                let response = self.coordinator.execute(task, cancel).await?;
                let mut text = response.content;
                if !response.sources.is_empty() {
                    text.push_str(&format!("\n\nSources: {}", response.sources.join(", ")));
                }
                Ok(ToolResult::ok(text))
            }
        }
    }
}
