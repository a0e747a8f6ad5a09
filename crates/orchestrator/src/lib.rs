//! The coordinator.
//!
//! Entry point for task execution: routes the task, classifies it, builds
//! a plan, assembles per-step context, invokes workers, verifies the
//! synthesized answer against its sources, and merges the result. Failures
//! in non-critical subsystems degrade gracefully and are listed in the
//! response metadata; critical-path failures surface as errors.

pub mod classify;
pub mod react;

pub use react::{ReactLoop, ReactOutcome, StepOutcome};

use hearthmind_core::error::{Error, WorkerError};
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::memory::{MemoryBlock, RecallEntry};
use hearthmind_core::message::{ConversationId, Message, Role};
use hearthmind_core::plan::{Plan, TaskKind};
use hearthmind_core::retrieval::{RetrievalResponse, RetrieveOptions};
use hearthmind_core::tool::ToolDispatcher;
use hearthmind_core::worker::WorkerContext;
use hearthmind_core::{CancellationToken, ChunkStore, WorkerRegistry};
use hearthmind_config::OrchestratorConfig;
use hearthmind_feedback::{FeedbackStore, LearnedKnobs};
use hearthmind_memory::MemoryHandle;
use hearthmind_retrieval::RetrievalEngine;
use hearthmind_router::Router;
use hearthmind_sessions::SessionStore;
use hearthmind_trace::{SpanKind, Tracer};
use hearthmind_verify::Verifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The coordinator's final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    /// The answer text.
    pub content: String,

    /// Chunk IDs (and other source identifiers) backing the answer.
    pub sources: Vec<String>,

    /// Route, plan, verification, degradation, and tuning details.
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Trace ID of the request's root span.
    pub trace_id: String,
}

/// Coordinates routing, planning, workers, memory, and verification.
pub struct Coordinator {
    registry: Arc<WorkerRegistry>,
    router: Arc<Router>,
    memory: MemoryHandle,
    retrieval: Arc<RetrievalEngine>,
    store: Arc<dyn ChunkStore>,
    verifier: Arc<Verifier>,
    gateway: Arc<dyn Gateway>,
    tracer: Tracer,
    feedback: Option<Arc<FeedbackStore>>,
    sessions: Option<Arc<SessionStore>>,
    tools: Option<Arc<dyn ToolDispatcher>>,
    config: OrchestratorConfig,
    retrieval_top_k: usize,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        router: Arc<Router>,
        memory: MemoryHandle,
        retrieval: Arc<RetrievalEngine>,
        store: Arc<dyn ChunkStore>,
        gateway: Arc<dyn Gateway>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            router,
            memory,
            retrieval,
            store,
            verifier: Arc::new(Verifier::new()),
            gateway,
            tracer: Tracer::disabled(),
            feedback: None,
            sessions: None,
            tools: None,
            config,
            retrieval_top_k: 5,
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<FeedbackStore>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Attach the MCP tool registry for ReAct mode.
    pub fn with_tools(mut self, tools: Arc<dyn ToolDispatcher>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_retrieval_top_k(mut self, top_k: usize) -> Self {
        self.retrieval_top_k = top_k.max(1);
        self
    }

    /// Execute a task without session persistence.
    pub async fn execute(
        &self,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse, Error> {
        Tracer::scope(self.execute_inner(task, None, cancel)).await
    }

    /// Execute a task, appending the exchange to a conversation. Nothing
    /// is persisted when the task fails or is cancelled.
    pub async fn execute_in_conversation(
        &self,
        task: &str,
        conversation: &ConversationId,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse, Error> {
        Tracer::scope(self.execute_inner(task, Some(conversation), cancel)).await
    }

    /// Run the task through the ReAct loop (opt-in for complex tasks).
    /// Requires an attached tool dispatcher.
    pub async fn execute_react(
        &self,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<ReactOutcome, Error> {
        let tools = self
            .tools
            .clone()
            .ok_or_else(|| Error::InvalidInput("no tool dispatcher attached".into()))?;
        let react = ReactLoop::new(
            self.gateway.clone(),
            tools,
            self.tracer.clone(),
            self.config.max_iters,
        );
        Tracer::scope(async {
            let mut span = self.tracer.start_span("coordinator.react", SpanKind::Server);
            span.set_attr("task", serde_json::json!(task));
            let result = react.run(task, cancel).await;
            if let Err(e) = &result {
                span.set_error(e.to_string());
            }
            result
        })
        .await
    }

    async fn execute_inner(
        &self,
        task: &str,
        conversation: Option<&ConversationId>,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse, Error> {
        let mut root = self.tracer.start_span("coordinator.execute", SpanKind::Server);
        root.set_attr("task", serde_json::json!(task));
        let trace_id = root.context().trace_id.clone();

        let result = self
            .run_plan(task, conversation, cancel, &trace_id)
            .await;
        if let Err(e) = &result {
            root.set_error(e.to_string());
        }
        result
    }

    async fn run_plan(
        &self,
        task: &str,
        conversation: Option<&ConversationId>,
        cancel: &CancellationToken,
        trace_id: &str,
    ) -> Result<FinalResponse, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut degraded: Vec<String> = Vec::new();

        // 1. Route and classify.
        let route = self.router.best_route(task).await;
        let kind = classify::classify(task, &route);
        let plan = classify::build_plan(&Uuid::new_v4().to_string(), kind, task);
        info!(route = %route.route.name, kind = %kind, steps = plan.steps.len(), "task planned");

        // 2. Learned knobs nudge retrieval depth and regeneration sampling.
        let knobs = match &self.feedback {
            Some(store) => store.knobs().await.unwrap_or_default(),
            None => LearnedKnobs::default(),
        };

        // 3. Memory context and recent history.
        let memory_context = self
            .memory
            .build_context(Some(task), 3)
            .await
            .map_err(Error::Memory)?;
        let chat_history = self.chat_history().await;

        // 4. Evidence for knowledge-bearing plans.
        let evidence = if kind != TaskKind::Chat && self.plan_needs_evidence(&plan) {
            match self.gather_evidence(task, &knobs, cancel).await {
                Ok(response) => {
                    degraded.extend(response.degraded.iter().cloned());
                    Some(response)
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("evidence retrieval degraded: {e}");
                    degraded.push("retrieval".into());
                    None
                }
            }
        } else {
            None
        };

        let mut sources: BTreeSet<String> = evidence
            .iter()
            .flat_map(|r| r.results.iter().map(|c| c.chunk_id.clone()))
            .collect();
        let documents = evidence
            .as_ref()
            .filter(|r| !r.packed_context.is_empty())
            .map(|r| r.packed_context.clone());

        // 5. Execute the plan, carrying results forward.
        let mut previous_results: Option<String> = None;
        let mut content = String::new();
        let mut merged: Option<String> = None;
        for (position, step) in plan.steps.iter().enumerate() {
            // Cancellation is honored between steps, never mid-generation.
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let worker = self.registry.require(&step.worker_name).map_err(Error::Worker)?;
            let mut span = self
                .tracer
                .start_span(format!("worker.{}", step.worker_name), SpanKind::Internal);
            span.set_attr("step", serde_json::json!(position));

            let ctx = WorkerContext {
                documents: documents.clone(),
                previous_results: previous_results.clone(),
                memory_context: Some(memory_context.clone()),
                chat_history: if position == 0 {
                    chat_history.clone()
                } else {
                    Vec::new()
                },
            };

            let response = match worker.execute(&step.prompt, &ctx, cancel).await {
                Ok(response) => response,
                Err(WorkerError::Cancelled(_)) => return Err(Error::Cancelled),
                Err(e) => {
                    span.set_error(e.to_string());
                    return Err(Error::Worker(e));
                }
            };
            if !response.ok {
                let reason = response.error.unwrap_or_else(|| "worker failed".into());
                span.set_error(reason.clone());
                return Err(Error::Worker(WorkerError::ExecutionFailed {
                    worker: step.worker_name.clone(),
                    reason,
                }));
            }

            sources.extend(response.sources.iter().cloned());
            previous_results = Some(response.content.clone());
            if step.merge {
                merged = Some(response.content.clone());
            }
            content = response.content;
            debug!(worker = %step.worker_name, "step complete");
        }
        if let Some(merged) = merged {
            content = merged;
        }

        // 6. Verify against the retrieved chunks; reflect at most once.
        let mut verifier_score = None;
        let chunk_texts = self.chunk_texts(&sources).await;
        if !chunk_texts.is_empty() {
            let report = self.verifier.verify(&content, &chunk_texts);
            let mut score = report.overall_score;

            if score < self.config.reflect_threshold {
                match self
                    .reflect(task, &content, &chunk_texts, &knobs, cancel)
                    .await
                {
                    Ok(revised) => {
                        let second = self.verifier.verify(&revised, &chunk_texts);
                        if second.overall_score > score {
                            content = revised;
                            score = second.overall_score;
                        }
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        warn!("reflection degraded: {e}");
                        degraded.push("reflection".into());
                    }
                }

                if score < self.config.reflect_threshold {
                    if self.config.strict {
                        return Err(Error::VerificationFailed { score });
                    }
                    degraded.push("verification_failed".into());
                }
            }
            verifier_score = Some(score);
        }

        // 7. Memory and the episodic journal.
        let mut evicted = self
            .memory
            .add_message(Role::User, task)
            .await
            .map_err(Error::Memory)?;
        evicted += self
            .memory
            .add_message(Role::Assistant, &content)
            .await
            .map_err(Error::Memory)?;
        let mut recall = RecallEntry::new(
            "task_completed",
            format!("{kind} task handled via {}", route.route.name),
        );
        recall
            .context
            .insert("route".into(), serde_json::json!(route.route.name));
        if let Err(e) = self.memory.recall_log(recall).await {
            warn!("recall journal write failed: {e}");
        }

        // 8. Session persistence happens only after full success.
        if let (Some(sessions), Some(conversation_id)) = (&self.sessions, conversation) {
            let mut conv = match sessions.load(conversation_id).await {
                Ok(conv) => conv,
                Err(hearthmind_core::error::SessionError::NotFound(_)) => {
                    let mut conv = hearthmind_core::message::Conversation::new();
                    conv.id = conversation_id.clone();
                    conv
                }
                Err(e) => return Err(Error::Session(e)),
            };
            conv.push(Message::user(task));
            conv.push(Message::assistant(content.clone()));
            sessions.save(&conv).await.map_err(Error::Session)?;

            // Working-tier overflow triggers a conversation summary that
            // lands in archival memory.
            if evicted > 0 {
                let summary =
                    hearthmind_sessions::summarize(&conv, self.gateway.as_ref()).await;
                if !summary.is_empty()
                    && let Err(e) = self
                        .memory
                        .archival_insert(
                            MemoryBlock::archival(summary, 0.5).with_source("summary"),
                        )
                        .await
                {
                    warn!("summary archival failed: {e}");
                }
            }
        }

        // 9. Assemble the response.
        let mut metadata = serde_json::Map::new();
        metadata.insert("route".into(), serde_json::json!(route.route.name));
        metadata.insert("task_kind".into(), serde_json::json!(kind.to_string()));
        metadata.insert(
            "workers".into(),
            serde_json::json!(
                plan.steps
                    .iter()
                    .map(|s| s.worker_name.clone())
                    .collect::<Vec<_>>()
            ),
        );
        if let Some(score) = verifier_score {
            metadata.insert("verifier_score".into(), serde_json::json!(score));
        }
        if !degraded.is_empty() {
            metadata.insert("degraded".into(), serde_json::json!(degraded));
        }
        metadata.insert(
            "tuning".into(),
            serde_json::to_value(&knobs).unwrap_or_default(),
        );

        Ok(FinalResponse {
            content,
            sources: sources.into_iter().collect(),
            metadata,
            trace_id: trace_id.to_string(),
        })
    }

    fn plan_needs_evidence(&self, plan: &Plan) -> bool {
        plan.steps
            .iter()
            .any(|s| matches!(s.worker_name.as_str(), "research" | "assistant"))
    }

    async fn gather_evidence(
        &self,
        task: &str,
        knobs: &LearnedKnobs,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse, Error> {
        let top_k = (self.retrieval_top_k as i32 + knobs.retrieval_k_delta).max(1) as usize;
        let opts = RetrieveOptions {
            top_k,
            // The pre-pass stays single-generation per step; pairwise
            // reranking is reserved for explicit retrieval calls.
            rerank: false,
            ..RetrieveOptions::default()
        };
        let mut span = self.tracer.start_span("retrieve", SpanKind::Internal);
        span.set_attr("top_k", serde_json::json!(top_k));
        let result = self.retrieval.retrieve(task, &opts, cancel).await;
        if let Err(e) = &result {
            span.set_error(e.to_string());
        }
        result
    }

    async fn chat_history(&self) -> Vec<Message> {
        let Ok(blocks) = self.memory.working_snapshot().await else {
            return Vec::new();
        };
        blocks
            .iter()
            .rev()
            .take(6)
            .rev()
            .map(|b| match b.role {
                Some(Role::Assistant) => Message::assistant(&b.text),
                Some(Role::System) => Message::system(&b.text),
                Some(Role::Tool) => Message::tool(&b.text),
                _ => Message::user(&b.text),
            })
            .collect()
    }

    async fn chunk_texts(&self, sources: &BTreeSet<String>) -> Vec<String> {
        let mut texts = Vec::new();
        for id in sources {
            if let Ok(Some(chunk)) = self.store.get(id).await {
                texts.push(chunk.text);
            }
        }
        texts
    }

    /// Critic-guided single re-generation.
    async fn reflect(
        &self,
        task: &str,
        answer: &str,
        chunk_texts: &[String],
        knobs: &LearnedKnobs,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut span = self.tracer.start_span("reflect", SpanKind::Internal);

        let critique = match self.registry.get("critic") {
            Some(critic) => {
                let ctx = WorkerContext {
                    documents: Some(chunk_texts.join("\n")),
                    previous_results: Some(answer.to_string()),
                    ..WorkerContext::default()
                };
                match critic.execute(task, &ctx, cancel).await {
                    Ok(response) => response.content,
                    Err(WorkerError::Cancelled(_)) => return Err(Error::Cancelled),
                    Err(e) => {
                        span.set_error(e.to_string());
                        return Err(Error::Worker(e));
                    }
                }
            }
            None => String::from("Stay strictly within the provided sources."),
        };

        let prompt = format!(
            "## Sources\n{}\n\n## Question\n{task}\n\n## Previous answer\n{answer}\n\n\
             ## Review feedback\n{critique}\n\n\
             Rewrite the answer, fixing the issues. Use only facts from the sources.",
            chunk_texts.join("\n")
        );
        let opts = GenerateOptions::default()
            .with_temperature(0.7 + knobs.temperature_delta)
            .with_max_tokens((2048 + knobs.max_tokens_delta).max(1) as u32);

        self.gateway
            .generate(&prompt, &opts)
            .await
            .map_err(Error::Gateway)
    }
}
