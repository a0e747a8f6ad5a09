//! Research worker: retrieval plus grounded synthesis.

use async_trait::async_trait;
use hearthmind_core::error::WorkerError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::retrieval::RetrieveOptions;
use hearthmind_core::worker::{Worker, WorkerContext, WorkerResponse};
use hearthmind_core::CancellationToken;
use hearthmind_retrieval::RetrievalEngine;
use std::sync::Arc;
use tracing::debug;

use crate::{check_cancelled, gateway_err};

const SYSTEM_PROMPT: &str = "You are a research specialist. Ground every claim in the \
retrieved documents and cite them with their [n] anchors. Say so plainly when the \
documents do not answer the question.";

/// Retrieves evidence and synthesizes an answer with citations.
pub struct ResearchWorker {
    gateway: Arc<dyn Gateway>,
    retrieval: Arc<RetrievalEngine>,
    capabilities: Vec<String>,
}

impl ResearchWorker {
    pub fn new(gateway: Arc<dyn Gateway>, retrieval: Arc<RetrievalEngine>) -> Self {
        Self {
            gateway,
            retrieval,
            capabilities: vec!["retrieval".into(), "synthesis".into()],
        }
    }
}

#[async_trait]
impl Worker for ResearchWorker {
    fn name(&self) -> &str {
        "research"
    }

    fn role(&self) -> &str {
        "Finds and synthesizes information from the corpus"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    async fn execute(
        &self,
        task: &str,
        ctx: &WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<WorkerResponse, WorkerError> {
        check_cancelled(self.name(), cancel)?;

        // Reuse documents handed in by the coordinator; retrieve otherwise.
        let (documents, sources) = match &ctx.documents {
            Some(docs) => (docs.clone(), Vec::new()),
            None => {
                let opts = RetrieveOptions {
                    // Synthesis is the one generation this worker spends.
                    rerank: false,
                    ..RetrieveOptions::default()
                };
                let response = self
                    .retrieval
                    .retrieve(task, &opts, cancel)
                    .await
                    .map_err(|e| WorkerError::ExecutionFailed {
                        worker: self.name().into(),
                        reason: e.to_string(),
                    })?;
                let sources = response
                    .results
                    .iter()
                    .map(|r| r.chunk_id.clone())
                    .collect();
                (response.packed_context, sources)
            }
        };
        check_cancelled(self.name(), cancel)?;

        debug!(task = %&task[..task.len().min(60)], "research: synthesizing");

        let mut prompt = String::new();
        let rendered = ctx.render();
        if !rendered.is_empty() {
            prompt.push_str(&rendered);
            prompt.push('\n');
        }
        if !documents.is_empty() {
            prompt.push_str("## Retrieved Documents\n");
            prompt.push_str(&documents);
            prompt.push('\n');
        }
        prompt.push_str(&format!("## Task\n{task}\n"));

        let opts = GenerateOptions::default().with_system(SYSTEM_PROMPT);
        let content = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| gateway_err(self.name(), e))?;

        let mut response = WorkerResponse::ok(content).with_sources(sources);
        if documents.is_empty() {
            response = response.with_metadata("no_evidence", serde_json::json!(true));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_retrieval;
    use hearthmind_gateway::testing::StaticGateway;

    #[tokio::test]
    async fn research_retrieves_and_reports_sources() {
        let gateway = Arc::new(StaticGateway::new(vec![
            "Annual leave is 20 working days [1].",
        ]));
        let (_dir, retrieval) = seeded_retrieval(
            gateway.clone(),
            &[("policy.txt", "Annual leave is 20 working days for employees after one year.")],
        )
        .await;

        let worker = ResearchWorker::new(gateway.clone(), retrieval);
        let response = worker
            .execute(
                "How many days of annual leave?",
                &WorkerContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.ok);
        assert!(response.content.contains("20"));
        assert!(!response.sources.is_empty());
        // The synthesized prompt carried the retrieved anchor.
        let prompts = gateway.recorded_prompts();
        assert!(prompts.iter().any(|p| p.contains("[1]")));
    }

    #[tokio::test]
    async fn provided_documents_skip_retrieval() {
        let gateway = Arc::new(StaticGateway::new(vec!["Based on [1], the answer is yes."]));
        let (_dir, retrieval) = seeded_retrieval(gateway.clone(), &[]).await;

        let ctx = WorkerContext {
            documents: Some("[1] The vote passed unanimously.".into()),
            ..WorkerContext::default()
        };
        let worker = ResearchWorker::new(gateway, retrieval);
        let response = worker
            .execute("Did the vote pass?", &ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.ok);
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_before_generation() {
        let gateway = Arc::new(StaticGateway::new(vec![]));
        let (_dir, retrieval) = seeded_retrieval(gateway.clone(), &[]).await;
        let worker = ResearchWorker::new(gateway, retrieval);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = worker
            .execute("anything", &WorkerContext::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled(_)));
    }
}
