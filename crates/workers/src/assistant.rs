//! Assistant worker: conversational answering with optional retrieval.

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

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer directly and concisely. \
When documents are provided, ground your answer in them and cite their [n] anchors.";

/// Signals that a query likely needs the corpus rather than chit-chat.
fn looks_like_knowledge_question(task: &str) -> bool {
    let lower = task.to_lowercase();
    let interrogative = lower.contains('?')
        || lower.starts_with("what")
        || lower.starts_with("how")
        || lower.starts_with("when")
        || lower.starts_with("where")
        || lower.starts_with("who")
        || lower.starts_with("which");
    let small_talk = ["hello", "hi ", "thanks", "thank you", "how are you"]
        .iter()
        .any(|p| lower.starts_with(p) || lower == p.trim());
    interrogative && !small_talk
}

/// Chat plus optional retrieval.
pub struct AssistantWorker {
    gateway: Arc<dyn Gateway>,
    retrieval: Arc<RetrievalEngine>,
    capabilities: Vec<String>,
}

impl AssistantWorker {
    pub fn new(gateway: Arc<dyn Gateway>, retrieval: Arc<RetrievalEngine>) -> Self {
        Self {
            gateway,
            retrieval,
            capabilities: vec!["chat".into(), "retrieval".into()],
        }
    }
}

#[async_trait]
impl Worker for AssistantWorker {
    fn name(&self) -> &str {
        "assistant"
    }

    fn role(&self) -> &str {
        "Conversational answering with optional document retrieval"
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

        let mut sources = Vec::new();
        let mut documents = ctx.documents.clone();
        if documents.is_none() && looks_like_knowledge_question(task) {
            let opts = RetrieveOptions {
                rerank: false,
                ..RetrieveOptions::default()
            };
            match self.retrieval.retrieve(task, &opts, cancel).await {
                Ok(response) if !response.is_empty() => {
                    sources = response.results.iter().map(|r| r.chunk_id.clone()).collect();
                    documents = Some(response.packed_context);
                }
                Ok(_) => {}
                Err(e) => debug!("assistant retrieval degraded: {e}"),
            }
        }
        check_cancelled(self.name(), cancel)?;

        let mut prompt = String::new();
        if let Some(memory) = &ctx.memory_context {
            prompt.push_str(memory);
            prompt.push('\n');
        }
        if let Some(docs) = &documents {
            prompt.push_str("## Retrieved Documents\n");
            prompt.push_str(docs);
            prompt.push('\n');
        }
        if !ctx.chat_history.is_empty() {
            prompt.push_str("## Conversation\n");
            for msg in &ctx.chat_history {
                prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
            }
        }
        prompt.push_str(&format!("## User\n{task}\n"));

        let opts = GenerateOptions::default().with_system(SYSTEM_PROMPT);
        let content = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| gateway_err(self.name(), e))?;

        Ok(WorkerResponse::ok(content).with_sources(sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_retrieval;
    use hearthmind_gateway::testing::StaticGateway;

    #[test]
    fn knowledge_question_detection() {
        assert!(looks_like_knowledge_question("What is the leave policy?"));
        assert!(looks_like_knowledge_question("how many days do I get"));
        assert!(!looks_like_knowledge_question("hello there"));
        assert!(!looks_like_knowledge_question("thanks!"));
    }

    #[tokio::test]
    async fn question_triggers_retrieval_and_sources() {
        let gateway = Arc::new(StaticGateway::new(vec!["You get 20 days [1]."]));
        let (_dir, retrieval) = seeded_retrieval(
            gateway.clone(),
            &[("policy.txt", "Annual leave is 20 working days after one year.")],
        )
        .await;

        let worker = AssistantWorker::new(gateway, retrieval);
        let response = worker
            .execute(
                "How many days of annual leave?",
                &WorkerContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.ok);
        assert!(!response.sources.is_empty());
    }

    #[tokio::test]
    async fn small_talk_skips_retrieval() {
        let gateway = Arc::new(StaticGateway::new(vec!["Hi! How can I help?"]));
        let (_dir, retrieval) =
            seeded_retrieval(gateway.clone(), &[("a.txt", "irrelevant corpus")]).await;

        let worker = AssistantWorker::new(gateway.clone(), retrieval);
        let response = worker
            .execute("hello", &WorkerContext::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.sources.is_empty());
        assert!(!gateway.recorded_prompts()[0].contains("Retrieved Documents"));
    }
}
