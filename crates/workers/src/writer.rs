//! Writer worker: formatted prose with detected format and tone.

use async_trait::async_trait;
use hearthmind_core::error::WorkerError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::worker::{Worker, WorkerContext, WorkerResponse};
use hearthmind_core::CancellationToken;
use std::sync::Arc;

use crate::{check_cancelled, gateway_err};

const SYSTEM_PROMPT: &str = "You are a professional writer. Produce polished, well-structured \
prose in the requested format and tone. Use any provided research or analysis faithfully.";

/// Document format the writer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    Email,
    Report,
    Summary,
    Proposal,
    Doc,
    Slides,
}

impl WriteFormat {
    /// Keyword detection over the task text; defaults to `Doc`.
    fn detect(task: &str) -> Self {
        let lower = task.to_lowercase();
        if lower.contains("email") || lower.contains("mail to") {
            Self::Email
        } else if lower.contains("report") {
            Self::Report
        } else if lower.contains("summary") || lower.contains("summarize") {
            Self::Summary
        } else if lower.contains("proposal") {
            Self::Proposal
        } else if lower.contains("slide") || lower.contains("presentation") {
            Self::Slides
        } else {
            Self::Doc
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Report => "report",
            Self::Summary => "summary",
            Self::Proposal => "proposal",
            Self::Doc => "doc",
            Self::Slides => "slides",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Self::Email => "Write it as an email with a subject line, greeting, body, and sign-off.",
            Self::Report => "Write it as a report with a title, sections, and a conclusion.",
            Self::Summary => "Write a concise summary capturing the key points.",
            Self::Proposal => "Write it as a proposal: context, proposal, benefits, next steps.",
            Self::Doc => "Write a clear, well-structured document.",
            Self::Slides => "Write slide-by-slide content: a title and bullets per slide.",
        }
    }
}

/// Writing tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTone {
    Formal,
    Friendly,
    Technical,
    Persuasive,
}

impl WriteTone {
    fn detect(task: &str) -> Self {
        let lower = task.to_lowercase();
        if lower.contains("friendly") || lower.contains("casual") {
            Self::Friendly
        } else if lower.contains("technical") {
            Self::Technical
        } else if lower.contains("persuasive") || lower.contains("convince") {
            Self::Persuasive
        } else {
            Self::Formal
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Formal => "formal",
            Self::Friendly => "friendly",
            Self::Technical => "technical",
            Self::Persuasive => "persuasive",
        }
    }
}

/// Produces formatted prose.
pub struct WriterWorker {
    gateway: Arc<dyn Gateway>,
    capabilities: Vec<String>,
}

impl WriterWorker {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            capabilities: vec!["writing".into(), "formatting".into()],
        }
    }
}

#[async_trait]
impl Worker for WriterWorker {
    fn name(&self) -> &str {
        "writer"
    }

    fn role(&self) -> &str {
        "Writes formatted prose (emails, reports, summaries, proposals)"
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

        let format = WriteFormat::detect(task);
        let tone = WriteTone::detect(task);

        let mut prompt = ctx.render();
        prompt.push_str(&format!(
            "## Task\n{task}\n\n{} Keep the tone {}.\n",
            format.instructions(),
            tone.as_str()
        ));

        let opts = GenerateOptions::default().with_system(SYSTEM_PROMPT);
        let content = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| gateway_err(self.name(), e))?;

        Ok(WorkerResponse::ok(content)
            .with_metadata("format", serde_json::json!(format.as_str()))
            .with_metadata("tone", serde_json::json!(tone.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_gateway::testing::StaticGateway;

    #[test]
    fn format_detection() {
        assert_eq!(WriteFormat::detect("Write an email to the manager"), WriteFormat::Email);
        assert_eq!(WriteFormat::detect("Draft the Q3 report"), WriteFormat::Report);
        assert_eq!(WriteFormat::detect("prepare slides for monday"), WriteFormat::Slides);
        assert_eq!(WriteFormat::detect("write something"), WriteFormat::Doc);
    }

    #[test]
    fn tone_detection() {
        assert_eq!(WriteTone::detect("a friendly note"), WriteTone::Friendly);
        assert_eq!(WriteTone::detect("technical deep dive"), WriteTone::Technical);
        assert_eq!(WriteTone::detect("convince the board"), WriteTone::Persuasive);
        assert_eq!(WriteTone::detect("write an email"), WriteTone::Formal);
    }

    #[tokio::test]
    async fn writer_reports_detected_format_and_tone() {
        let gateway = Arc::new(StaticGateway::new(vec![
            "Subject: Q3 Sales\n\nDear team,\n\n...\n\nBest regards",
        ]));
        let worker = WriterWorker::new(gateway.clone());

        let response = worker
            .execute(
                "Write a friendly email about Q3 sales",
                &WorkerContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.metadata["format"], "email");
        assert_eq!(response.metadata["tone"], "friendly");
        assert!(response.content.starts_with("Subject:"));
        // The format instructions reached the prompt.
        assert!(gateway.recorded_prompts()[0].contains("subject line"));
    }

    #[tokio::test]
    async fn previous_results_flow_into_the_prompt() {
        let gateway = Arc::new(StaticGateway::new(vec!["done"]));
        let worker = WriterWorker::new(gateway.clone());
        let ctx = WorkerContext {
            previous_results: Some("Research findings: sales rose 12%.".into()),
            ..WorkerContext::default()
        };

        worker
            .execute("Write a report", &ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert!(gateway.recorded_prompts()[0].contains("sales rose 12%"));
    }
}
