//! Analyzer worker: structured analysis of provided material.

use async_trait::async_trait;
use hearthmind_core::error::WorkerError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::worker::{Worker, WorkerContext, WorkerResponse};
use hearthmind_core::CancellationToken;
use std::sync::Arc;

use crate::{check_cancelled, gateway_err};

const SYSTEM_PROMPT: &str = "You are an analysis specialist. Work strictly from the provided \
material, state assumptions explicitly, and structure your findings.";

/// What kind of analysis to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Summarize,
    Compare,
    Extract,
    Trend,
    Risk,
    Gap,
}

impl AnalysisKind {
    fn detect(task: &str) -> Self {
        let lower = task.to_lowercase();
        if lower.contains("compar") {
            Self::Compare
        } else if lower.contains("extract") || lower.contains("pull out") {
            Self::Extract
        } else if lower.contains("trend") || lower.contains("over time") {
            Self::Trend
        } else if lower.contains("risk") {
            Self::Risk
        } else if lower.contains("gap") || lower.contains("missing") {
            Self::Gap
        } else {
            Self::Summarize
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Compare => "compare",
            Self::Extract => "extract",
            Self::Trend => "trend",
            Self::Risk => "risk",
            Self::Gap => "gap",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Self::Summarize => "Summarize the key points with supporting detail.",
            Self::Compare => "Compare the items: similarities, differences, and a verdict.",
            Self::Extract => "Extract the requested facts as a structured list.",
            Self::Trend => "Identify trends over time and their likely drivers.",
            Self::Risk => "List the risks with likelihood, impact, and mitigations.",
            Self::Gap => "Identify what is missing and what to do about it.",
        }
    }
}

/// Analyzes provided material.
pub struct AnalyzerWorker {
    gateway: Arc<dyn Gateway>,
    capabilities: Vec<String>,
}

impl AnalyzerWorker {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            capabilities: vec!["analysis".into()],
        }
    }
}

#[async_trait]
impl Worker for AnalyzerWorker {
    fn name(&self) -> &str {
        "analyzer"
    }

    fn role(&self) -> &str {
        "Analyzes material: summaries, comparisons, trends, risks, gaps"
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

        let kind = AnalysisKind::detect(task);
        let mut prompt = ctx.render();
        prompt.push_str(&format!("## Task\n{task}\n\n{}\n", kind.instructions()));

        let opts = GenerateOptions::default().with_system(SYSTEM_PROMPT);
        let content = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| gateway_err(self.name(), e))?;

        Ok(WorkerResponse::ok(content)
            .with_metadata("analysis_kind", serde_json::json!(kind.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_gateway::testing::StaticGateway;

    #[test]
    fn kind_detection() {
        assert_eq!(AnalysisKind::detect("compare the vendors"), AnalysisKind::Compare);
        assert_eq!(AnalysisKind::detect("what is the trend over time"), AnalysisKind::Trend);
        assert_eq!(AnalysisKind::detect("assess the risk"), AnalysisKind::Risk);
        assert_eq!(AnalysisKind::detect("find the gaps"), AnalysisKind::Gap);
        assert_eq!(AnalysisKind::detect("look at this"), AnalysisKind::Summarize);
    }

    #[tokio::test]
    async fn analyzer_tags_the_kind() {
        let gateway = Arc::new(StaticGateway::new(vec!["Vendor A is cheaper; Vendor B is faster."]));
        let worker = AnalyzerWorker::new(gateway);

        let response = worker
            .execute(
                "Compare vendor A and vendor B",
                &WorkerContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.metadata["analysis_kind"], "compare");
    }
}
