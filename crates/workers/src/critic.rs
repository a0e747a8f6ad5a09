//! Critic worker: scores an answer and proposes revisions.

use async_trait::async_trait;
use hearthmind_core::error::WorkerError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::worker::{Worker, WorkerContext, WorkerResponse};
use hearthmind_core::CancellationToken;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{check_cancelled, gateway_err};

const SYSTEM_PROMPT: &str = "You are a critical reviewer. Score the answer on each dimension \
from 0.0 to 1.0 and give concrete revision advice.";

/// The five scoring dimensions.
pub const DIMENSIONS: [&str; 5] = [
    "accuracy",
    "relevance",
    "completeness",
    "clarity",
    "helpfulness",
];

/// Parsed critic scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticScores {
    pub accuracy: f64,
    pub relevance: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub helpfulness: f64,
}

impl CriticScores {
    pub fn average(&self) -> f64 {
        (self.accuracy + self.relevance + self.completeness + self.clarity + self.helpfulness)
            / 5.0
    }
}

/// Scores answers across five dimensions.
pub struct CriticWorker {
    gateway: Arc<dyn Gateway>,
    capabilities: Vec<String>,
}

impl CriticWorker {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            capabilities: vec!["critique".into(), "scoring".into()],
        }
    }

    /// Parse `dimension: score` lines; missing dimensions default to 0.5.
    pub fn parse_scores(output: &str) -> CriticScores {
        let mut values = [0.5f64; 5];
        for line in output.lines() {
            let Some((name, raw)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_lowercase();
            let Some(idx) = DIMENSIONS.iter().position(|d| name.contains(d)) else {
                continue;
            };
            if let Ok(score) = raw
                .trim()
                .trim_end_matches(|c: char| !c.is_ascii_digit())
                .parse::<f64>()
            {
                values[idx] = score.clamp(0.0, 1.0);
            }
        }
        CriticScores {
            accuracy: values[0],
            relevance: values[1],
            completeness: values[2],
            clarity: values[3],
            helpfulness: values[4],
        }
    }
}

#[async_trait]
impl Worker for CriticWorker {
    fn name(&self) -> &str {
        "critic"
    }

    fn role(&self) -> &str {
        "Scores answers on accuracy, relevance, completeness, clarity, helpfulness"
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    /// The task is the original question; the answer to critique arrives in
    /// `ctx.previous_results`.
    async fn execute(
        &self,
        task: &str,
        ctx: &WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<WorkerResponse, WorkerError> {
        check_cancelled(self.name(), cancel)?;

        let answer = ctx.previous_results.as_deref().unwrap_or("");
        let mut prompt = String::new();
        if let Some(docs) = &ctx.documents {
            prompt.push_str("## Source Documents\n");
            prompt.push_str(docs);
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "## Question\n{task}\n\n## Answer to review\n{answer}\n\n\
             Score each dimension on its own line as `dimension: 0.0-1.0` \
             ({}), then list concrete revisions.",
            DIMENSIONS.join(", ")
        ));

        let opts = GenerateOptions::default()
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.2);
        let content = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| gateway_err(self.name(), e))?;

        let scores = Self::parse_scores(&content);
        Ok(WorkerResponse::ok(content)
            .with_metadata("scores", serde_json::to_value(&scores).unwrap_or_default())
            .with_metadata("average", serde_json::json!(scores.average())))
    }
}
