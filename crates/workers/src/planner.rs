//! Planner worker: decomposes a task into ordered sub-tasks.

use async_trait::async_trait;
use hearthmind_core::error::WorkerError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::worker::{Worker, WorkerContext, WorkerResponse};
use hearthmind_core::CancellationToken;
use std::sync::Arc;

use crate::{check_cancelled, gateway_err};

const SYSTEM_PROMPT: &str = "You are a planning specialist. Decompose tasks into a short \
ordered list of sub-tasks, each assigned to one worker.";

/// Workers a plan may reference.
const KNOWN_WORKERS: [&str; 4] = ["research", "analyzer", "writer", "assistant"];

/// Decomposes tasks into `worker: sub-task` lines.
pub struct PlannerWorker {
    gateway: Arc<dyn Gateway>,
    capabilities: Vec<String>,
}

impl PlannerWorker {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            capabilities: vec!["decomposition".into()],
        }
    }

    /// Parse `worker: sub-task` lines, keeping only known workers.
    pub fn parse_steps(output: &str) -> Vec<(String, String)> {
        output
            .lines()
            .filter_map(|line| {
                let line = line.trim().trim_start_matches(['-', '*', ' ']);
                let (worker, task) = line.split_once(':')?;
                let worker = worker
                    .trim()
                    .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                    .trim()
                    .to_lowercase();
                let task = task.trim();
                (KNOWN_WORKERS.contains(&worker.as_str()) && !task.is_empty())
                    .then(|| (worker, task.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl Worker for PlannerWorker {
    fn name(&self) -> &str {
        "planner"
    }

    fn role(&self) -> &str {
        "Decomposes complex tasks into ordered worker assignments"
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

        let mut prompt = ctx.render();
        prompt.push_str(&format!(
            "Decompose this task into 2-4 ordered sub-tasks.\n\
             Available workers: {}.\n\
             Respond with one line per sub-task: WORKER: description\n\n\
             Task: {task}",
            KNOWN_WORKERS.join(", ")
        ));

        let opts = GenerateOptions::default()
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.3);
        let content = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| gateway_err(self.name(), e))?;

        let steps = Self::parse_steps(&content);
        let steps_json: Vec<serde_json::Value> = steps
            .iter()
            .map(|(w, t)| serde_json::json!({"worker": w, "task": t}))
            .collect();

        Ok(WorkerResponse::ok(content)
            .with_metadata("steps", serde_json::Value::Array(steps_json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_gateway::testing::StaticGateway;

    #[test]
    fn parse_accepts_numbered_and_bulleted_lines() {
        let steps = PlannerWorker::parse_steps(
            "1. research: Find the Q3 sales numbers\n\
             - writer: Draft the email\n\
             chatter from the model\n\
             unknown_worker: skip me\n\
             analyzer:",
        );
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].0, "research");
        assert_eq!(steps[1], ("writer".into(), "Draft the email".into()));
    }

    #[tokio::test]
    async fn planner_emits_structured_steps() {
        let gateway = Arc::new(StaticGateway::new(vec![
            "research: Gather the report data\nwriter: Write the summary email",
        ]));
        let worker = PlannerWorker::new(gateway);

        let response = worker
            .execute(
                "Research the report and email a summary",
                &WorkerContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let steps = response.metadata["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["worker"], "research");
        assert_eq!(steps[1]["worker"], "writer");
    }
}
