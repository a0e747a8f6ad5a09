//! ReAct mode: a bounded Thought → Action → Observation loop.
//!
//! Actions are tool invocations through the MCP tool registry (via the
//! [`ToolDispatcher`] contract). Loop control uses a tagged
//! [`StepOutcome`], not control-flow errors: the loop inspects the tag
//! and stops on `FinalAnswer` or when iterations are exhausted. Each
//! iteration is a child span.

use hearthmind_core::error::Error;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::tool::ToolDispatcher;
use hearthmind_core::CancellationToken;
use hearthmind_trace::{SpanKind, Tracer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One step of the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Thought(String),
    Action {
        tool: String,
        args: serde_json::Value,
    },
    Observation(String),
    FinalAnswer(String),
}

/// The finished loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactOutcome {
    /// The final answer (best-effort when iterations ran out).
    pub answer: String,

    /// The full reasoning trace, in order.
    pub trace: Vec<StepOutcome>,

    /// Iterations used.
    pub iterations: u32,

    /// Whether the loop ended on an explicit final answer.
    pub completed: bool,
}

/// The ReAct runner.
pub struct ReactLoop {
    gateway: Arc<dyn Gateway>,
    tools: Arc<dyn ToolDispatcher>,
    tracer: Tracer,
    max_iters: u32,
}

impl ReactLoop {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        tools: Arc<dyn ToolDispatcher>,
        tracer: Tracer,
        max_iters: u32,
    ) -> Self {
        Self {
            gateway,
            tools,
            tracer,
            max_iters,
        }
    }

    /// Run the loop for a task.
    pub async fn run(&self, task: &str, cancel: &CancellationToken) -> Result<ReactOutcome, Error> {
        if self.max_iters == 0 {
            return Err(Error::InvalidInput(
                "react loop requires max_iters >= 1".into(),
            ));
        }

        let tool_list: String = self
            .tools
            .list_tools()
            .await
            .iter()
            .map(|t| format!("- {}: {}\n", t.name, t.description))
            .collect();

        let mut trace: Vec<StepOutcome> = Vec::new();
        let mut transcript = String::new();
        let opts = GenerateOptions::default().with_temperature(0.2).with_system(
            "You reason step by step. Each turn, output either:\n\
             Thought: <reasoning>\nAction: <tool_name> <json arguments>\n\
             or\nThought: <reasoning>\nFinal Answer: <answer>",
        );

        for iteration in 1..=self.max_iters {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut span = self
                .tracer
                .start_span(format!("react.iteration.{iteration}"), SpanKind::Internal);

            let prompt = format!(
                "Available tools:\n{tool_list}\nTask: {task}\n\n{transcript}"
            );
            let output = self
                .gateway
                .generate(&prompt, &opts)
                .await
                .map_err(Error::Gateway)?;

            let steps = parse_steps(&output);
            for step in steps {
                match step {
                    StepOutcome::Thought(thought) => {
                        span.set_attr("thought", serde_json::json!(thought.clone()));
                        transcript.push_str(&format!("Thought: {thought}\n"));
                        trace.push(StepOutcome::Thought(thought));
                    }
                    StepOutcome::Action { tool, args } => {
                        span.set_attr("tool", serde_json::json!(tool.clone()));
                        transcript.push_str(&format!("Action: {tool} {args}\n"));
                        trace.push(StepOutcome::Action {
                            tool: tool.clone(),
                            args: args.clone(),
                        });

                        let observation = match self.tools.call_tool(&tool, args).await {
                            Ok(result) => result,
                            Err(e) => format!("tool error: {e}"),
                        };
                        transcript.push_str(&format!("Observation: {observation}\n"));
                        trace.push(StepOutcome::Observation(observation));
                    }
                    StepOutcome::FinalAnswer(answer) => {
                        trace.push(StepOutcome::FinalAnswer(answer.clone()));
                        debug!(iterations = iteration, "react loop: final answer");
                        return Ok(ReactOutcome {
                            answer,
                            trace,
                            iterations: iteration,
                            completed: true,
                        });
                    }
                    StepOutcome::Observation(_) => {
                        // Observations come from tool dispatch, not the model.
                    }
                }
            }
        }

        // Iterations exhausted: surface the last thought as a best effort.
        let answer = trace
            .iter()
            .rev()
            .find_map(|s| match s {
                StepOutcome::Thought(t) => Some(t.clone()),
                StepOutcome::Observation(o) => Some(o.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "No conclusion reached within the iteration budget.".into());

        Ok(ReactOutcome {
            answer,
            trace,
            iterations: self.max_iters,
            completed: false,
        })
    }
}

/// Parse one model turn into outcomes. An action consumes the rest of its
/// line as `<tool> <json-args>`; a missing JSON object defaults to `{}`.
pub fn parse_steps(output: &str) -> Vec<StepOutcome> {
    let mut steps = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Thought:") {
            steps.push(StepOutcome::Thought(rest.trim().to_string()));
        } else if let Some(rest) = line.strip_prefix("Final Answer:") {
            steps.push(StepOutcome::FinalAnswer(rest.trim().to_string()));
            break;
        } else if let Some(rest) = line.strip_prefix("Action:") {
            let rest = rest.trim();
            let (tool, raw_args) = match rest.find(['{', ' ']) {
                Some(pos) => (rest[..pos].trim(), rest[pos..].trim()),
                None => (rest, ""),
            };
            if tool.is_empty() {
                continue;
            }
            let args = serde_json::from_str(raw_args)
                .unwrap_or_else(|_| serde_json::json!({}));
            steps.push(StepOutcome::Action {
                tool: tool.to_string(),
                args,
            });
            // One action per turn; observations come back next turn.
            break;
        }
    }

    // A turn with no recognizable markers is treated as the final answer.
    if steps.is_empty() && !output.trim().is_empty() {
        steps.push(StepOutcome::FinalAnswer(output.trim().to_string()));
    }
    steps
}
