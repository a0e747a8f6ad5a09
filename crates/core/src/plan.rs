//! Task plans: what the coordinator decided to run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a user task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Chat,
    Question,
    Research,
    Write,
    Analyze,
    MultiStep,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::Question => "question",
            Self::Research => "research",
            Self::Write => "write",
            Self::Analyze => "analyze",
            Self::MultiStep => "multi_step",
        };
        write!(f, "{s}")
    }
}

/// One step in a plan: which worker runs with which prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Worker to invoke.
    pub worker_name: String,

    /// The step prompt (usually the task plus carried-forward results).
    pub prompt: String,

    /// Keys from the previous step's metadata to carry into this step's
    /// context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub carry_forward_keys: Vec<String>,

    /// When set, this step's output supersedes the last step's as the
    /// final response.
    #[serde(default)]
    pub merge: bool,
}

impl Step {
    pub fn new(worker_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            prompt: prompt.into(),
            carry_forward_keys: Vec::new(),
            merge: false,
        }
    }
}

/// An ordered sequence of worker invocations for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan ID.
    pub id: String,

    /// The request this plan was built for.
    pub parent_request_id: String,

    /// Task classification.
    pub kind: TaskKind,

    /// Ordered steps.
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(parent_request_id: impl Into<String>, kind: TaskKind, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_request_id: parent_request_id.into(),
            kind,
            steps,
        }
    }

    /// Whether this plan needs more than one worker.
    pub fn is_multi_step(&self) -> bool {
        self.steps.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_multi_step_detection() {
        let single = Plan::new("req", TaskKind::Question, vec![Step::new("assistant", "q")]);
        assert!(!single.is_multi_step());

        let multi = Plan::new(
            "req",
            TaskKind::MultiStep,
            vec![Step::new("research", "r"), Step::new("writer", "w")],
        );
        assert!(multi.is_multi_step());
    }
}
