//! Task classification and plan construction.
//!
//! Lexical signals plus the router's top route classify a task into one of
//! chat / question / research / write / analyze / multi_step. Conjunction
//! markers ("and then", "after that") or combining writing with analysis
//! or research force a multi-step plan.

use hearthmind_core::plan::{Plan, Step, TaskKind};
use hearthmind_core::route::RouteMatch;

const CHAT_MARKERS: [&str; 6] = ["hello", "hi there", "hey", "thanks", "thank you", "how are you"];
const MULTI_STEP_MARKERS: [&str; 7] = [
    " and then ",
    " then ",
    "after that",
    "and write",
    "and draft",
    "and email",
    "and analyze",
];
const WRITE_MARKERS: [&str; 6] = ["write", "draft", "compose", "email", "letter", "proposal"];
const ANALYZE_MARKERS: [&str; 5] = ["analyz", "compar", "trend", "assess", "evaluate"];
const RESEARCH_MARKERS: [&str; 5] = [
    "research",
    "investigate",
    "gather information",
    "look into",
    "find out",
];

/// Classify a task.
pub fn classify(task: &str, route: &RouteMatch) -> TaskKind {
    let lower = task.to_lowercase();

    if CHAT_MARKERS.iter().any(|m| lower.starts_with(m)) || route.route.name == "general_chat" {
        return TaskKind::Chat;
    }

    let has_write = WRITE_MARKERS.iter().any(|m| lower.contains(m));
    let has_analyze = ANALYZE_MARKERS.iter().any(|m| lower.contains(m));
    let has_research = RESEARCH_MARKERS.iter().any(|m| lower.contains(m));
    let has_conjunction = MULTI_STEP_MARKERS.iter().any(|m| lower.contains(m));

    if has_conjunction && (has_write || has_analyze || has_research) {
        return TaskKind::MultiStep;
    }
    if has_write && (has_analyze || has_research) {
        return TaskKind::MultiStep;
    }
    if has_write {
        return TaskKind::Write;
    }
    if has_analyze {
        return TaskKind::Analyze;
    }
    if has_research {
        return TaskKind::Research;
    }
    TaskKind::Question
}

/// Build the worker plan for a classified task.
pub fn build_plan(request_id: &str, kind: TaskKind, task: &str) -> Plan {
    let lower = task.to_lowercase();
    let steps = match kind {
        TaskKind::Chat | TaskKind::Question => vec![Step::new("assistant", task)],
        TaskKind::Write => vec![Step::new("writer", task)],
        TaskKind::Analyze => vec![Step::new("analyzer", task)],
        TaskKind::Research => vec![Step::new("research", task)],
        TaskKind::MultiStep => {
            let mut steps = Vec::new();
            let has_analyze = ANALYZE_MARKERS.iter().any(|m| lower.contains(m));
            let has_write = WRITE_MARKERS.iter().any(|m| lower.contains(m));

            // Research leads whenever evidence is mentioned or requested.
            if RESEARCH_MARKERS.iter().any(|m| lower.contains(m)) || !has_analyze {
                steps.push(Step::new("research", task));
            }
            if has_analyze {
                steps.push(Step::new("analyzer", task));
            }
            if has_write {
                steps.push(Step::new("writer", task));
            }
            if steps.is_empty() {
                steps.push(Step::new("assistant", task));
            }
            steps
        }
    };
    Plan::new(request_id, kind, steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_core::route::{Route, RouteKind, RouteMatchKind};

    fn route(name: &str) -> RouteMatch {
        RouteMatch {
            route: Route::new(name, RouteKind::Worker, "test route"),
            score: 0.8,
            match_kind: RouteMatchKind::Keyword,
            confidence: 0.8,
        }
    }

    #[test]
    fn greetings_are_chat() {
        assert_eq!(classify("hello there", &route("x")), TaskKind::Chat);
        assert_eq!(classify("thanks a lot!", &route("x")), TaskKind::Chat);
        assert_eq!(classify("anything", &route("general_chat")), TaskKind::Chat);
    }

    #[test]
    fn single_intent_classification() {
        assert_eq!(
            classify("Write a proposal for the board", &route("writing")),
            TaskKind::Write
        );
        assert_eq!(
            classify("Compare the two vendors", &route("analysis")),
            TaskKind::Analyze
        );
        assert_eq!(
            classify("Investigate the outage", &route("research")),
            TaskKind::Research
        );
        assert_eq!(
            classify("What is the leave policy?", &route("rag_search")),
            TaskKind::Question
        );
    }

    #[test]
    fn write_plus_research_is_multi_step() {
        let kind = classify(
            "Research the Q3 sales report and write a 3-paragraph email to the manager",
            &route("writing"),
        );
        assert_eq!(kind, TaskKind::MultiStep);
    }

    #[test]
    fn conjunction_forces_multi_step() {
        let kind = classify(
            "Analyze the figures and then write a summary",
            &route("analysis"),
        );
        assert_eq!(kind, TaskKind::MultiStep);
    }

    #[test]
    fn multi_step_plan_orders_research_analyzer_writer() {
        let task = "Research the market, analyze the trend, and write a report";
        let plan = build_plan("req", classify(task, &route("x")), task);
        let workers: Vec<&str> = plan.steps.iter().map(|s| s.worker_name.as_str()).collect();
        assert_eq!(workers, vec!["research", "analyzer", "writer"]);
    }

    #[test]
    fn research_and_write_plan() {
        let task = "Research the Q3 sales report and write a 3-paragraph email to the manager";
        let plan = build_plan("req", classify(task, &route("x")), task);
        let workers: Vec<&str> = plan.steps.iter().map(|s| s.worker_name.as_str()).collect();
        assert_eq!(workers, vec!["research", "writer"]);
    }

    #[test]
    fn question_plan_uses_assistant() {
        let plan = build_plan("req", TaskKind::Question, "What is the policy?");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].worker_name, "assistant");
    }
}
