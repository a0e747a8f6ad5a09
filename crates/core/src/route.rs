//! Routing domain types.
//!
//! A route is a registered intent; the router scores a query against all
//! routes and selection determines which worker(s) run.

use serde::{Deserialize, Serialize};

/// What kind of handler a route dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Retrieval-augmented answering.
    Rag,
    /// A specialist worker.
    Worker,
    /// An MCP tool.
    Tool,
    /// Direct generation without retrieval.
    Direct,
    /// Catch-all when nothing qualifies.
    Fallback,
}

/// How a route matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMatchKind {
    Semantic,
    Keyword,
    Pattern,
    Hybrid,
    Fallback,
}

/// A registered intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Unique route name.
    pub name: String,

    /// Handler category.
    pub kind: RouteKind,

    /// What this route is for; embedded together with examples for
    /// semantic matching.
    pub description: String,

    /// Example queries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,

    /// Case-insensitive substring triggers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Regex triggers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regexes: Vec<String>,

    /// 0–100; higher routes win ties.
    pub priority: u32,

    /// Name of the worker/tool this route dispatches to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, kind: RouteKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            examples: Vec::new(),
            keywords: Vec::new(),
            regexes: Vec::new(),
            priority: 50,
            handler: None,
        }
    }

    pub fn with_examples(mut self, examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_regexes(mut self, regexes: &[&str]) -> Self {
        self.regexes = regexes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority.min(100);
        self
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// The text embedded for semantic matching: description plus examples.
    pub fn embedding_text(&self) -> String {
        let mut text = self.description.clone();
        for example in &self.examples {
            text.push('\n');
            text.push_str(example);
        }
        text
    }

    /// The catch-all fallback route.
    pub fn fallback() -> Self {
        Self::new("fallback", RouteKind::Fallback, "Default fallback route").with_priority(0)
    }
}

/// A scored match of a query against a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMatch {
    /// The matched route.
    pub route: Route,

    /// Final combined score.
    pub score: f64,

    /// How it matched.
    pub match_kind: RouteMatchKind,

    /// Confidence in `[0, 1]`; 0.0 for the fallback.
    pub confidence: f64,
}

impl RouteMatch {
    /// The fallback match returned when nothing passes the confidence bar.
    pub fn fallback() -> Self {
        Self {
            route: Route::fallback(),
            score: 0.0,
            match_kind: RouteMatchKind::Fallback,
            confidence: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_joins_description_and_examples() {
        let route = Route::new("writing", RouteKind::Worker, "Compose prose")
            .with_examples(&["write an email", "draft a report"]);
        let text = route.embedding_text();
        assert!(text.starts_with("Compose prose"));
        assert!(text.contains("draft a report"));
    }

    #[test]
    fn priority_is_capped_at_hundred() {
        let route = Route::new("x", RouteKind::Direct, "d").with_priority(250);
        assert_eq!(route.priority, 100);
    }

    #[test]
    fn fallback_match_has_zero_confidence() {
        let m = RouteMatch::fallback();
        assert_eq!(m.route.name, "fallback");
        assert_eq!(m.confidence, 0.0);
        assert_eq!(m.match_kind, RouteMatchKind::Fallback);
    }
}
