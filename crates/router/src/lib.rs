//! Intent routing.
//!
//! Three strategies compose: keyword (case-insensitive substring), pattern
//! (regex), and semantic (cosine over route embeddings). Hybrid mode sums
//! a weighted combination (keyword 0.3 / semantic 0.7). When nothing
//! clears the confidence bar, exactly one fallback match is returned.
//!
//! When both a keyword and a pattern hit the same route, the pattern wins:
//! its 0.8 base outranks the keyword's 0.7 and the route is reported once
//! with `match_kind = pattern`.

use hearthmind_core::error::RouterError;
use hearthmind_core::gateway::Gateway;
use hearthmind_core::route::{Route, RouteKind, RouteMatch, RouteMatchKind};
use hearthmind_config::RouterConfig;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const KEYWORD_WEIGHT: f64 = 0.3;
const SEMANTIC_WEIGHT: f64 = 0.7;
const KEYWORD_BASE: f64 = 0.7;
const PATTERN_BASE: f64 = 0.8;

struct CompiledRoute {
    route: Route,
    regexes: Vec<Regex>,
}

impl CompiledRoute {
    fn compile(route: Route) -> Result<Self, RouterError> {
        let mut regexes = Vec::with_capacity(route.regexes.len());
        for pattern in &route.regexes {
            let compiled =
                Regex::new(&format!("(?i){pattern}")).map_err(|e| RouterError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            regexes.push(compiled);
        }
        Ok(Self { route, regexes })
    }

    fn matches_keyword(&self, query_lower: &str) -> bool {
        self.route
            .keywords
            .iter()
            .any(|kw| query_lower.contains(&kw.to_lowercase()))
    }

    fn matches_pattern(&self, query: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(query))
    }
}

/// The router. Routes are registered at startup and can be added or
/// removed at runtime; semantic embeddings are computed once per route and
/// cached.
pub struct Router {
    routes: RwLock<Vec<CompiledRoute>>,
    embeddings: RwLock<HashMap<String, Vec<f32>>>,
    gateway: Arc<dyn Gateway>,
    config: RouterConfig,
}

impl Router {
    /// An empty router.
    pub fn new(gateway: Arc<dyn Gateway>, config: RouterConfig) -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            embeddings: RwLock::new(HashMap::new()),
            gateway,
            config,
        }
    }

    /// A router preloaded with the default route set.
    pub async fn with_defaults(
        gateway: Arc<dyn Gateway>,
        config: RouterConfig,
    ) -> Result<Self, RouterError> {
        let router = Self::new(gateway, config);
        for route in default_routes() {
            router.add_route(route).await?;
        }
        Ok(router)
    }

    /// Register a route, compiling its patterns.
    pub async fn add_route(&self, route: Route) -> Result<(), RouterError> {
        let compiled = CompiledRoute::compile(route)?;
        let name = compiled.route.name.clone();
        let mut routes = self.routes.write().await;
        routes.retain(|r| r.route.name != name);
        routes.push(compiled);
        debug!(route = %name, "route registered");
        Ok(())
    }

    /// Remove a route by name. Returns whether it existed.
    pub async fn remove_route(&self, name: &str) -> bool {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|r| r.route.name != name);
        self.embeddings.write().await.remove(name);
        routes.len() < before
    }

    /// Registered route names.
    pub async fn route_names(&self) -> Vec<String> {
        self.routes
            .read()
            .await
            .iter()
            .map(|r| r.route.name.clone())
            .collect()
    }

    /// Whether a route with the given name is registered.
    pub async fn has_route(&self, name: &str) -> bool {
        self.routes
            .read()
            .await
            .iter()
            .any(|r| r.route.name == name)
    }

    /// Route a query: top-k matches above the confidence bar, or exactly
    /// one fallback match.
    pub async fn route(&self, query: &str) -> Vec<RouteMatch> {
        let routes = self.routes.read().await;
        let query_lower = query.to_lowercase();

        // Keyword / pattern pass. Pattern beats keyword on the same route.
        let mut lexical: HashMap<String, RouteMatch> = HashMap::new();
        for compiled in routes.iter() {
            let priority = compiled.route.priority as f64;
            if compiled.matches_pattern(query) {
                lexical.insert(
                    compiled.route.name.clone(),
                    RouteMatch {
                        route: compiled.route.clone(),
                        score: PATTERN_BASE + priority / 1000.0,
                        match_kind: RouteMatchKind::Pattern,
                        confidence: PATTERN_BASE,
                    },
                );
            } else if compiled.matches_keyword(&query_lower) {
                lexical.insert(
                    compiled.route.name.clone(),
                    RouteMatch {
                        route: compiled.route.clone(),
                        score: KEYWORD_BASE + priority / 1000.0,
                        match_kind: RouteMatchKind::Keyword,
                        confidence: KEYWORD_BASE,
                    },
                );
            }
        }

        // Semantic pass.
        let mut semantic: HashMap<String, RouteMatch> = HashMap::new();
        if let Ok(query_vec) = self.gateway.embed(query).await {
            for compiled in routes.iter() {
                let Some(route_vec) = self.route_embedding(&compiled.route).await else {
                    continue;
                };
                let sim = cosine(&query_vec, &route_vec) as f64;
                if sim < self.config.min_confidence {
                    continue;
                }
                let priority = compiled.route.priority as f64;
                semantic.insert(
                    compiled.route.name.clone(),
                    RouteMatch {
                        route: compiled.route.clone(),
                        score: 0.8 * sim + 0.2 * (priority / 100.0),
                        match_kind: RouteMatchKind::Semantic,
                        confidence: sim,
                    },
                );
            }
        }
        drop(routes);

        // Hybrid combination.
        let mut combined: HashMap<String, RouteMatch> = HashMap::new();
        for (name, m) in lexical {
            combined.insert(
                name,
                RouteMatch {
                    score: m.score * KEYWORD_WEIGHT,
                    ..m
                },
            );
        }
        for (name, m) in semantic {
            match combined.get_mut(&name) {
                Some(existing) => {
                    existing.score += m.score * SEMANTIC_WEIGHT;
                    existing.confidence = existing.confidence.max(m.confidence);
                    existing.match_kind = RouteMatchKind::Hybrid;
                }
                None => {
                    combined.insert(
                        name,
                        RouteMatch {
                            score: m.score * SEMANTIC_WEIGHT,
                            ..m
                        },
                    );
                }
            }
        }

        let mut matches: Vec<RouteMatch> = combined
            .into_values()
            .filter(|m| m.confidence >= self.config.min_confidence)
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.route.name.cmp(&b.route.name))
        });
        matches.truncate(self.config.top_k);

        if matches.is_empty() {
            matches.push(RouteMatch::fallback());
        }

        info!(
            query = %&query[..query.len().min(50)],
            route = %matches[0].route.name,
            "query routed"
        );
        matches
    }

    /// The single best match.
    pub async fn best_route(&self, query: &str) -> RouteMatch {
        self.route(query).await.remove(0)
    }

    async fn route_embedding(&self, route: &Route) -> Option<Vec<f32>> {
        if let Some(cached) = self.embeddings.read().await.get(&route.name) {
            return Some(cached.clone());
        }
        let vector = self.gateway.embed(&route.embedding_text()).await.ok()?;
        self.embeddings
            .write()
            .await
            .insert(route.name.clone(), vector.clone());
        Some(vector)
    }
}

/// The default route set.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("rag_search", RouteKind::Rag, "Search documents and answer from the knowledge base")
            .with_examples(&[
                "What is our leave policy?",
                "What do the docs say about onboarding?",
                "Find the section about expenses",
            ])
            .with_keywords(&[
                "document", "policy", "docs", "knowledge base", "what does", "according to",
                "what is", "how many",
            ])
            .with_priority(70)
            .with_handler("assistant"),
        Route::new("analysis", RouteKind::Worker, "Analyze data, compare options, extract trends")
            .with_examples(&[
                "Analyze these numbers",
                "Compare the two proposals",
                "Summarize the findings",
            ])
            .with_keywords(&["analyze", "compare", "summarize", "trend", "statistics", "breakdown"])
            .with_priority(60)
            .with_handler("analyzer"),
        Route::new("writing", RouteKind::Worker, "Compose emails, reports, and other prose")
            .with_examples(&[
                "Write an email to the manager",
                "Draft a project report",
                "Compose a proposal",
            ])
            .with_keywords(&["write", "email", "draft", "compose", "letter", "report"])
            .with_regexes(&[r"(write|draft|compose)\s+(a|an|the)\b"])
            .with_priority(65)
            .with_handler("writer"),
        Route::new("research", RouteKind::Worker, "Research a topic and gather information")
            .with_examples(&[
                "Research the Q3 numbers",
                "Gather information about the market",
                "Investigate the outage",
            ])
            .with_keywords(&["research", "investigate", "gather information", "learn about", "look into"])
            .with_priority(55)
            .with_handler("research"),
        Route::new("general_chat", RouteKind::Direct, "Casual conversation and simple questions")
            .with_examples(&["Hello", "How are you?", "Thanks for the help"])
            .with_keywords(&["hello", "hi there", "thanks", "thank you", "how are you"])
            .with_priority(40)
            .with_handler("assistant"),
        Route::new("web_search", RouteKind::Tool, "Search the open web for current information")
            .with_examples(&["Search the web for this", "What is the latest news?"])
            .with_keywords(&["web search", "internet", "online", "latest news", "current events"])
            .with_priority(50)
            .with_handler("web_search"),
        Route::new("file_operation", RouteKind::Tool, "Read, write, and manage files")
            .with_examples(&["Save this to a file", "Read the config file"])
            .with_keywords(&["file", "save to", "read file", "upload", "download"])
            .with_priority(45)
            .with_handler("file_read"),
    ]
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_gateway::testing::StaticGateway;

    async fn router() -> Router {
        Router::with_defaults(
            Arc::new(StaticGateway::new(vec![])),
            RouterConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn keyword_match_scores_with_priority() {
        let router = router().await;
        let matches = router.route("please analyze the sales breakdown").await;
        let top = &matches[0];
        assert_eq!(top.route.name, "analysis");
        assert!(top.confidence >= 0.7);
    }

    #[tokio::test]
    async fn pattern_beats_keyword_on_the_same_route() {
        let router = router().await;
        // "write an email" hits both the writing keywords and the regex.
        let matches = router.route("write an email to the team").await;
        let writing = matches
            .iter()
            .find(|m| m.route.name == "writing")
            .expect("writing matched");
        assert_eq!(writing.match_kind, RouteMatchKind::Pattern);
        assert!((writing.confidence - PATTERN_BASE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn gibberish_falls_back_with_zero_confidence() {
        let router = router().await;
        let matches = router.route("qxzptlk42").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].route.name, "fallback");
        assert_eq!(matches[0].confidence, 0.0);
        assert_eq!(matches[0].match_kind, RouteMatchKind::Fallback);
    }

    #[tokio::test]
    async fn matches_above_bar_reference_registered_routes() {
        let router = router().await;
        let matches = router.route("search the documents for the policy").await;
        for m in &matches {
            if m.confidence >= RouterConfig::default().min_confidence {
                assert!(router.has_route(&m.route.name).await, "{}", m.route.name);
            }
        }
    }

    #[tokio::test]
    async fn routes_can_be_added_and_removed_at_runtime() {
        let router = router().await;
        router
            .add_route(
                Route::new("deploy", RouteKind::Tool, "Deploy the service")
                    .with_keywords(&["deploy", "rollout"])
                    .with_priority(90),
            )
            .await
            .unwrap();

        let matches = router.route("deploy the new build").await;
        assert_eq!(matches[0].route.name, "deploy");

        assert!(router.remove_route("deploy").await);
        assert!(!router.has_route("deploy").await);
        assert!(!router.remove_route("deploy").await);
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() {
        let router = router().await;
        let err = router
            .add_route(
                Route::new("broken", RouteKind::Direct, "bad").with_regexes(&["(unclosed"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn semantic_matching_works_without_keywords() {
        let gateway = Arc::new(StaticGateway::new(vec![]));
        let router = Router::new(gateway, RouterConfig::default());
        router
            .add_route(
                Route::new("weather", RouteKind::Direct, "weather forecast temperature rain")
                    .with_examples(&["what is the weather forecast today"]),
            )
            .await
            .unwrap();

        // Shares words with the route's embedding text but not a keyword.
        let matches = router.route("weather forecast for tomorrow").await;
        assert_eq!(matches[0].route.name, "weather");
        assert_eq!(matches[0].match_kind, RouteMatchKind::Semantic);
    }

    #[tokio::test]
    async fn works_without_embedding_backend() {
        let router = Router::with_defaults(
            Arc::new(StaticGateway::unavailable()),
            RouterConfig::default(),
        )
        .await
        .unwrap();

        // Keyword path still routes.
        let matches = router.route("analyze the report breakdown").await;
        assert_eq!(matches[0].route.name, "analysis");
    }
}
