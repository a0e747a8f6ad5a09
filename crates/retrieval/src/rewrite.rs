//! Gateway-backed query rewriting.
//!
//! Produces up to three rewrites of the user query: a hypothetical answer
//! (HyDE style), a keyword expansion, and a question-to-statement form.
//! Disabled entirely when no generation backend is reachable.

use hearthmind_core::gateway::{Gateway, GenerateOptions};
use tracing::debug;

/// Maximum rewrites folded into a retrieval call.
pub const MAX_REWRITES: usize = 3;

/// Ask the gateway for query rewrites. Returns an empty list (never an
/// error) when the backend is down or answers garbage; retrieval proceeds
/// with the original query alone.
pub async fn rewrites(gateway: &dyn Gateway, query: &str) -> Vec<String> {
    if !gateway.is_available().await {
        return Vec::new();
    }

    let prompt = format!(
        "Rewrite this search query three ways, one per line, no numbering:\n\
         1) a short hypothetical passage that would answer it\n\
         2) a keyword expansion\n\
         3) the question restated as a statement\n\n\
         Query: {query}"
    );
    let opts = GenerateOptions::default()
        .with_temperature(0.3)
        .with_max_tokens(200);

    match gateway.generate(&prompt, &opts).await {
        Ok(output) => {
            let rewrites: Vec<String> = output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && *l != query)
                .take(MAX_REWRITES)
                .map(String::from)
                .collect();
            debug!(count = rewrites.len(), "query rewrites generated");
            rewrites
        }
        Err(e) => {
            debug!("query rewrite skipped: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_gateway::testing::StaticGateway;

    #[tokio::test]
    async fn rewrites_come_from_lines_capped_at_three() {
        let gateway = StaticGateway::new(vec![
            "Employees receive 20 days of leave.\nannual leave vacation days policy\nThe annual leave allowance is\nextra line",
        ]);
        let out = rewrites(&gateway, "How many days of annual leave?").await;
        assert_eq!(out.len(), 3);
        assert!(out[0].contains("20 days"));
    }

    #[tokio::test]
    async fn unavailable_backend_disables_rewrites() {
        let gateway = StaticGateway::unavailable();
        assert!(rewrites(&gateway, "anything").await.is_empty());
    }
}
