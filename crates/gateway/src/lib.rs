//! Embedding & generation gateway implementations.
//!
//! The gateway isolates the language-model backend behind the
//! [`hearthmind_core::Gateway`] trait. This crate provides:
//!
//! - [`HttpGateway`] — an OpenAI-compatible HTTP backend (chat completions
//!   and embeddings), which covers the vast majority of local and hosted
//!   runtimes (Ollama, vLLM, llama.cpp server, OpenRouter, …).
//! - [`ResilientGateway`] — retry with exponential backoff, a circuit
//!   breaker, and a concurrency semaphore composing over any inner gateway.
//! - [`testing::StaticGateway`] — scripted responses and deterministic
//!   embeddings for tests.

pub mod http;
pub mod resilience;
pub mod testing;

pub use http::HttpGateway;
pub use resilience::{ResilienceConfig, ResilientGateway};

use hearthmind_config::GatewayConfig;
use hearthmind_core::Gateway;
use std::sync::Arc;

/// Build the production gateway stack from configuration:
/// HTTP backend wrapped in retry + breaker + semaphore.
pub fn from_config(config: &GatewayConfig) -> Arc<dyn Gateway> {
    let inner = HttpGateway::new(
        &config.backend_url,
        &config.gen_model,
        &config.embed_model,
        config.dimension,
        std::time::Duration::from_secs(config.call_timeout_secs),
    );
    Arc::new(ResilientGateway::new(
        Arc::new(inner),
        ResilienceConfig {
            max_concurrent: config.max_concurrent,
            breaker_threshold: config.breaker_threshold,
            breaker_cooldown: std::time::Duration::from_secs(config.breaker_cooldown_secs),
            ..ResilienceConfig::default()
        },
    ))
}
