//! Gateway trait — the abstraction over embedding and generation backends.
//!
//! The gateway isolates the language-model backend behind two contracts:
//! `embed(text) → vector` and `generate(prompt, opts) → text` (or a stream
//! of text fragments). The rest of the platform is model-agnostic and only
//! ever talks to this trait.

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A stream of generated text fragments.
pub type TextStream = mpsc::Receiver<std::result::Result<String, GatewayError>>;

/// Options for a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sampling temperature in `[0, 2]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Model override; `None` uses the gateway's configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system: None,
            stop: Vec::new(),
            model: None,
        }
    }
}

impl GenerateOptions {
    /// Set the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature, clamped to the accepted range.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the max token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

/// The embedding & generation gateway.
///
/// Implementations: HTTP (OpenAI-compatible), plus retry / circuit-breaker /
/// backpressure wrappers that compose over any inner gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// A human-readable name for this gateway (e.g. "http", "static").
    fn name(&self) -> &str;

    /// Embedding dimensionality. Fixed for the process lifetime; changing it
    /// requires a full re-embed of the chunk store.
    fn dimension(&self) -> usize;

    /// Embed a text into a dense vector of [`Self::dimension`] components.
    /// Deterministic for a given input and model.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, GatewayError>;

    /// Generate a completion for the prompt.
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> std::result::Result<String, GatewayError>;

    /// Generate a completion as a lazy stream of fragments.
    ///
    /// Default implementation calls [`Self::generate`] and yields the result
    /// as a single fragment.
    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> std::result::Result<TextStream, GatewayError> {
        let text = self.generate(prompt, opts).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(text)).await;
        Ok(rx)
    }

    /// Whether a generation backend is actually reachable. Query rewriting
    /// and generative extraction are disabled when this reports `false`.
    async fn is_available(&self) -> bool {
        true
    }
}
