//! Test gateway with scripted responses and deterministic embeddings.
//!
//! Mirrors the backend contract closely enough for every downstream crate
//! to exercise its logic without a network: embeddings are derived from a
//! SHA-256 of the input (deterministic, unit-normalized, and similar texts
//! sharing words produce correlated vectors via word-level hashing), and
//! generations pop from a scripted queue.

use async_trait::async_trait;
use hearthmind_core::error::GatewayError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A scripted gateway for tests.
pub struct StaticGateway {
    dimension: usize,
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    available: bool,
    fallback: String,
}

impl StaticGateway {
    /// A gateway that answers `responses` in order, then repeats the
    /// fallback answer.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            dimension: 256,
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
            available: true,
            fallback: "ok".into(),
        }
    }

    /// A gateway with no scripted responses; every generation returns the
    /// fallback text.
    pub fn answering(fallback: impl Into<String>) -> Self {
        let mut gw = Self::new(vec![]);
        gw.fallback = fallback.into();
        gw
    }

    /// A gateway that reports no generation backend. Query rewriting and
    /// generative extraction are disabled against it.
    pub fn unavailable() -> Self {
        let mut gw = Self::new(vec![]);
        gw.available = false;
        gw
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Every prompt this gateway has been asked to complete.
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    /// Word-level hash embedding: each word contributes to a handful of
    /// components, so texts sharing words land near each other in cosine
    /// space.
    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(word.as_bytes());
            for pair in digest.chunks_exact(2).take(8) {
                let idx = (u16::from_le_bytes([pair[0], pair[1]]) as usize) % self.dimension;
                vector[idx] += 1.0;
            }
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Gateway for StaticGateway {
    fn name(&self) -> &str {
        "static"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        if !self.available {
            return Err(GatewayError::Unavailable("static gateway offline".into()));
        }
        Ok(self.hash_embed(text))
    }

    async fn generate(
        &self,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        if !self.available {
            return Err(GatewayError::Unavailable("static gateway offline".into()));
        }
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        let next = self.responses.lock().expect("responses lock").pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}
