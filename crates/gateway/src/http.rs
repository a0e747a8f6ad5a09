//! OpenAI-compatible HTTP gateway.
//!
//! Works with any backend exposing `/v1/chat/completions` and
//! `/v1/embeddings`: Ollama, vLLM, llama.cpp server, OpenRouter, hosted
//! OpenAI-compatible endpoints.

use async_trait::async_trait;
use futures::StreamExt;
use hearthmind_core::error::GatewayError;
use hearthmind_core::gateway::{Gateway, GenerateOptions, TextStream};
use hearthmind_trace::Tracer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible HTTP gateway.
pub struct HttpGateway {
    base_url: String,
    gen_model: String,
    embed_model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl HttpGateway {
    /// Create a gateway against the given base URL (e.g.
    /// `http://localhost:11434/v1`).
    pub fn new(
        base_url: &str,
        gen_model: &str,
        embed_model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            gen_model: gen_model.to_string(),
            embed_model: embed_model.to_string(),
            dimension,
            client,
        }
    }

    fn classify(status: reqwest::StatusCode, body: &str) -> GatewayError {
        if status.as_u16() == 429 {
            GatewayError::Overloaded(format!("backend rate limit: {body}"))
        } else if status.is_server_error() {
            GatewayError::Unavailable(format!("backend {status}: {body}"))
        } else if status.is_client_error() {
            GatewayError::Invalid(format!("backend {status}: {body}"))
        } else {
            GatewayError::Protocol(format!("unexpected status {status}: {body}"))
        }
    }

    fn transport_error(e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else {
            GatewayError::Unavailable(e.to_string())
        }
    }

    /// Propagate the current span to the backend via `traceparent`.
    fn traced(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match Tracer::current() {
            Some(ctx) => builder.header("traceparent", ctx.to_traceparent()),
            None => builder,
        }
    }

    fn chat_request(&self, prompt: &str, opts: &GenerateOptions, stream: bool) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &opts.system {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: prompt.to_string(),
        });

        ChatRequest {
            model: opts.model.clone().unwrap_or_else(|| self.gen_model.clone()),
            messages,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stop: opts.stop.clone(),
            stream,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let request = EmbeddingRequest {
            model: self.embed_model.clone(),
            input: vec![text.to_string()],
        };

        let response = Self::traced(
            self.client
                .post(format!("{}/embeddings", self.base_url))
                .json(&request),
        )
        .send()
        .await
        .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("embedding decode: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GatewayError::Protocol("empty embedding response".into()))?;

        if vector.len() != self.dimension {
            return Err(GatewayError::Protocol(format!(
                "embedding dimension {} does not match configured {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        let request = self.chat_request(prompt, opts, false);
        debug!(model = %request.model, "gateway: chat completion");

        let response = Self::traced(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .json(&request),
        )
        .send()
        .await
        .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("completion decode: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Protocol("no choices in completion".into()))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<TextStream, GatewayError> {
        let request = self.chat_request(prompt, opts, true);

        let response = Self::traced(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .json(&request),
        )
        .send()
        .await
        .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(GatewayError::Unavailable(e.to_string()))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE frames are newline-delimited `data: {...}` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<ChatStreamChunk>(payload) {
                        Ok(chunk) => {
                            if let Some(delta) = chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                && !delta.is_empty()
                                && tx.send(Ok(delta)).await.is_err()
                            {
                                // Receiver dropped: mid-generation cancel.
                                return;
                            }
                        }
                        Err(e) => warn!("gateway: undecodable stream chunk: {e}"),
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatDelta,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_includes_system_prompt() {
        let gw = HttpGateway::new(
            "http://localhost:11434/v1/",
            "llama3.1",
            "nomic-embed-text",
            768,
            Duration::from_secs(5),
        );
        let opts = GenerateOptions::default().with_system("Be terse.");
        let request = gw.chat_request("hello", &opts, false);

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "hello");
        assert_eq!(request.model, "llama3.1");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let gw = HttpGateway::new("http://x/v1/", "m", "e", 8, Duration::from_secs(1));
        assert_eq!(gw.base_url, "http://x/v1");
    }

    #[test]
    fn status_classification() {
        let overloaded = HttpGateway::classify(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(overloaded, GatewayError::Overloaded(_)));

        let unavailable = HttpGateway::classify(reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(matches!(unavailable, GatewayError::Unavailable(_)));

        let invalid = HttpGateway::classify(reqwest::StatusCode::BAD_REQUEST, "too long");
        assert!(matches!(invalid, GatewayError::Invalid(_)));
    }

    #[test]
    fn stream_chunk_decodes() {
        let chunk: ChatStreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
    }
}
