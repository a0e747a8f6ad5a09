//! Retry, circuit breaking, and backpressure for the gateway.
//!
//! Composes over any inner [`Gateway`]:
//!
//! - A semaphore caps concurrent calls; an exhausted semaphore fails fast
//!   with `Overloaded` instead of queueing unboundedly.
//! - A circuit breaker opens after N consecutive failures and fails fast
//!   with `Unavailable` until the cool-down elapses.
//! - `Unavailable`/`Timeout` errors get a bounded retry cycle with
//!   exponential backoff (base 200 ms, doubling, capped at 2 s, at most
//!   3 attempts). All other errors surface immediately.

use async_trait::async_trait;
use hearthmind_core::error::GatewayError;
use hearthmind_core::gateway::{Gateway, GenerateOptions, TextStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Tunables for [`ResilientGateway`].
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum attempts per call (1 initial + retries).
    pub max_attempts: u32,

    /// First backoff delay.
    pub backoff_base: Duration,

    /// Backoff ceiling.
    pub backoff_cap: Duration,

    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,

    /// How long the breaker stays open.
    pub breaker_cooldown: Duration,

    /// Concurrent in-flight calls before `Overloaded`.
    pub max_concurrent: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(2),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            max_concurrent: 4,
        }
    }
}

/// Circuit breaker state shared across calls.
struct Breaker {
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    threshold: u32,
    cooldown: Duration,
}

impl Breaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Fails fast while open; transitions to half-open after the cooldown.
    fn check(&self) -> Result<(), GatewayError> {
        let mut opened_at = self.opened_at.lock().expect("breaker lock poisoned");
        if let Some(at) = *opened_at {
            if at.elapsed() < self.cooldown {
                return Err(GatewayError::Unavailable(format!(
                    "circuit breaker open, retry in {:?}",
                    self.cooldown.saturating_sub(at.elapsed())
                )));
            }
            // Half-open: allow one probe through.
            *opened_at = None;
        }
        Ok(())
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            let mut opened_at = self.opened_at.lock().expect("breaker lock poisoned");
            if opened_at.is_none() {
                warn!(failures, "gateway circuit breaker opened");
                *opened_at = Some(Instant::now());
            }
        }
    }

    fn is_open(&self) -> bool {
        self.opened_at
            .lock()
            .expect("breaker lock poisoned")
            .is_some()
    }
}

/// A gateway wrapper adding retry, circuit breaking, and backpressure.
pub struct ResilientGateway {
    inner: Arc<dyn Gateway>,
    config: ResilienceConfig,
    breaker: Breaker,
    permits: Semaphore,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn Gateway>, config: ResilienceConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        let breaker = Breaker::new(config.breaker_threshold, config.breaker_cooldown);
        Self {
            inner,
            config,
            breaker,
            permits,
        }
    }

    /// Whether the breaker is currently open.
    pub fn breaker_open(&self) -> bool {
        self.breaker.is_open()
    }

    async fn call_with_retry<'a, T, F>(&'a self, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>,
    {
        self.breaker.check()?;

        let _permit = self
            .permits
            .try_acquire()
            .map_err(|_| GatewayError::Overloaded("generation concurrency limit reached".into()))?;

        let mut backoff = self.config.backoff_base;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    self.breaker.on_success();
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    debug!(attempt, error = %e, "gateway call failed, backing off {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.backoff_cap);
                    attempt += 1;
                }
                Err(e) => {
                    self.breaker.on_failure();
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl Gateway for ResilientGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        self.call_with_retry(|| Box::pin(self.inner.embed(text)))
            .await
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        self.call_with_retry(|| Box::pin(self.inner.generate(prompt, opts)))
            .await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<TextStream, GatewayError> {
        // Streams hold their permit only for call setup; mid-stream failures
        // surface through the stream itself.
        self.call_with_retry(|| Box::pin(self.inner.generate_stream(prompt, opts)))
            .await
    }

    async fn is_available(&self) -> bool {
        !self.breaker.is_open() && self.inner.is_available().await
    }
}
