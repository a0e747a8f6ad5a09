//! Configuration loading, validation, and management for Hearthmind.
//!
//! Loads configuration from `<data_root>/config.toml` with environment
//! variable overrides (`DATA_ROOT`, `GEN_BACKEND_URL`, `GEN_MODEL`,
//! `EMBED_MODEL`, `MCP_STDIO`, `MCP_HTTP_ADDR`, `MCP_WS_ADDR`, `LOG_LEVEL`,
//! `TRACE_EXPORT`). Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `config.toml` under the data root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory for all durable state.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Log level: debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Gateway (embedding + generation backend) configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Retrieval engine configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Tiered memory configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Router configuration.
    #[serde(default)]
    pub router: RouterConfig,

    /// Coordinator configuration.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// MCP server configuration.
    #[serde(default)]
    pub mcp: McpConfig,

    /// Trace export configuration.
    #[serde(default)]
    pub trace: TraceConfig,
}

fn default_data_root() -> PathBuf {
    dirs_home().join(".hearthmind")
}

fn default_log_level() -> String {
    "info".into()
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Generation model name.
    #[serde(default = "default_gen_model")]
    pub gen_model: String,

    /// Embedding model name.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// Embedding dimensionality. Fixed for the process lifetime.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum concurrent generation calls before `OVERLOADED`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// Seconds the breaker stays open before a probe is allowed.
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,

    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_gen_model() -> String {
    "llama3.1".into()
}
fn default_embed_model() -> String {
    "nomic-embed-text".into()
}
fn default_dimension() -> usize {
    768
}
fn default_max_concurrent() -> usize {
    4
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    30
}
fn default_call_timeout() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            gen_model: default_gen_model(),
            embed_model: default_embed_model(),
            dimension: default_dimension(),
            max_concurrent: default_max_concurrent(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Retrieval engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Token budget for packed context.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Enable gateway-backed query rewrites.
    #[serde(default)]
    pub rewrite: bool,
}

fn default_top_k() -> usize {
    5
}
fn default_token_budget() -> usize {
    3000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            token_budget: default_token_budget(),
            rewrite: false,
        }
    }
}

/// Tiered memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Working-tier message cap.
    #[serde(default = "default_max_msgs")]
    pub max_msgs: usize,

    /// Working-tier token cap.
    #[serde(default = "default_max_working_tokens")]
    pub max_tokens: usize,

    /// Cap for a fully assembled context.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Archival results folded into assembled context.
    #[serde(default = "default_archival_k")]
    pub archival_k: usize,
}

fn default_max_msgs() -> usize {
    20
}
fn default_max_working_tokens() -> usize {
    4000
}
fn default_max_context_tokens() -> usize {
    8000
}
fn default_archival_k() -> usize {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_msgs: default_max_msgs(),
            max_tokens: default_max_working_tokens(),
            max_context_tokens: default_max_context_tokens(),
            archival_k: default_archival_k(),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Matches below this confidence fall through to the fallback route.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// How many matches `route()` returns.
    #[serde(default = "default_route_top_k")]
    pub top_k: usize,
}

fn default_min_confidence() -> f64 {
    0.3
}
fn default_route_top_k() -> usize {
    3
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            top_k: default_route_top_k(),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// ReAct loop iteration cap.
    #[serde(default = "default_max_iters")]
    pub max_iters: u32,

    /// Verifier score below which a single reflection retry runs.
    #[serde(default = "default_reflect_threshold")]
    pub reflect_threshold: f64,

    /// Whether verification failure is an error (true) or a degraded
    /// response (false).
    #[serde(default)]
    pub strict: bool,
}

fn default_max_iters() -> u32 {
    10
}
fn default_reflect_threshold() -> f64 {
    0.5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iters: default_max_iters(),
            reflect_threshold: default_reflect_threshold(),
            strict: false,
        }
    }
}

/// MCP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Serve over stdio.
    #[serde(default = "default_true")]
    pub stdio: bool,

    /// HTTP listen address; `None` disables the HTTP transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_addr: Option<String>,

    /// WebSocket listen address; `None` disables the WS transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_addr: Option<String>,

    /// Page size for `resources/list` and `tools/list`.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-connection request budget per minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_min: u32,
}

fn default_true() -> bool {
    true
}
fn default_page_size() -> usize {
    100
}
fn default_rate_limit() -> u32 {
    240
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            stdio: true,
            http_addr: None,
            ws_addr: None,
            page_size: default_page_size(),
            rate_limit_per_min: default_rate_limit(),
        }
    }
}

/// Trace export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Export target: none, console, sqlite.
    #[serde(default = "default_trace_export")]
    pub export: String,

    /// Spans buffered before a batch flush.
    #[serde(default = "default_trace_batch")]
    pub batch_size: usize,
}

fn default_trace_export() -> String {
    "sqlite".into()
}
fn default_trace_batch() -> usize {
    100
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            export: default_trace_export(),
            batch_size: default_trace_batch(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `<data_root>/config.toml`, then apply
    /// environment variable overrides (highest priority).
    pub fn load() -> Result<Self, ConfigError> {
        let data_root = std::env::var("DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_root());
        let mut config = Self::load_from(&data_root.join("config.toml"))?;
        config.data_root = data_root;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path. Missing file = defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply recognized environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("GEN_BACKEND_URL") {
            self.gateway.backend_url = url;
        }
        if let Ok(model) = std::env::var("GEN_MODEL") {
            self.gateway.gen_model = model;
        }
        if let Ok(model) = std::env::var("EMBED_MODEL") {
            self.gateway.embed_model = model;
        }
        if let Ok(v) = std::env::var("MCP_STDIO") {
            self.mcp.stdio = v != "0";
        }
        if let Ok(addr) = std::env::var("MCP_HTTP_ADDR") {
            self.mcp.http_addr = Some(addr);
        }
        if let Ok(addr) = std::env::var("MCP_WS_ADDR") {
            self.mcp.ws_addr = Some(addr);
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(export) = std::env::var("TRACE_EXPORT") {
            self.trace.export = export;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of debug|info|warn|error, got '{}'",
                self.log_level
            )));
        }
        if !matches!(self.trace.export.as_str(), "none" | "console" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "trace.export must be one of none|console|sqlite, got '{}'",
                self.trace.export
            )));
        }
        if self.gateway.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.dimension must be > 0".into(),
            ));
        }
        if self.gateway.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.max_concurrent must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.router.min_confidence) {
            return Err(ConfigError::ValidationError(
                "router.min_confidence must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.orchestrator.reflect_threshold) {
            return Err(ConfigError::ValidationError(
                "orchestrator.reflect_threshold must be in [0, 1]".into(),
            ));
        }
        if self.mcp.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "mcp.page_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Storage layout under the data root. Durable stores are recoverable
    /// from their on-disk form alone.
    pub fn chunks_dir(&self) -> PathBuf {
        self.data_root.join("chunks")
    }
    pub fn vectors_dir(&self) -> PathBuf {
        self.data_root.join("vectors")
    }
    pub fn graph_dir(&self) -> PathBuf {
        self.data_root.join("graph")
    }
    pub fn memory_dir(&self) -> PathBuf {
        self.data_root.join("memory")
    }
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_root.join("sessions")
    }
    pub fn feedback_dir(&self) -> PathBuf {
        self.data_root.join("feedback")
    }
    pub fn traces_dir(&self) -> PathBuf {
        self.data_root.join("traces")
    }

    /// Create the full on-disk layout.
    pub fn ensure_layout(&self) -> Result<(), ConfigError> {
        for dir in [
            self.chunks_dir(),
            self.vectors_dir(),
            self.graph_dir(),
            self.memory_dir(),
            self.sessions_dir(),
            self.feedback_dir(),
            self.traces_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ConfigError::ReadError {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            log_level: default_log_level(),
            gateway: GatewayConfig::default(),
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            router: RouterConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            mcp: McpConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory.max_msgs, 20);
        assert_eq!(config.retrieval.token_budget, 3000);
        assert_eq!(config.mcp.page_size, 100);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.breaker_threshold, 5);
    }

    #[test]
    fn parse_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[gateway]
dimension = 384

[orchestrator]
strict = true
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.gateway.dimension, 384);
        assert!(config.orchestrator.strict);
        // Untouched sections keep their defaults
        assert_eq!(config.memory.max_tokens, 4000);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.dimension = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.router.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn layout_paths_hang_off_data_root() {
        let mut config = AppConfig::default();
        config.data_root = PathBuf::from("/srv/hearthmind");
        assert_eq!(config.graph_dir(), PathBuf::from("/srv/hearthmind/graph"));
        assert_eq!(config.traces_dir(), PathBuf::from("/srv/hearthmind/traces"));
    }
}
