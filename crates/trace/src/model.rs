//! Data model for spans and span contexts.

use crate::TraceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of work a span represents (OpenTelemetry-compatible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        };
        write!(f, "{s}")
    }
}

/// Span completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Identity of a span within a trace tree.
///
/// Invariant: a child's `trace_id` equals its parent's; root spans have
/// `parent_id = None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,

    /// 16 lowercase hex characters.
    pub span_id: String,

    /// Parent span, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl SpanContext {
    /// A fresh root context.
    pub fn root() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_id: None,
        }
    }

    /// A child of this context, sharing the trace ID.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_id: Some(self.span_id.clone()),
        }
    }

    /// Emit as a W3C `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Parse a W3C `traceparent` header (`00-<32hex>-<16hex>-<flags>`).
    /// The parsed span becomes the remote parent of spans started from it.
    pub fn from_traceparent(header: &str) -> Result<Self, TraceError> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        if parts.len() < 4 {
            return Err(TraceError::InvalidHeader(format!(
                "expected 4 fields, got {}",
                parts.len()
            )));
        }
        let (trace_id, span_id) = (parts[1], parts[2]);
        if trace_id.len() != 32 || !trace_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TraceError::InvalidHeader(format!(
                "bad trace id '{trace_id}'"
            )));
        }
        if span_id.len() != 16 || !span_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TraceError::InvalidHeader(format!("bad span id '{span_id}'")));
        }
        Ok(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            parent_id: None,
        })
    }
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// A timestamped event within a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A timed, attributed unit of work in the trace tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Trace identity.
    pub context: SpanContext,

    /// Operation name (e.g. "retrieve", "worker.research").
    pub name: String,

    /// Span kind.
    pub kind: SpanKind,

    /// Completion status. Defaults to `Ok`; an error inside the scope sets
    /// `Error` together with the error message.
    pub status: SpanStatus,

    /// Start time.
    pub start: DateTime<Utc>,

    /// End time; `None` while running. Invariant once set: `end >= start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,

    /// Arbitrary attributes.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    /// Recorded events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,

    /// Error message when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Span {
    /// Start a span now with the given identity.
    pub fn start(context: SpanContext, name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            context,
            name: name.into(),
            kind,
            status: SpanStatus::Ok,
            start: Utc::now(),
            end: None,
            attributes: serde_json::Map::new(),
            events: Vec::new(),
            error: None,
        }
    }

    /// Set an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Record an event.
    pub fn add_event(
        &mut self,
        name: impl Into<String>,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) {
        self.events.push(SpanEvent {
            name: name.into(),
            ts: Utc::now(),
            attributes,
        });
    }

    /// Set the status, recording the message for errors.
    pub fn set_status(&mut self, status: SpanStatus, message: Option<String>) {
        self.status = status;
        if status == SpanStatus::Error {
            self.error = message;
        }
    }

    /// Mark the span finished. Clamps so that `end >= start` always holds.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.end = Some(if now < self.start { self.start } else { now });
    }

    /// Duration in milliseconds, 0 while running.
    pub fn duration_ms(&self) -> i64 {
        self.end
            .map(|end| (end - self.start).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    /// Whether this is a root span.
    pub fn is_root(&self) -> bool {
        self.context.parent_id.is_none()
    }
}
