//! Distributed tracing for Hearthmind.
//!
//! Provides span creation with parent/child linking, async-safe current-span
//! storage, W3C `traceparent` propagation, and batched export to pluggable
//! exporters (console, embedded SQLite).

pub mod export;
pub mod model;
pub mod tracer;

pub use export::{ConsoleExporter, SpanExporter, SqliteExporter};
pub use model::{Span, SpanContext, SpanEvent, SpanKind, SpanStatus};
pub use tracer::{SpanGuard, Tracer};

/// Errors from the tracing subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("invalid traceparent header: {0}")]
    InvalidHeader(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
