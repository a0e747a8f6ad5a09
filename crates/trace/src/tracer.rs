//! The tracer: span creation, current-span storage, batched export.
//!
//! The current span is stored per logical task in a `task_local!` stack.
//! Code that wants ambient parenting wraps its future in [`Tracer::scope`];
//! spans started inside automatically become children of the innermost open
//! span. Finished spans collect into a bounded batch and flow to the
//! configured exporters.

use crate::export::SpanExporter;
use crate::model::{Span, SpanContext, SpanKind, SpanStatus};
use std::cell::RefCell;
use std::sync::{Arc, Mutex};

tokio::task_local! {
    static CURRENT: RefCell<Vec<SpanContext>>;
}

/// Default number of spans buffered before a batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

struct TracerInner {
    exporters: Vec<Arc<dyn SpanExporter>>,
    buffer: Mutex<Vec<Span>>,
    batch_size: usize,
}

/// Handle to the tracing pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    /// A tracer with the given exporters and the default batch size.
    pub fn new(exporters: Vec<Arc<dyn SpanExporter>>) -> Self {
        Self::with_batch_size(exporters, DEFAULT_BATCH_SIZE)
    }

    /// A tracer with an explicit batch size.
    pub fn with_batch_size(exporters: Vec<Arc<dyn SpanExporter>>, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                exporters,
                buffer: Mutex::new(Vec::new()),
                batch_size: batch_size.max(1),
            }),
        }
    }

    /// A tracer that drops all spans. Useful in tests and when
    /// `TRACE_EXPORT=none`.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Run a future with its own current-span stack. Spans started inside
    /// nest under each other; spans started outside any scope are roots.
    pub async fn scope<F>(fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT.scope(RefCell::new(Vec::new()), fut).await
    }

    /// The innermost open span context on this task, if any.
    pub fn current() -> Option<SpanContext> {
        CURRENT
            .try_with(|stack| stack.borrow().last().cloned())
            .ok()
            .flatten()
    }

    /// Start a span. Parents under the current span when one is open,
    /// otherwise starts a new root.
    pub fn start_span(&self, name: impl Into<String>, kind: SpanKind) -> SpanGuard {
        let context = match Self::current() {
            Some(parent) => parent.child(),
            None => SpanContext::root(),
        };
        self.start_with_context(context, name, kind)
    }

    /// Start a span as a child of an explicit parent (e.g. a remote context
    /// parsed from a `traceparent` header).
    pub fn start_span_from(
        &self,
        parent: &SpanContext,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> SpanGuard {
        self.start_with_context(parent.child(), name, kind)
    }

    fn start_with_context(
        &self,
        context: SpanContext,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> SpanGuard {
        let _ = CURRENT.try_with(|stack| stack.borrow_mut().push(context.clone()));
        SpanGuard {
            span: Some(Span::start(context, name, kind)),
            tracer: self.clone(),
        }
    }

    /// Export everything currently buffered, regardless of batch size.
    pub async fn flush(&self) {
        let batch: Vec<Span> = {
            let mut buffer = self.inner.buffer.lock().expect("trace buffer poisoned");
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }
        for exporter in &self.inner.exporters {
            if let Err(e) = exporter.export(&batch).await {
                tracing::warn!(exporter = exporter.name(), "span export failed: {e}");
            }
        }
    }

    /// Number of spans waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().expect("trace buffer poisoned").len()
    }

    fn record(&self, span: Span) {
        if self.inner.exporters.is_empty() {
            return;
        }
        let should_flush = {
            let mut buffer = self.inner.buffer.lock().expect("trace buffer poisoned");
            buffer.push(span);
            buffer.len() >= self.inner.batch_size
        };
        if should_flush
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let tracer = self.clone();
            handle.spawn(async move { tracer.flush().await });
        }
    }
}

/// Scoped span handle. Finishes and records the span on drop; pops the
/// current-span stack when dropped on the task that created it.
pub struct SpanGuard {
    span: Option<Span>,
    tracer: Tracer,
}

impl SpanGuard {
    /// The span's identity, for propagation to children or headers.
    pub fn context(&self) -> SpanContext {
        self.span.as_ref().expect("span taken").context.clone()
    }

    /// Set an attribute on the underlying span.
    pub fn set_attr(&mut self, key: impl Into<String>, value: serde_json::Value) {
        if let Some(span) = self.span.as_mut() {
            span.set_attr(key, value);
        }
    }

    /// Record an event on the underlying span.
    pub fn add_event(
        &mut self,
        name: impl Into<String>,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) {
        if let Some(span) = self.span.as_mut() {
            span.add_event(name, attributes);
        }
    }

    /// Mark the span failed with the given message.
    pub fn set_error(&mut self, message: impl Into<String>) {
        if let Some(span) = self.span.as_mut() {
            span.set_status(SpanStatus::Error, Some(message.into()));
        }
    }

    /// Record an error status from a result, passing the result through.
    pub fn observe<T, E: std::fmt::Display>(
        &mut self,
        result: Result<T, E>,
    ) -> Result<T, E> {
        if let Err(e) = &result {
            self.set_error(e.to_string());
        }
        result
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        let Some(mut span) = self.span.take() else {
            return;
        };
        let _ = CURRENT.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.last() == Some(&span.context) {
                stack.pop();
            }
        });
        span.finish();
        self.tracer.record(span);
    }
}
