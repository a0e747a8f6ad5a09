//! Specialist workers.
//!
//! Each worker satisfies the [`hearthmind_core::Worker`] trait; behavior
//! difference lives in per-worker configuration (system prompts, context
//! builders), not inheritance. The registry is a flat `name → Worker` map.

pub mod analyzer;
pub mod assistant;
pub mod critic;
pub mod planner;
pub mod research;
pub mod writer;

pub use analyzer::AnalyzerWorker;
pub use assistant::AssistantWorker;
pub use critic::{CriticScores, CriticWorker};
pub use planner::PlannerWorker;
pub use research::ResearchWorker;
pub use writer::WriterWorker;

use hearthmind_core::error::{GatewayError, WorkerError};
use hearthmind_core::{CancellationToken, Gateway, WorkerRegistry};
use hearthmind_retrieval::RetrievalEngine;
use std::sync::Arc;

/// Build a registry with the full specialist set.
pub fn default_registry(
    gateway: Arc<dyn Gateway>,
    retrieval: Arc<RetrievalEngine>,
) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(ResearchWorker::new(
        gateway.clone(),
        retrieval.clone(),
    )));
    registry.register(Arc::new(WriterWorker::new(gateway.clone())));
    registry.register(Arc::new(AnalyzerWorker::new(gateway.clone())));
    registry.register(Arc::new(AssistantWorker::new(gateway.clone(), retrieval)));
    registry.register(Arc::new(PlannerWorker::new(gateway.clone())));
    registry.register(Arc::new(CriticWorker::new(gateway)));
    registry
}

/// Bail out with `Cancelled` when the token has fired. Workers call this
/// between suspension points.
pub(crate) fn check_cancelled(worker: &str, cancel: &CancellationToken) -> Result<(), WorkerError> {
    if cancel.is_cancelled() {
        Err(WorkerError::Cancelled(worker.to_string()))
    } else {
        Ok(())
    }
}

/// Wrap a gateway failure in the worker's error type.
pub(crate) fn gateway_err(worker: &str, source: GatewayError) -> WorkerError {
    WorkerError::Gateway {
        worker: worker.to_string(),
        source,
    }
}
