//! Error types for the Hearthmind domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum; all of them roll up into the top-level [`Error`]
//! and classify themselves into an [`ErrorKind`] so callers (and the MCP
//! code mapping) can branch on behavior rather than on concrete types.

use thiserror::Error;

/// Behavioral classification of an error, independent of which subsystem
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed arguments, schema violations, oversized inputs.
    InvalidInput,
    /// Missing resource/tool/prompt/chunk/source/session.
    NotFound,
    /// Generation/embedding backend down or refusing.
    BackendUnavailable,
    /// Deadline exceeded.
    Timeout,
    /// Backpressure from an internal or external limit.
    Overloaded,
    /// Cooperative cancellation.
    Cancelled,
    /// Verifier reported an unacceptable score after retry.
    VerificationFailed,
    /// Duplicate ingest, branch name collision.
    Conflict,
    /// Invariant violated; unexpected.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::BackendUnavailable => "backend_unavailable",
            Self::Timeout => "timeout",
            Self::Overloaded => "overloaded",
            Self::Cancelled => "cancelled",
            Self::VerificationFailed => "verification_failed",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The top-level error type for all Hearthmind operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Chunk / vector store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Knowledge graph errors ---
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    // --- Tiered memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Router errors ---
    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    // --- Worker errors ---
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Verification ---
    #[error("Verification failed: answer scored {score:.2} against retrieved context")]
    VerificationFailed { score: f64 },

    // --- Cancellation ---
    #[error("Operation cancelled")]
    Cancelled,

    // --- Input validation ---
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify this error into the behavioral taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Gateway(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Graph(e) => e.kind(),
            Self::Memory(e) => e.kind(),
            Self::Router(e) => e.kind(),
            Self::Worker(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Config { .. } => ErrorKind::InvalidInput,
            Self::Serialization(_) => ErrorKind::InvalidInput,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Backend overloaded: {0}")]
    Overloaded(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Protocol error from backend: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::BackendUnavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Overloaded(_) => ErrorKind::Overloaded,
            Self::Invalid(_) => ErrorKind::InvalidInput,
            Self::Protocol(_) => ErrorKind::Internal,
        }
    }

    /// Whether the gateway's bounded retry applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate ingest: {0}")]
    Conflict(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DimensionMismatch { .. } => ErrorKind::InvalidInput,
            Self::Storage(_) | Self::QueryFailed(_) | Self::MigrationFailed(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph storage error: {0}")]
    Storage(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Internal,
            Self::Extraction(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Unknown core section: {0}")]
    UnknownSection(String),

    #[error("Memory actor unavailable")]
    ActorClosed,
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownSection(_) => ErrorKind::NotFound,
            Self::ActorClosed => ErrorKind::Internal,
            Self::Storage(_) | Self::QueryFailed(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Route not found: {0}")]
    NotFound(String),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPattern { .. } => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker not found: {0}")]
    NotFound(String),

    #[error("Worker execution failed: {worker} — {reason}")]
    ExecutionFailed { worker: String, reason: String },

    #[error("Worker cancelled: {0}")]
    Cancelled(String),

    #[error("Gateway error in worker {worker}: {source}")]
    Gateway {
        worker: String,
        #[source]
        source: GatewayError,
    },
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ExecutionFailed { .. } => ErrorKind::Internal,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Gateway { source, .. } => source.kind(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Branch already exists: {0}")]
    BranchConflict(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::MessageNotFound(_) => ErrorKind::NotFound,
            Self::BranchConflict(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_kinds() {
        assert_eq!(
            Error::Gateway(GatewayError::Unavailable("down".into())).kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            Error::Gateway(GatewayError::Overloaded("semaphore".into())).kind(),
            ErrorKind::Overloaded
        );
    }

    #[test]
    fn retryable_is_limited_to_unavailable_and_timeout() {
        assert!(GatewayError::Unavailable("x".into()).is_retryable());
        assert!(GatewayError::Timeout("x".into()).is_retryable());
        assert!(!GatewayError::Overloaded("x".into()).is_retryable());
        assert!(!GatewayError::Invalid("x".into()).is_retryable());
    }

    #[test]
    fn conflict_surfaces_from_store() {
        let err = Error::Store(StoreError::Conflict("policy.txt".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("policy.txt"));
    }

    #[test]
    fn session_branch_collision_is_conflict() {
        let err = Error::Session(SessionError::BranchConflict("alt".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn verification_failure_reports_score() {
        let err = Error::VerificationFailed { score: 0.42 };
        assert_eq!(err.kind(), ErrorKind::VerificationFailed);
        assert!(err.to_string().contains("0.42"));
    }
}
