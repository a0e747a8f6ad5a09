//! # Hearthmind Core
//!
//! Domain types, traits, and error definitions for the Hearthmind
//! retrieval-augmented assistant platform. This crate has **zero framework
//! dependencies** — it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod chunk;
pub mod entity;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod memory;
pub mod message;
pub mod plan;
pub mod retrieval;
pub mod route;
pub mod store;
pub mod token;
pub mod tool;
pub mod worker;

// Re-export key types at crate root for ergonomics
pub use chunk::{Chunk, Source, SourceKind};
pub use entity::{Entity, EntityKind, Relation};
pub use error::{
    Error, ErrorKind, GatewayError, GraphError, MemoryError, Result, RouterError, SessionError,
    StoreError, WorkerError,
};
pub use feedback::{Feedback, FeedbackKind};
pub use gateway::{Gateway, GenerateOptions, TextStream};
pub use memory::{MemoryBlock, MemoryTier, RecallEntry};
pub use message::{Conversation, ConversationId, Message, Role};
pub use plan::{Plan, Step, TaskKind};
pub use retrieval::{
    Citation, MatchKind, RetrievalResponse, RetrievalResult, RetrieveOptions, SearchStrategy,
};
pub use route::{Route, RouteKind, RouteMatch, RouteMatchKind};
pub use store::{ChunkStore, FilterClause, MetadataFilter, VectorIndex};
pub use tool::{ToolDispatcher, ToolSummary};
pub use worker::{Worker, WorkerContext, WorkerRegistry, WorkerResponse};

// Every externally visible operation carries a cancellation signal.
pub use tokio_util::sync::CancellationToken;
