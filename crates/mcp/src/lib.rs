//! Model Context Protocol server.
//!
//! JSON-RPC 2.0 dispatch with capability advertisement, pluggable
//! resource/tool/prompt providers, server-initiated notifications,
//! per-request cancellation, and three transports (stdio, HTTP with SSE,
//! WebSocket). Tool arguments are validated against their JSON Schemas;
//! write-capable tools are sandboxed to the data root.

pub mod providers;
pub mod sandbox;
pub mod server;
pub mod transport;
pub mod types;

pub use providers::{
    BuiltinPrompts, CorpusResources, MemoryResources, PlatformTools, PromptProvider,
    ResourceProvider, ToolProvider, ToolRegistry,
};
pub use sandbox::{validate_path, SandboxError};
pub use server::McpServer;
