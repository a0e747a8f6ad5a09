//! Tool dispatch contract.
//!
//! The ReAct loop invokes tools through this trait; the MCP server's tool
//! registry implements it. Keeping the contract here avoids a dependency
//! cycle between the coordinator and the protocol layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool visible to the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// Dispatches tool calls by name.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Tools available for invocation.
    async fn list_tools(&self) -> Vec<ToolSummary>;

    /// Invoke a tool. The result is the textual observation fed back into
    /// the reasoning loop; errors surface as worker-level failures.
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> std::result::Result<String, crate::error::Error>;
}
