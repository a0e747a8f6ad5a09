//! `server` and `http`: run the MCP server.

use crate::app::App;
use anyhow::Result;
use hearthmind_config::AppConfig;
use hearthmind_mcp::transport;
use tracing::info;

/// Serve MCP over stdio.
pub async fn stdio(config: AppConfig) -> Result<()> {
    let rate_limit = config.mcp.rate_limit_per_min;
    let app = App::build(config).await?;
    transport::stdio::serve(app.mcp.clone(), rate_limit).await?;
    app.tracer.flush().await;
    Ok(())
}

/// Serve MCP over HTTP, plus WebSocket when configured.
pub async fn http(config: AppConfig, addr_override: Option<String>) -> Result<()> {
    let addr = addr_override
        .or_else(|| config.mcp.http_addr.clone())
        .unwrap_or_else(|| "127.0.0.1:8700".to_string());
    let ws_addr = config.mcp.ws_addr.clone();
    let rate_limit = config.mcp.rate_limit_per_min;

    let app = App::build(config).await?;

    if let Some(ws_addr) = ws_addr {
        let server = app.mcp.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::ws::serve(server, &ws_addr, rate_limit).await {
                tracing::error!("websocket transport failed: {e}");
            }
        });
    }

    info!("hearthmind MCP server on http://{addr}/rpc");
    transport::http::serve(app.mcp.clone(), &addr, rate_limit).await?;
    app.tracer.flush().await;
    Ok(())
}
