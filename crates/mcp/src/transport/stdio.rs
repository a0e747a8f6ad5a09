//! stdio transport: line-delimited JSON on stdin/stdout.
//!
//! One JSON message per line in both directions; diagnostics go to stderr
//! through `tracing`. Each incoming message dispatches on its own task so
//! a cancellation notification can land while an earlier request is still
//! running.

use crate::server::McpServer;
use crate::transport::RateLimiter;
use crate::types::{PARSE_ERROR, RpcError, RpcResponse};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serve over stdin/stdout until EOF or `shutdown`.
pub async fn serve(server: Arc<McpServer>, rate_limit_per_min: u32) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);

    // Single writer task keeps stdout line-atomic.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(value) = out_rx.recv().await {
            let mut line = value.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Forward server-initiated notifications.
    let mut notifications = server.notifications();
    let notify_out = out_tx.clone();
    tokio::spawn(async move {
        while let Ok(note) = notifications.recv().await {
            if notify_out.send(note).await.is_err() {
                break;
            }
        }
    });

    info!("mcp: serving on stdio");
    let mut limiter = RateLimiter::per_minute(rate_limit_per_min);

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if !limiter.allow() {
            warn!("stdio connection over rate limit");
            let _ = out_tx
                .send(overloaded_response())
                .await;
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                let response = RpcResponse::err(None, RpcError::new(PARSE_ERROR, e.to_string()));
                let _ = out_tx
                    .send(serde_json::to_value(response).expect("error response"))
                    .await;
                continue;
            }
        };

        let task_server = server.clone();
        let out = out_tx.clone();
        tokio::spawn(async move {
            if let Some(response) = task_server.dispatch(value).await {
                let _ = out.send(response).await;
            }
        });

        if server.is_shutting_down() {
            debug!("mcp: shutdown requested");
            break;
        }
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

pub(crate) fn overloaded_response() -> Value {
    serde_json::to_value(RpcResponse::err(
        None,
        RpcError::new(crate::types::INTERNAL_ERROR, "rate limit exceeded")
            .with_data(serde_json::json!({ "kind": "overloaded" })),
    ))
    .expect("static response")
}
