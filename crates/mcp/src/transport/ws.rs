//! WebSocket transport: full duplex, server-initiated notifications
//! interleaved with responses.

use crate::server::McpServer;
use crate::transport::RateLimiter;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Build the WebSocket router (`/ws`).
pub fn router(server: Arc<McpServer>, rate_limit_per_min: u32) -> Router {
    Router::new()
        .route("/ws", any(upgrade))
        .with_state((server, rate_limit_per_min))
}

/// Serve until the listener fails.
pub async fn serve(
    server: Arc<McpServer>,
    addr: &str,
    rate_limit_per_min: u32,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("mcp: serving WebSocket on {addr}");
    axum::serve(listener, router(server, rate_limit_per_min))
        .await
        .map_err(std::io::Error::other)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State((server, rate_limit)): State<(Arc<McpServer>, u32)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection(socket, server, rate_limit))
}

async fn connection(mut socket: WebSocket, server: Arc<McpServer>, rate_limit: u32) {
    let mut notifications = server.notifications();
    let mut limiter = RateLimiter::per_minute(rate_limit);
    let (response_tx, mut response_rx) = tokio::sync::mpsc::channel::<Value>(32);

    debug!("ws: connection established");
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };

                if !limiter.allow() {
                    let _ = socket
                        .send(Message::Text(
                            super::stdio::overloaded_response().to_string().into(),
                        ))
                        .await;
                    continue;
                }

                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        let response = crate::types::RpcResponse::err(
                            None,
                            crate::types::RpcError::new(crate::types::PARSE_ERROR, e.to_string()),
                        );
                        let _ = socket
                            .send(Message::Text(
                                serde_json::to_string(&response).expect("error response").into(),
                            ))
                            .await;
                        continue;
                    }
                };

                // Dispatch off the socket loop so cancellations can land.
                let server = server.clone();
                let response_tx = response_tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = server.dispatch(value).await {
                        let _ = response_tx.send(response).await;
                    }
                });
            }
            Some(response) = response_rx.recv() => {
                if socket.send(Message::Text(response.to_string().into())).await.is_err() {
                    break;
                }
            }
            note = notifications.recv() => {
                let Ok(note) = note else { continue };
                if socket.send(Message::Text(note.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
        if server.is_shutting_down() {
            break;
        }
    }
    debug!("ws: connection closed");
}
