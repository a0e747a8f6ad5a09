//! HTTP transport: `POST /rpc` for requests and batches, `GET /events`
//! for server-sent notifications.

use crate::server::McpServer;
use crate::transport::RateLimiter;
use crate::types::{PARSE_ERROR, RpcError, RpcResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::info;

#[derive(Clone)]
struct HttpState {
    server: Arc<McpServer>,
    limiter: Arc<Mutex<RateLimiter>>,
}

/// Build the HTTP router.
pub fn router(server: Arc<McpServer>, rate_limit_per_min: u32) -> Router {
    let state = HttpState {
        server,
        limiter: Arc::new(Mutex::new(RateLimiter::per_minute(rate_limit_per_min))),
    };
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/events", get(handle_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until the listener fails or shutdown is requested.
pub async fn serve(
    server: Arc<McpServer>,
    addr: &str,
    rate_limit_per_min: u32,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("mcp: serving HTTP on {addr}");
    axum::serve(listener, router(server, rate_limit_per_min))
        .await
        .map_err(std::io::Error::other)
}

async fn handle_rpc(State(state): State<HttpState>, body: String) -> impl IntoResponse {
    if !state.limiter.lock().expect("limiter lock").allow() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(super::stdio::overloaded_response()),
        )
            .into_response();
    }

    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            let response = RpcResponse::err(None, RpcError::new(PARSE_ERROR, e.to_string()));
            return (
                StatusCode::OK,
                Json(serde_json::to_value(response).expect("error response")),
            )
                .into_response();
        }
    };

    match state.server.dispatch(value).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        // A pure notification: acknowledged without a body.
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn handle_events(
    State(state): State<HttpState>,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let mut notifications = state.server.notifications();
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        while let Ok(note) = notifications.recv().await {
            if tx.send(Ok(Event::default().data(note.to_string()))).await.is_err() {
                break;
            }
        }
    });
    Sse::new(ReceiverStream::new(rx))
}
