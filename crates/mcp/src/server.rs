//! The JSON-RPC dispatcher.
//!
//! A single dispatcher routes method names to handlers; each request runs
//! as an independent cancellable task keyed by its `id`, and
//! `notifications/cancelled` aborts the matching in-flight request. Batch
//! requests are handled concurrently with responses aggregated in request
//! order; notifications never produce response entries.

use hearthmind_core::error::{Error, ErrorKind};
use hearthmind_core::CancellationToken;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::providers::{PromptProvider, ResourceProvider, ToolRegistry};
use crate::types::*;

/// Outbound notification capacity per connection.
const NOTIFY_BUFFER: usize = 64;

/// The MCP server.
pub struct McpServer {
    name: String,
    version: String,
    resources: Vec<Arc<dyn ResourceProvider>>,
    tools: Arc<ToolRegistry>,
    prompts: Vec<Arc<dyn PromptProvider>>,
    data_root: PathBuf,
    page_size: usize,
    inflight: Mutex<HashMap<RequestId, CancellationToken>>,
    subscriptions: Mutex<HashSet<String>>,
    log_level: Mutex<String>,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
    notify_tx: broadcast::Sender<Value>,
}

impl McpServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        resources: Vec<Arc<dyn ResourceProvider>>,
        tools: Arc<ToolRegistry>,
        prompts: Vec<Arc<dyn PromptProvider>>,
        data_root: PathBuf,
        page_size: usize,
    ) -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(NOTIFY_BUFFER);
        Arc::new(Self {
            name: name.into(),
            version: version.into(),
            resources,
            tools,
            prompts,
            data_root,
            page_size: page_size.max(1),
            inflight: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashSet::new()),
            log_level: Mutex::new("info".into()),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            notify_tx,
        })
    }

    /// Subscribe to server-initiated notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Value> {
        self.notify_tx.subscribe()
    }

    /// Whether `shutdown` has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Handle one incoming JSON value: a single message or a batch.
    /// Returns the response value, or `None` for pure notifications (and
    /// for batches consisting solely of notifications).
    pub async fn dispatch(self: &Arc<Self>, value: Value) -> Option<Value> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Some(
                        serde_json::to_value(RpcResponse::err(
                            None,
                            RpcError::new(INVALID_REQUEST, "empty batch"),
                        ))
                        .expect("static response"),
                    );
                }
                // Independent tasks; join preserves request order.
                let futures: Vec<_> = items
                    .into_iter()
                    .map(|item| {
                        let server = self.clone();
                        tokio::spawn(async move { server.handle_message(item).await })
                    })
                    .collect();
                let mut responses = Vec::new();
                for handle in futures {
                    if let Ok(Some(response)) = handle.await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            other => self.handle_message(other).await,
        }
    }

    async fn handle_message(self: &Arc<Self>, value: Value) -> Option<Value> {
        let raw_id = value.get("id").cloned();
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let id = raw_id.and_then(|v| serde_json::from_value(v).ok());
                return Some(err_value(id, RpcError::new(INVALID_REQUEST, e.to_string())));
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(err_value(
                request.id,
                RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
            ));
        }

        if request.is_notification() {
            self.handle_notification(&request).await;
            return None;
        }

        let id = request.id.clone().expect("checked above");
        let cancel = CancellationToken::new();
        self.inflight
            .lock()
            .expect("inflight lock")
            .insert(id.clone(), cancel.clone());

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::new(REQUEST_CANCELLED, "Cancelled")),
            result = self.handle_request(&request, &cancel) => result,
        };

        self.inflight.lock().expect("inflight lock").remove(&id);

        Some(match result {
            Ok(result) => serde_json::to_value(RpcResponse::ok(id, result))
                .expect("response serializes"),
            Err(error) => err_value(Some(id), error),
        })
    }

    async fn handle_notification(&self, request: &RpcRequest) {
        match request.method.as_str() {
            NOTIFY_INITIALIZED => {
                self.initialized.store(true, Ordering::SeqCst);
                debug!("client initialized");
            }
            NOTIFY_CANCELLED => {
                let Some(request_id) = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok())
                else {
                    warn!("cancelled notification without requestId");
                    return;
                };
                if let Some(token) = self
                    .inflight
                    .lock()
                    .expect("inflight lock")
                    .get(&request_id)
                {
                    info!(id = %request_id, "cancelling in-flight request");
                    token.cancel();
                }
            }
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn handle_request(
        &self,
        request: &RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "shutdown" => {
                self.shutting_down.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            }
            "resources/list" => self.resources_list(request).await,
            "resources/read" => self.resources_read(request).await,
            "resources/subscribe" => self.resources_subscribe(request, true),
            "resources/unsubscribe" => self.resources_subscribe(request, false),
            "tools/list" => self.tools_list(request),
            "tools/call" => self.tools_call(request, cancel).await,
            "prompts/list" => self.prompts_list(),
            "prompts/get" => self.prompts_get(request).await,
            "roots/list" => Ok(json!({
                "roots": [{
                    "uri": format!("file://{}", self.data_root.display()),
                    "name": "data"
                }]
            })),
            "completion/complete" => self.complete(request),
            "logging/setLevel" => self.set_level(request),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "resources": { "subscribe": true, "listChanged": true },
                "tools": { "listChanged": true },
                "prompts": { "listChanged": true },
                "logging": {},
                "sampling": {}
            },
            "serverInfo": { "name": self.name, "version": self.version }
        })
    }

    async fn resources_list(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let mut all = Vec::new();
        for provider in &self.resources {
            all.extend(provider.list().await.map_err(map_error)?);
        }
        let (page, next_cursor) = paginate(&all, request.param::<String>("cursor"), self.page_size)?;
        let mut result = json!({ "resources": page });
        if let Some(cursor) = next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn resources_read(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let uri: String = request
            .param("uri")
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing uri"))?;
        for provider in &self.resources {
            match provider.read(&uri).await {
                Ok(Some(content)) => return Ok(json!({ "contents": [content] })),
                Ok(None) => continue,
                Err(e) => return Err(map_error(e)),
            }
        }
        Err(RpcError::new(
            RESOURCE_NOT_FOUND,
            format!("resource not found: {uri}"),
        ))
    }

    fn resources_subscribe(
        &self,
        request: &RpcRequest,
        subscribe: bool,
    ) -> Result<Value, RpcError> {
        let uri: String = request
            .param("uri")
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing uri"))?;
        let mut subscriptions = self.subscriptions.lock().expect("subscriptions lock");
        if subscribe {
            subscriptions.insert(uri);
        } else {
            subscriptions.remove(&uri);
        }
        Ok(json!({}))
    }

    fn tools_list(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let all = self.tools.tools();
        let (page, next_cursor) = paginate(&all, request.param::<String>("cursor"), self.page_size)?;
        let mut result = json!({ "tools": page });
        if let Some(cursor) = next_cursor {
            result["nextCursor"] = json!(cursor);
        }
        Ok(result)
    }

    async fn tools_call(
        &self,
        request: &RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let name: String = request
            .param("name")
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing name"))?;
        let args = request
            .params
            .as_ref()
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let provider = self
            .tools
            .provider_for(&name)
            .ok_or_else(|| RpcError::new(TOOL_NOT_FOUND, format!("tool not found: {name}")))?;

        let progress_token = request
            .params
            .as_ref()
            .and_then(|p| p.pointer("/_meta/progressToken"))
            .and_then(|v| v.as_str())
            .map(String::from);
        if let Some(token) = &progress_token {
            self.notify_progress(token, 0.0, Some(1.0));
        }

        // Validate arguments against the tool's declared schema.
        let schema = provider
            .tools()
            .into_iter()
            .find(|t| t.name == name)
            .map(|t| t.input_schema)
            .unwrap_or_else(|| json!({}));
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| RpcError::new(INTERNAL_ERROR, format!("bad tool schema: {e}")))?;
        if let Err(error) = validator.validate(&args) {
            return Err(RpcError::new(
                INVALID_PARAMS,
                format!("invalid arguments for {name}: {error}"),
            ));
        }

        let result = provider.call(&name, args, cancel).await.map_err(map_error)?;
        if result.is_error {
            self.notify_message("warning", &format!("tool {name} reported an error"));
        }
        if let Some(token) = &progress_token {
            self.notify_progress(token, 1.0, Some(1.0));
        }
        serde_json::to_value(result)
            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
    }

    fn prompts_list(&self) -> Result<Value, RpcError> {
        let all: Vec<Prompt> = self.prompts.iter().flat_map(|p| p.prompts()).collect();
        Ok(json!({ "prompts": all }))
    }

    async fn prompts_get(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let name: String = request
            .param("name")
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing name"))?;
        let args = request
            .params
            .as_ref()
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        for provider in &self.prompts {
            match provider.get(&name, args.clone()).await {
                Ok(Some(messages)) => return Ok(json!({ "messages": messages })),
                Ok(None) => continue,
                Err(e) => return Err(map_error(e)),
            }
        }
        Err(RpcError::new(
            PROMPT_NOT_FOUND,
            format!("prompt not found: {name}"),
        ))
    }

    /// Completion for prompt arguments: suggest declared argument names.
    fn complete(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let prefix = request
            .params
            .as_ref()
            .and_then(|p| p.pointer("/argument/value"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_lowercase();
        let values: Vec<String> = self
            .prompts
            .iter()
            .flat_map(|p| p.prompts())
            .flat_map(|p| p.arguments)
            .map(|a| a.name)
            .filter(|name| name.to_lowercase().starts_with(&prefix))
            .collect();
        let total = values.len();
        Ok(json!({
            "completion": { "values": values, "total": total, "hasMore": false }
        }))
    }

    fn set_level(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let level: String = request
            .param("level")
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing level"))?;
        if !matches!(level.as_str(), "debug" | "info" | "warning" | "error") {
            return Err(RpcError::new(
                INVALID_PARAMS,
                format!("unknown level '{level}'"),
            ));
        }
        *self.log_level.lock().expect("level lock") = level;
        Ok(json!({}))
    }

    // --- Outbound notifications ---

    /// Progress for a long-running request.
    pub fn notify_progress(&self, token: &str, progress: f64, total: Option<f64>) {
        let mut params = json!({ "progressToken": token, "progress": progress });
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        let _ = self.notify_tx.send(notification(NOTIFY_PROGRESS, params));
    }

    /// A log line pushed to the client, honoring `logging/setLevel`.
    pub fn notify_message(&self, level: &str, message: &str) {
        let threshold = self.log_level.lock().expect("level lock").clone();
        if !level_enabled(&threshold, level) {
            return;
        }
        let _ = self.notify_tx.send(notification(
            NOTIFY_MESSAGE,
            json!({ "level": level, "data": message }),
        ));
    }

    /// Emitted when a subscribed resource changes.
    pub fn notify_resource_updated(&self, uri: &str) {
        let subscribed = self
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .contains(uri);
        if subscribed {
            let _ = self.notify_tx.send(notification(
                NOTIFY_RESOURCES_UPDATED,
                json!({ "uri": uri }),
            ));
        }
    }

    /// Emitted when the resource catalogue changes (e.g. after ingest).
    pub fn notify_resources_list_changed(&self) {
        let _ = self
            .notify_tx
            .send(notification(NOTIFY_RESOURCES_LIST_CHANGED, json!({})));
    }

    /// Emitted when the tool catalogue changes.
    pub fn notify_tools_list_changed(&self) {
        let _ = self
            .notify_tx
            .send(notification(NOTIFY_TOOLS_LIST_CHANGED, json!({})));
    }
}

fn err_value(id: Option<RequestId>, error: RpcError) -> Value {
    serde_json::to_value(RpcResponse::err(id, error)).expect("error response serializes")
}

/// Map a core error onto the JSON-RPC code space. Subject-specific
/// not-found codes are produced at the call sites that know the subject.
fn map_error(error: Error) -> RpcError {
    let kind = error.kind();
    let code = match kind {
        ErrorKind::InvalidInput => INVALID_PARAMS,
        ErrorKind::NotFound => RESOURCE_NOT_FOUND,
        ErrorKind::Cancelled => REQUEST_CANCELLED,
        _ => INTERNAL_ERROR,
    };
    RpcError::new(code, error.to_string()).with_data(json!({ "kind": kind.to_string() }))
}

fn level_enabled(threshold: &str, level: &str) -> bool {
    fn rank(level: &str) -> u8 {
        match level {
            "debug" => 0,
            "info" => 1,
            "warning" => 2,
            _ => 3,
        }
    }
    rank(level) >= rank(threshold)
}

/// Slice a catalogue into a page; cursors are opaque offsets.
fn paginate<T: Clone + serde::Serialize>(
    all: &[T],
    cursor: Option<String>,
    page_size: usize,
) -> Result<(Vec<T>, Option<String>), RpcError> {
    let offset = match cursor {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| RpcError::new(INVALID_PARAMS, format!("bad cursor '{raw}'")))?,
        None => 0,
    };
    let end = (offset + page_size).min(all.len());
    let page = all.get(offset..end).unwrap_or_default().to_vec();
    let next = (end < all.len()).then(|| end.to_string());
    Ok((page, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_cursors() {
        let items: Vec<u32> = (0..250).collect();
        let (page, next) = paginate(&items, None, 100).unwrap();
        assert_eq!(page.len(), 100);
        assert_eq!(next.as_deref(), Some("100"));

        let (page, next) = paginate(&items, Some("200".into()), 100).unwrap();
        assert_eq!(page.len(), 50);
        assert!(next.is_none());

        assert!(paginate(&items, Some("bogus".into()), 100).is_err());
    }

    #[test]
    fn log_level_threshold() {
        assert!(level_enabled("info", "error"));
        assert!(level_enabled("info", "info"));
        assert!(!level_enabled("warning", "debug"));
    }

    #[test]
    fn error_kind_mapping() {
        let err = map_error(Error::InvalidInput("bad".into()));
        assert_eq!(err.code, INVALID_PARAMS);
        let err = map_error(Error::Cancelled);
        assert_eq!(err.code, REQUEST_CANCELLED);
        let err = map_error(Error::Internal("x".into()));
        assert_eq!(err.code, INTERNAL_ERROR);
        assert_eq!(err.data.unwrap()["kind"], "internal");
    }
}
