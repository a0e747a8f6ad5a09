//! Protocol-level tests against a fully wired server: initialize, the
//! catalogue round-trip laws, batches, pagination, and cancellation.

use async_trait::async_trait;
use hearthmind_config::{MemoryConfig, RetrievalConfig};
use hearthmind_core::chunk::{Chunk, Source, SourceKind};
use hearthmind_core::entity::EntityKind;
use hearthmind_core::error::Error;
use hearthmind_core::{CancellationToken, ChunkStore, Gateway};
use hearthmind_gateway::testing::StaticGateway;
use hearthmind_graph::KnowledgeGraph;
use hearthmind_index::{sync_pending, SqliteChunkStore, SqliteVectorIndex};
use hearthmind_memory::SqliteMemoryStore;
use hearthmind_mcp::types::{Tool, ToolResult};
use hearthmind_mcp::{
    BuiltinPrompts, CorpusResources, McpServer, MemoryResources, PlatformTools, ToolProvider,
    ToolRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// A tool that sleeps long enough to be cancelled.
struct SleepTools;

#[async_trait]
impl ToolProvider for SleepTools {
    fn tools(&self) -> Vec<Tool> {
        vec![Tool {
            name: "sleep".into(),
            description: Some("Sleeps for ten seconds".into()),
            input_schema: json!({ "type": "object", "properties": {} }),
        }]
    }

    async fn call(
        &self,
        _name: &str,
        _args: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, Error> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
                Ok(ToolResult::ok("woke up"))
            }
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    server: Arc<McpServer>,
}

async fn server_with_page_size(page_size: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StaticGateway::new(vec![]));

    let store = Arc::new(
        SqliteChunkStore::new(dir.path().join("chunks.db").to_str().unwrap())
            .await
            .unwrap(),
    );
    let index = Arc::new(
        SqliteVectorIndex::new(
            dir.path().join("vectors.db").to_str().unwrap(),
            gateway.dimension(),
        )
        .await
        .unwrap(),
    );
    let source = Source::new("policy.txt", SourceKind::Text, "text/plain", "hash-p");
    store.put_source(&source).await.unwrap();
    store
        .put_chunks(&[Chunk::new(
            &source.id,
            0,
            "Annual leave is 20 working days for employees after one year.",
        )])
        .await
        .unwrap();
    sync_pending(store.as_ref(), index.as_ref(), gateway.as_ref(), 64)
        .await
        .unwrap();

    let retrieval = Arc::new(hearthmind_retrieval::RetrievalEngine::new(
        store.clone(),
        index.clone(),
        gateway.clone(),
        RetrievalConfig::default(),
    ));

    let memory_store = Arc::new(
        SqliteMemoryStore::new(dir.path().join("memory.db").to_str().unwrap())
            .await
            .unwrap(),
    );
    let memory = hearthmind_memory::spawn(MemoryConfig::default(), memory_store, gateway.clone())
        .await
        .unwrap();

    let graph = Arc::new(KnowledgeGraph::in_memory());
    let hr = graph
        .upsert_entity("People Team", EntityKind::Org, 0.9, None)
        .await
        .unwrap();
    let policy = graph
        .upsert_entity("Leave Policy", EntityKind::Doc, 0.9, None)
        .await
        .unwrap();
    graph
        .upsert_relation(&hr, &policy, "owns", 0.9, None)
        .await
        .unwrap();

    let tools = Arc::new(ToolRegistry::new(vec![
        Arc::new(PlatformTools::new(
            store.clone(),
            index.clone(),
            retrieval,
            memory.clone(),
            graph,
            dir.path().to_path_buf(),
        )),
        Arc::new(SleepTools),
    ]));

    let server = McpServer::new(
        "hearthmind",
        "0.1.0",
        vec![
            Arc::new(CorpusResources::new(store)),
            Arc::new(MemoryResources::new(memory)),
        ],
        tools,
        vec![Arc::new(BuiltinPrompts)],
        dir.path().to_path_buf(),
        page_size,
    );

    Fixture { _dir: dir, server }
}

async fn fixture() -> Fixture {
    server_with_page_size(100).await
}

fn request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

#[tokio::test]
async fn initialize_advertises_capabilities() {
    let fx = fixture().await;
    let response = fx
        .server
        .dispatch(request(1, "initialize", json!({})))
        .await
        .unwrap();

    let result = &response["result"];
    assert_eq!(result["serverInfo"]["name"], "hearthmind");
    assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    assert!(result["capabilities"]["logging"].is_object());
    assert!(result["protocolVersion"].is_string());
}

#[tokio::test]
async fn every_listed_tool_is_callable_with_minimum_arguments() {
    let fx = fixture().await;
    let listing = fx
        .server
        .dispatch(request(1, "tools/list", json!({})))
        .await
        .unwrap();
    let tools = listing["result"]["tools"].as_array().unwrap().clone();
    assert!(tools.len() >= 7);

    for (i, tool) in tools.iter().enumerate() {
        let name = tool["name"].as_str().unwrap();
        if name == "sleep" {
            continue;
        }
        // Build minimum valid arguments from the schema's required list.
        let mut args = serde_json::Map::new();
        if let Some(required) = tool["inputSchema"]["required"].as_array() {
            for field in required {
                let field = field.as_str().unwrap();
                let value = match tool["inputSchema"]["properties"][field]["type"].as_str() {
                    Some("integer") | Some("number") => json!(1),
                    _ => json!("leave"),
                };
                args.insert(field.to_string(), value);
            }
        }

        let response = fx
            .server
            .dispatch(request(
                10 + i as i64,
                "tools/call",
                json!({ "name": name, "arguments": args }),
            ))
            .await
            .unwrap();
        assert!(
            response.get("error").is_none(),
            "tool {name} failed: {response}"
        );
    }
}

#[tokio::test]
async fn every_listed_resource_is_readable() {
    let fx = fixture().await;
    let listing = fx
        .server
        .dispatch(request(1, "resources/list", json!({})))
        .await
        .unwrap();
    let resources = listing["result"]["resources"].as_array().unwrap().clone();
    assert!(resources.len() >= 2);

    for (i, resource) in resources.iter().enumerate() {
        let uri = resource["uri"].as_str().unwrap();
        let response = fx
            .server
            .dispatch(request(
                10 + i as i64,
                "resources/read",
                json!({ "uri": uri }),
            ))
            .await
            .unwrap();
        assert!(response.get("error").is_none(), "read {uri} failed");
        assert_eq!(response["result"]["contents"][0]["uri"], *uri);
    }
}

#[tokio::test]
async fn deleting_a_source_cascades_and_disappears_from_the_catalogue() {
    let fx = fixture().await;

    let listing = fx
        .server
        .dispatch(request(1, "resources/list", json!({})))
        .await
        .unwrap();
    let uri = listing["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .find_map(|r| {
            let uri = r["uri"].as_str().unwrap();
            uri.starts_with("corpus://source/").then(|| uri.to_string())
        })
        .expect("a corpus source is listed");
    let source_id = uri.strip_prefix("corpus://source/").unwrap().to_string();

    let response = fx
        .server
        .dispatch(request(
            2,
            "tools/call",
            json!({ "name": "corpus_delete_source", "arguments": { "source_id": source_id } }),
        ))
        .await
        .unwrap();
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], false);

    // The resource is gone and reads now miss.
    let read = fx
        .server
        .dispatch(request(3, "resources/read", json!({ "uri": uri })))
        .await
        .unwrap();
    assert_eq!(read["error"]["code"], -32001);

    // Searching the emptied corpus degrades to "no documents", not an error.
    let search = fx
        .server
        .dispatch(request(
            4,
            "tools/call",
            json!({ "name": "corpus_search", "arguments": { "query": "annual leave" } }),
        ))
        .await
        .unwrap();
    assert!(search.get("error").is_none());
}

#[tokio::test]
async fn unknown_subjects_use_their_reserved_codes() {
    let fx = fixture().await;

    let response = fx
        .server
        .dispatch(request(1, "resources/read", json!({ "uri": "corpus://source/nope" })))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32001);

    let response = fx
        .server
        .dispatch(request(2, "tools/call", json!({ "name": "nope", "arguments": {} })))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32002);

    let response = fx
        .server
        .dispatch(request(3, "prompts/get", json!({ "name": "nope" })))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32003);

    let response = fx
        .server
        .dispatch(request(4, "no/such/method", json!({})))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn schema_validation_rejects_bad_arguments() {
    let fx = fixture().await;
    // corpus_search requires a string `query`.
    let response = fx
        .server
        .dispatch(request(
            1,
            "tools/call",
            json!({ "name": "corpus_search", "arguments": { "query": 42 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32602);

    let response = fx
        .server
        .dispatch(request(
            2,
            "tools/call",
            json!({ "name": "corpus_search", "arguments": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn file_write_outside_data_root_is_invalid() {
    let fx = fixture().await;
    let response = fx
        .server
        .dispatch(request(
            1,
            "tools/call",
            json!({ "name": "file_write",
                    "arguments": { "path": "../escape.txt", "content": "x" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn batch_preserves_order_and_drops_notification_entries() {
    let fx = fixture().await;
    let batch = json!([
        request(1, "prompts/list", json!({})),
        { "jsonrpc": "2.0", "method": "notifications/initialized" },
        request(2, "tools/list", json!({})),
        request(3, "roots/list", json!({})),
    ]);

    let response = fx.server.dispatch(batch).await.unwrap();
    let responses = response.as_array().unwrap();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[2]["id"], 3);
}

#[tokio::test]
async fn pure_notification_produces_no_response() {
    let fx = fixture().await;
    let response = fx
        .server
        .dispatch(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    assert!(response.is_none());
}

#[tokio::test]
async fn tools_list_paginates_with_cursor() {
    let fx = server_with_page_size(3).await;

    let first = fx
        .server
        .dispatch(request(1, "tools/list", json!({})))
        .await
        .unwrap();
    assert_eq!(first["result"]["tools"].as_array().unwrap().len(), 3);
    let cursor = first["result"]["nextCursor"].as_str().unwrap().to_string();

    let second = fx
        .server
        .dispatch(request(2, "tools/list", json!({ "cursor": cursor })))
        .await
        .unwrap();
    assert!(!second["result"]["tools"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_aborts_a_slow_tool_call() {
    let fx = fixture().await;

    let server = fx.server.clone();
    let call = tokio::spawn(async move {
        server
            .dispatch(request(7, "tools/call", json!({ "name": "sleep", "arguments": {} })))
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let note = fx
        .server
        .dispatch(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 7 }
        }))
        .await;
    assert!(note.is_none());

    let response = tokio::time::timeout(std::time::Duration::from_secs(2), call)
        .await
        .expect("cancellation must not wait for the sleep")
        .unwrap()
        .unwrap();
    assert_eq!(response["id"], 7);
    assert_eq!(response["error"]["code"], -32004);
    assert_eq!(response["error"]["message"], "Cancelled");
}

#[tokio::test]
async fn prompts_render_with_arguments() {
    let fx = fixture().await;
    let response = fx
        .server
        .dispatch(request(
            1,
            "prompts/get",
            json!({ "name": "research_brief", "arguments": { "topic": "leave policy" } }),
        ))
        .await
        .unwrap();
    let text = response["result"]["messages"][0]["content"]["text"]
        .as_str()
        .unwrap();
    assert!(text.contains("leave policy"));
}

#[tokio::test]
async fn subscribed_resource_updates_notify() {
    let fx = fixture().await;
    let mut notifications = fx.server.notifications();

    fx.server
        .dispatch(request(1, "resources/subscribe", json!({ "uri": "memory://core" })))
        .await
        .unwrap();

    // Updates to unsubscribed URIs stay silent.
    fx.server.notify_resource_updated("corpus://source/other");
    fx.server.notify_resource_updated("memory://core");

    let note = notifications.recv().await.unwrap();
    assert_eq!(note["method"], "notifications/resources/updated");
    assert_eq!(note["params"]["uri"], "memory://core");
}

#[tokio::test]
async fn progress_token_produces_progress_notifications() {
    let fx = fixture().await;
    let mut notifications = fx.server.notifications();

    let response = fx
        .server
        .dispatch(request(
            1,
            "tools/call",
            json!({
                "name": "memory_search",
                "arguments": { "query": "leave" },
                "_meta": { "progressToken": "op-1" }
            }),
        ))
        .await
        .unwrap();
    assert!(response.get("error").is_none());

    let first = notifications.recv().await.unwrap();
    assert_eq!(first["method"], "notifications/progress");
    assert_eq!(first["params"]["progressToken"], "op-1");
    assert_eq!(first["params"]["progress"], 0.0);

    let second = notifications.recv().await.unwrap();
    assert_eq!(second["params"]["progress"], 1.0);
}

#[tokio::test]
async fn logging_level_gates_messages() {
    let fx = fixture().await;
    let mut notifications = fx.server.notifications();

    fx.server
        .dispatch(request(1, "logging/setLevel", json!({ "level": "warning" })))
        .await
        .unwrap();

    fx.server.notify_message("debug", "too quiet");
    fx.server.notify_message("error", "loud enough");

    let note = notifications.recv().await.unwrap();
    assert_eq!(note["params"]["data"], "loud enough");
}

#[tokio::test]
async fn malformed_request_is_invalid() {
    let fx = fixture().await;
    let response = fx
        .server
        .dispatch(json!({ "jsonrpc": "1.0", "id": 1, "method": "initialize" }))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32600);
}
