//! End-to-end coordinator scenarios against an in-process stack:
//! SQLite stores, the static test gateway, and the full worker set.

use hearthmind_config::{MemoryConfig, OrchestratorConfig, RetrievalConfig, RouterConfig};
use hearthmind_core::chunk::{Chunk, Source, SourceKind};
use hearthmind_core::message::ConversationId;
use hearthmind_core::{CancellationToken, ChunkStore, Error, Gateway};
use hearthmind_gateway::testing::StaticGateway;
use hearthmind_index::{sync_pending, SqliteChunkStore, SqliteVectorIndex};
use hearthmind_memory::SqliteMemoryStore;
use hearthmind_orchestrator::Coordinator;
use hearthmind_retrieval::RetrievalEngine;
use hearthmind_router::Router;
use hearthmind_sessions::SessionStore;
use hearthmind_workers::default_registry;
use std::sync::Arc;

struct Stack {
    _dir: tempfile::TempDir,
    coordinator: Coordinator,
    store: Arc<SqliteChunkStore>,
    sessions: Arc<SessionStore>,
}

async fn stack(gateway: Arc<StaticGateway>, docs: &[(&str, &str)], strict: bool) -> Stack {
    let dir = tempfile::tempdir().unwrap();

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
    for (uri, text) in docs {
        let source = Source::new(*uri, SourceKind::Text, "text/plain", format!("hash-{uri}"));
        store.put_source(&source).await.unwrap();
        store
            .put_chunks(&[Chunk::new(&source.id, 0, *text)])
            .await
            .unwrap();
    }
    sync_pending(store.as_ref(), index.as_ref(), gateway.as_ref(), 64)
        .await
        .unwrap();

    let retrieval = Arc::new(RetrievalEngine::new(
        store.clone(),
        index,
        gateway.clone(),
        RetrievalConfig::default(),
    ));
    let registry = Arc::new(default_registry(gateway.clone(), retrieval.clone()));
    let router = Arc::new(
        Router::with_defaults(gateway.clone(), RouterConfig::default())
            .await
            .unwrap(),
    );
    let memory_store = Arc::new(
        SqliteMemoryStore::new(dir.path().join("memory.db").to_str().unwrap())
            .await
            .unwrap(),
    );
    let memory = hearthmind_memory::spawn(MemoryConfig::default(), memory_store, gateway.clone())
        .await
        .unwrap();
    let sessions = Arc::new(
        SessionStore::new(dir.path().join("sessions.db").to_str().unwrap())
            .await
            .unwrap(),
    );

    let config = OrchestratorConfig {
        strict,
        ..OrchestratorConfig::default()
    };
    let coordinator = Coordinator::new(
        registry,
        router,
        memory,
        retrieval,
        store.clone(),
        gateway,
        config,
    )
    .with_sessions(sessions.clone());

    Stack {
        _dir: dir,
        coordinator,
        store,
        sessions,
    }
}

const POLICY: &str = "Annual leave is 20 working days for employees after one year.";

#[tokio::test]
async fn rag_question_is_grounded_and_cited() {
    // Scenario: a grounded question answered from the corpus. The assistant
    // worker is handed the retrieved context and answers with "20".
    let gateway = Arc::new(StaticGateway::new(vec![
        "Annual leave is 20 working days for employees after one year [1].",
    ]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], false).await;

    let response = stack
        .coordinator
        .execute("How many days of annual leave?", &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.content.contains("20"));
    assert_eq!(response.metadata["route"], "rag_search");
    assert!(response.metadata["verifier_score"].as_f64().unwrap() >= 0.9);
    assert!(!response.sources.is_empty());
    // Every cited source resolves to the policy document.
    for chunk_id in &response.sources {
        let chunk = stack.store.get(chunk_id).await.unwrap().unwrap();
        let source = stack.store.get_source(&chunk.source_id).await.unwrap().unwrap();
        assert_eq!(source.label(), "policy.txt");
    }
    assert!(response.metadata.get("degraded").is_none());
    assert!(!response.trace_id.is_empty());
}

#[tokio::test]
async fn multi_step_plan_runs_research_then_writer() {
    // Scenario: research + writer, with the writer receiving the research
    // output and the final response shaped like an email.
    let gateway = Arc::new(StaticGateway::new(vec![
        // research synthesis
        "Q3 sales grew to 1,2 million units according to the report [1].",
        // writer output
        "Subject: Q3 Sales Report\n\nDear Manager,\n\nSales grew.\n\nIt was a strong \
         quarter overall.\n\nBest regards,\nHearthmind",
    ]));
    let stack = stack(
        gateway.clone(),
        &[("q3_report.txt", "The Q3 sales report shows growth across regions.")],
        false,
    )
    .await;

    let response = stack
        .coordinator
        .execute(
            "Research the Q3 sales report and write a 3-paragraph email to the manager",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.metadata["task_kind"], "multi_step");
    assert_eq!(
        response.metadata["workers"],
        serde_json::json!(["research", "writer"])
    );
    assert!(response.content.starts_with("Subject:"));
    assert!(!response.sources.is_empty());
    // The writer's prompt carried the research step's output forward.
    let prompts = gateway.recorded_prompts();
    assert!(prompts
        .iter()
        .any(|p| p.contains("Previous Step Results") && p.contains("Q3 sales grew")));
}

#[tokio::test]
async fn verification_failure_retries_once_then_degrades() {
    // Scenario: the first answer fabricates numbers and sources; the
    // reflection pass runs the critic and one re-generation; the second
    // answer is still bad, so the response is returned degraded.
    let bad_answer = "According to Gartner, studies show Initech Systems grew 45% to \
                      9,99 million users, and research indicates more growth.";
    let gateway = Arc::new(StaticGateway::new(vec![
        bad_answer, // assistant
        "accuracy: 0.2\nrelevance: 0.5\ncompleteness: 0.4\nclarity: 0.6\nhelpfulness: 0.3", // critic
        bad_answer, // re-generation, still bad
    ]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], false).await;

    let response = stack
        .coordinator
        .execute("How many days of annual leave?", &CancellationToken::new())
        .await
        .unwrap();

    let degraded = response.metadata["degraded"].as_array().unwrap();
    assert!(degraded.contains(&serde_json::json!("verification_failed")));
    assert!(response.metadata["verifier_score"].as_f64().unwrap() < 0.5);
}

#[tokio::test]
async fn verification_failure_is_an_error_when_strict() {
    let bad_answer = "According to Gartner, studies show Initech Systems grew 45% to \
                      9,99 million users, and research indicates more growth.";
    let gateway = Arc::new(StaticGateway::new(vec![
        bad_answer,
        "accuracy: 0.2\nrelevance: 0.5\ncompleteness: 0.4\nclarity: 0.6\nhelpfulness: 0.3",
        bad_answer,
    ]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], true).await;

    let err = stack
        .coordinator
        .execute("How many days of annual leave?", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VerificationFailed { .. }));
}

#[tokio::test]
async fn reflection_recovers_a_fixable_answer() {
    // The re-generation is grounded, so the final answer is the revised one.
    let gateway = Arc::new(StaticGateway::new(vec![
        // Fabricated on several axes: a wrong number, cue phrases, and a
        // made-up attribution, so the score lands below the threshold.
        "Studies show and research indicates you get 37 days, according to HRWeekly.",
        "accuracy: 0.2\nrelevance: 0.6\ncompleteness: 0.5\nclarity: 0.7\nhelpfulness: 0.4",
        "Annual leave is 20 working days after one year.", // grounded revision
    ]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], true).await;

    let response = stack
        .coordinator
        .execute("How many days of annual leave?", &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.content.contains("20 working days"));
    assert!(response.metadata["verifier_score"].as_f64().unwrap() >= 0.9);
}

#[tokio::test]
async fn cancellation_before_execution_persists_nothing() {
    let gateway = Arc::new(StaticGateway::new(vec!["never used"]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], false).await;

    let conversation = ConversationId::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = stack
        .coordinator
        .execute_in_conversation("How many days of leave?", &conversation, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    // No partial messages were persisted to the session.
    assert!(stack.sessions.load(&conversation).await.is_err());
}

#[tokio::test]
async fn successful_exchange_is_persisted_to_the_conversation() {
    let gateway = Arc::new(StaticGateway::new(vec!["Annual leave is 20 working days [1]."]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], false).await;

    let conversation = ConversationId::new();
    stack
        .coordinator
        .execute_in_conversation(
            "How many days of annual leave?",
            &conversation,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let conv = stack.sessions.load(&conversation).await.unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[0].content, "How many days of annual leave?");
    assert!(conv.messages[1].content.contains("20"));
}

#[tokio::test]
async fn chat_skips_retrieval_and_verification() {
    let gateway = Arc::new(StaticGateway::new(vec!["Hello! How can I help today?"]));
    let stack = stack(gateway, &[("policy.txt", POLICY)], false).await;

    let response = stack
        .coordinator
        .execute("hello there", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.metadata["task_kind"], "chat");
    assert!(response.sources.is_empty());
    assert!(response.metadata.get("verifier_score").is_none());
}

#[tokio::test]
async fn empty_corpus_question_still_answers() {
    let gateway = Arc::new(StaticGateway::new(vec![
        "I don't have any documents about that yet.",
    ]));
    let stack = stack(gateway, &[], false).await;

    let response = stack
        .coordinator
        .execute("What is the leave policy?", &CancellationToken::new())
        .await
        .unwrap();

    assert!(!response.content.is_empty());
    assert!(response.sources.is_empty());
}
