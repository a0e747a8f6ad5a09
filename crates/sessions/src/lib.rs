//! Conversation persistence with branching and summarization.
//!
//! Conversations persist as JSON rows; save-then-load yields an equal
//! object. A branch is a named fork from an arbitrary message; branch
//! `main` is implicit. Summarization runs through the gateway when it is
//! reachable and falls back to a heuristic digest otherwise.

use chrono::Utc;
use hearthmind_core::error::SessionError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use hearthmind_core::message::{Conversation, ConversationId, MAIN_BRANCH};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A row in a conversation listing.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub message_count: usize,
    pub branch_count: usize,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

/// SQLite-backed conversation store.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) the session database.
    pub async fn new(path: &str) -> Result<Self, SessionError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| SessionError::Storage(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| SessionError::Storage(format!("failed to open SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id         TEXT PRIMARY KEY,
                record     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| SessionError::Storage(format!("conversations table: {e}")))?;

        info!("session store initialized at {path}");
        Ok(Self { pool })
    }

    /// Persist a conversation (insert or update).
    pub async fn save(&self, conversation: &Conversation) -> Result<(), SessionError> {
        let record = serde_json::to_string(conversation)
            .map_err(|e| SessionError::Storage(format!("serialize conversation: {e}")))?;
        sqlx::query(
            "INSERT OR REPLACE INTO conversations (id, record, created_at, updated_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(conversation.id.to_string())
        .bind(record)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(format!("save conversation: {e}")))?;
        debug!(id = %conversation.id, "conversation saved");
        Ok(())
    }

    /// Load a conversation by ID.
    pub async fn load(&self, id: &ConversationId) -> Result<Conversation, SessionError> {
        let record: Option<String> =
            sqlx::query_scalar("SELECT record FROM conversations WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SessionError::Storage(format!("load conversation: {e}")))?;

        let raw = record.ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        serde_json::from_str(&raw)
            .map_err(|e| SessionError::Storage(format!("parse conversation: {e}")))
    }

    /// List conversations, newest first.
    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationSummary>, SessionError> {
        let rows = sqlx::query(
            "SELECT record FROM conversations ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SessionError::Storage(format!("list conversations: {e}")))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let raw: String = row.try_get("record").ok()?;
                let conv: Conversation = serde_json::from_str(&raw).ok()?;
                Some(ConversationSummary {
                    message_count: conv.messages.len(),
                    branch_count: conv.branches.len(),
                    created_at: conv.created_at,
                    updated_at: conv.updated_at,
                    id: conv.id,
                })
            })
            .collect())
    }

    /// Delete a conversation. Returns whether it existed.
    pub async fn delete(&self, id: &ConversationId) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("delete conversation: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Fork a named branch from a message on the active branch. The new
    /// branch holds the history up to and including that message and
    /// becomes the active branch. Fails with `BranchConflict` when the
    /// name is taken (including `main`).
    pub async fn branch(
        &self,
        id: &ConversationId,
        branch_name: &str,
        from_message_id: &str,
    ) -> Result<Conversation, SessionError> {
        let mut conversation = self.load(id).await?;

        if branch_name == MAIN_BRANCH || conversation.branches.contains_key(branch_name) {
            return Err(SessionError::BranchConflict(branch_name.to_string()));
        }

        let active: Vec<_> = conversation.active_messages().to_vec();
        let position = active
            .iter()
            .position(|m| m.id == from_message_id)
            .ok_or_else(|| SessionError::MessageNotFound(from_message_id.to_string()))?;

        conversation
            .branches
            .insert(branch_name.to_string(), active[..=position].to_vec());
        conversation.branch_name = branch_name.to_string();
        self.save(&conversation).await?;

        info!(id = %conversation.id, branch = branch_name, "branch created");
        Ok(conversation)
    }
}

/// Summarize a conversation's active branch. Uses the gateway when
/// reachable; otherwise produces a heuristic digest of the recent turns.
pub async fn summarize(conversation: &Conversation, gateway: &dyn Gateway) -> String {
    let messages = conversation.active_messages();
    if messages.is_empty() {
        return String::new();
    }

    if gateway.is_available().await {
        let transcript: String = messages
            .iter()
            .map(|m| format!("{}: {}\n", m.role, m.content))
            .collect();
        let prompt = format!(
            "Summarize this conversation in 2-3 sentences, keeping decisions and facts:\n\n{transcript}"
        );
        let opts = GenerateOptions::default()
            .with_temperature(0.3)
            .with_max_tokens(200);
        if let Ok(summary) = gateway.generate(&prompt, &opts).await {
            return summary;
        }
    }

    // Heuristic fallback: clipped digest of the last few turns.
    let digest: Vec<String> = messages
        .iter()
        .rev()
        .take(5)
        .rev()
        .map(|m| {
            let clipped: String = m.content.chars().take(80).collect();
            format!("{}: {clipped}", m.role)
        })
        .collect();
    format!("Recent conversation: {}", digest.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_core::message::Message;
    use hearthmind_gateway::testing::StaticGateway;

    async fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.db").to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn save_load_round_trip_is_equal() {
        let (_dir, store) = store().await;
        let mut conversation = Conversation::new();
        conversation.system_prompt = Some("be brief".into());
        conversation.push(Message::user("hello"));
        conversation.push(Message::assistant("hi"));

        store.save(&conversation).await.unwrap();
        let loaded = store.load(&conversation.id).await.unwrap();

        assert_eq!(
            serde_json::to_value(&conversation).unwrap(),
            serde_json::to_value(&loaded).unwrap()
        );
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.load(&ConversationId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_paginates_newest_first() {
        let (_dir, store) = store().await;
        for i in 0..3 {
            let mut conv = Conversation::new();
            conv.push(Message::user(format!("conversation {i}")));
            store.save(&conv).await.unwrap();
        }

        let page = store.list(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        let rest = store.list(10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(page[0].updated_at >= page[1].updated_at);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (_dir, store) = store().await;
        let conv = Conversation::new();
        store.save(&conv).await.unwrap();
        assert!(store.delete(&conv.id).await.unwrap());
        assert!(!store.delete(&conv.id).await.unwrap());
    }

    #[tokio::test]
    async fn branch_forks_at_message_and_activates() {
        let (_dir, store) = store().await;
        let mut conv = Conversation::new();
        let first = Message::user("keep me");
        let first_id = first.id.clone();
        conv.push(first);
        conv.push(Message::assistant("drop me on the fork"));
        store.save(&conv).await.unwrap();

        let branched = store.branch(&conv.id, "alt", &first_id).await.unwrap();
        assert_eq!(branched.branch_name, "alt");
        assert_eq!(branched.active_messages().len(), 1);
        assert_eq!(branched.messages.len(), 2);

        // The fork persisted.
        let reloaded = store.load(&conv.id).await.unwrap();
        assert_eq!(reloaded.branches["alt"].len(), 1);
    }

    #[tokio::test]
    async fn branch_name_collision_is_conflict() {
        let (_dir, store) = store().await;
        let mut conv = Conversation::new();
        let msg = Message::user("m");
        let msg_id = msg.id.clone();
        conv.push(msg);
        store.save(&conv).await.unwrap();

        store.branch(&conv.id, "alt", &msg_id).await.unwrap();
        let err = store.branch(&conv.id, "alt", &msg_id).await.unwrap_err();
        assert!(matches!(err, SessionError::BranchConflict(_)));

        let err = store.branch(&conv.id, MAIN_BRANCH, &msg_id).await.unwrap_err();
        assert!(matches!(err, SessionError::BranchConflict(_)));
    }

    #[tokio::test]
    async fn branch_from_unknown_message_fails() {
        let (_dir, store) = store().await;
        let conv = Conversation::new();
        store.save(&conv).await.unwrap();
        let err = store.branch(&conv.id, "alt", "missing").await.unwrap_err();
        assert!(matches!(err, SessionError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn summarize_uses_gateway_when_available() {
        let mut conv = Conversation::new();
        conv.push(Message::user("What is our leave policy?"));
        conv.push(Message::assistant("20 working days."));

        let gateway = StaticGateway::new(vec!["User asked about leave; answer was 20 days."]);
        let summary = summarize(&conv, &gateway).await;
        assert!(summary.contains("20 days"));
    }

    #[tokio::test]
    async fn summarize_falls_back_without_backend() {
        let mut conv = Conversation::new();
        conv.push(Message::user("What is our leave policy?"));

        let gateway = StaticGateway::unavailable();
        let summary = summarize(&conv, &gateway).await;
        assert!(summary.starts_with("Recent conversation:"));
        assert!(summary.contains("leave policy"));
    }
}
