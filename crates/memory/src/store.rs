//! SQLite persistence for the memory tiers.
//!
//! One database file holds the core sections, the working window, the
//! archival tier (with an FTS5 virtual table for ranked keyword search,
//! kept in sync by triggers), and the recall journal.

use chrono::{DateTime, Utc};
use hearthmind_core::error::MemoryError;
use hearthmind_core::memory::{MemoryBlock, MemoryTier, RecallEntry};
use hearthmind_core::message::Role;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::core_mem::CoreMemory;

/// SQLite-backed persistence for all four tiers.
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Open (or create) the memory database. Pass `":memory:"` in tests.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("memory store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        for (label, sql) in [
            (
                "core table",
                "CREATE TABLE IF NOT EXISTS core_memory (
                    singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
                    content   TEXT NOT NULL
                )",
            ),
            (
                "working table",
                "CREATE TABLE IF NOT EXISTS working (
                    pos        INTEGER PRIMARY KEY AUTOINCREMENT,
                    id         TEXT NOT NULL,
                    role       TEXT,
                    text       TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
            ),
            (
                "archival table",
                "CREATE TABLE IF NOT EXISTS archival (
                    iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                    id           TEXT UNIQUE NOT NULL,
                    text         TEXT NOT NULL,
                    importance   REAL NOT NULL DEFAULT 0.5,
                    source       TEXT,
                    tags         TEXT NOT NULL DEFAULT '[]',
                    created_at   TEXT NOT NULL,
                    accessed_at  TEXT NOT NULL,
                    access_count INTEGER NOT NULL DEFAULT 0,
                    last_decay   TEXT,
                    embedding    BLOB
                )",
            ),
            (
                "archival fts",
                "CREATE VIRTUAL TABLE IF NOT EXISTS archival_fts USING fts5(
                    text,
                    content='archival',
                    content_rowid='iid',
                    tokenize='porter unicode61'
                )",
            ),
            (
                "insert trigger",
                "CREATE TRIGGER IF NOT EXISTS archival_ai AFTER INSERT ON archival BEGIN
                    INSERT INTO archival_fts(rowid, text) VALUES (new.iid, new.text);
                END",
            ),
            (
                "delete trigger",
                "CREATE TRIGGER IF NOT EXISTS archival_ad AFTER DELETE ON archival BEGIN
                    INSERT INTO archival_fts(archival_fts, rowid, text)
                    VALUES ('delete', old.iid, old.text);
                END",
            ),
            (
                "update trigger",
                "CREATE TRIGGER IF NOT EXISTS archival_au AFTER UPDATE ON archival BEGIN
                    INSERT INTO archival_fts(archival_fts, rowid, text)
                    VALUES ('delete', old.iid, old.text);
                    INSERT INTO archival_fts(rowid, text) VALUES (new.iid, new.text);
                END",
            ),
            (
                "recall table",
                "CREATE TABLE IF NOT EXISTS recall (
                    id           TEXT PRIMARY KEY,
                    event_kind   TEXT NOT NULL,
                    description  TEXT NOT NULL,
                    ts           TEXT NOT NULL,
                    participants TEXT NOT NULL DEFAULT '[]',
                    emotions     TEXT NOT NULL DEFAULT '[]',
                    context      TEXT NOT NULL DEFAULT '{}'
                )",
            ),
            (
                "recall index",
                "CREATE INDEX IF NOT EXISTS idx_recall_ts ON recall(ts DESC)",
            ),
        ] {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::Storage(format!("{label}: {e}")))?;
        }
        debug!("memory store migrations complete");
        Ok(())
    }

    // --- Core ---

    pub async fn save_core(&self, core: &CoreMemory) -> Result<(), MemoryError> {
        let content = serde_json::to_string(core)
            .map_err(|e| MemoryError::Storage(format!("serialize core: {e}")))?;
        sqlx::query("INSERT OR REPLACE INTO core_memory (singleton, content) VALUES (0, ?)")
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("save core: {e}")))?;
        Ok(())
    }

    pub async fn load_core(&self) -> Result<CoreMemory, MemoryError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT content FROM core_memory WHERE singleton = 0")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MemoryError::QueryFailed(format!("load core: {e}")))?;
        Ok(row
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }

    // --- Working ---

    /// Replace the persisted working window with the current one.
    pub async fn save_working(&self, blocks: &[MemoryBlock]) -> Result<(), MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("begin: {e}")))?;
        sqlx::query("DELETE FROM working")
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("clear working: {e}")))?;
        for block in blocks {
            sqlx::query("INSERT INTO working (id, role, text, created_at) VALUES (?, ?, ?, ?)")
                .bind(&block.id)
                .bind(block.role.map(|r| r.to_string()))
                .bind(&block.text)
                .bind(block.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| MemoryError::Storage(format!("insert working: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("commit: {e}")))?;
        Ok(())
    }

    pub async fn load_working(&self) -> Result<Vec<MemoryBlock>, MemoryError> {
        let rows = sqlx::query("SELECT id, role, text, created_at FROM working ORDER BY pos")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("load working: {e}")))?;

        rows.iter()
            .map(|row| {
                let role: Option<String> = row.try_get("role").ok().flatten();
                let text: String = row
                    .try_get("text")
                    .map_err(|e| MemoryError::QueryFailed(format!("text column: {e}")))?;
                let mut block = MemoryBlock::new(MemoryTier::Working, text, 0.5);
                block.id = row
                    .try_get("id")
                    .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))?;
                block.role = role.as_deref().and_then(parse_role);
                block.created_at = parse_ts(row.try_get("created_at").ok());
                Ok(block)
            })
            .collect()
    }

    // --- Archival ---

    pub async fn insert_archival(&self, block: &MemoryBlock) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO archival \
             (id, text, importance, source, tags, created_at, accessed_at, access_count, last_decay, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&block.id)
        .bind(&block.text)
        .bind(block.priority)
        .bind(&block.source)
        .bind(serde_json::to_string(&block.tags).unwrap_or_else(|_| "[]".into()))
        .bind(block.created_at.to_rfc3339())
        .bind(block.accessed_at.to_rfc3339())
        .bind(block.access_count as i64)
        .bind(block.metadata.get("last_decay").and_then(|v| v.as_str()))
        .bind(block.embedding.as_ref().map(|v| encode_embedding(v)))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("insert archival: {e}")))?;
        Ok(())
    }

    pub async fn delete_archival(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM archival WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("delete archival: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn all_archival(&self) -> Result<Vec<MemoryBlock>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM archival ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("all archival: {e}")))?;
        rows.iter().map(row_to_archival).collect()
    }

    /// Ranked keyword search over the FTS5 index.
    pub async fn keyword_search_archival(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryBlock>, MemoryError> {
        let fts_query = fts_escape(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT archival.* FROM archival_fts \
             JOIN archival ON archival.iid = archival_fts.rowid \
             WHERE archival_fts MATCH ? ORDER BY rank LIMIT ?",
        )
        .bind(fts_query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("archival search: {e}")))?;
        rows.iter().map(row_to_archival).collect()
    }

    /// Record a read: bump access count and timestamp.
    pub async fn touch_archival(&self, id: &str) -> Result<(), MemoryError> {
        sqlx::query(
            "UPDATE archival SET accessed_at = ?, access_count = access_count + 1 WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("touch archival: {e}")))?;
        Ok(())
    }

    pub async fn archival_count(&self) -> Result<usize, MemoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM archival")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("archival count: {e}")))?;
        Ok(count as usize)
    }

    // --- Recall ---

    pub async fn insert_recall(&self, entry: &RecallEntry) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO recall (id, event_kind, description, ts, participants, emotions, context) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.event_kind)
        .bind(&entry.description)
        .bind(entry.ts.to_rfc3339())
        .bind(serde_json::to_string(&entry.participants).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&entry.emotions).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&entry.context).unwrap_or_else(|_| "{}".into()))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("insert recall: {e}")))?;
        Ok(())
    }

    /// Query recall entries by kind and/or time range, newest first.
    pub async fn query_recall(
        &self,
        event_kind: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RecallEntry>, MemoryError> {
        let mut sql = String::from("SELECT * FROM recall WHERE 1=1");
        if event_kind.is_some() {
            sql.push_str(" AND event_kind = ?");
        }
        if from.is_some() {
            sql.push_str(" AND ts >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND ts <= ?");
        }
        sql.push_str(" ORDER BY ts DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(kind) = event_kind {
            query = query.bind(kind.to_string());
        }
        if let Some(from) = from {
            query = query.bind(from.to_rfc3339());
        }
        if let Some(to) = to {
            query = query.bind(to.to_rfc3339());
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("query recall: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(RecallEntry {
                    id: row
                        .try_get("id")
                        .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))?,
                    event_kind: row
                        .try_get("event_kind")
                        .map_err(|e| MemoryError::QueryFailed(format!("event_kind: {e}")))?,
                    description: row
                        .try_get("description")
                        .map_err(|e| MemoryError::QueryFailed(format!("description: {e}")))?,
                    ts: parse_ts(row.try_get("ts").ok()),
                    participants: row
                        .try_get::<String, _>("participants")
                        .ok()
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_default(),
                    emotions: row
                        .try_get::<String, _>("emotions")
                        .ok()
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_default(),
                    context: row
                        .try_get::<String, _>("context")
                        .ok()
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn parse_role(raw: &str) -> Option<Role> {
    match raw {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

fn parse_ts(raw: Option<String>) -> DateTime<Utc> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Quote each term so user text cannot inject FTS5 syntax. Terms shorter
/// than three characters are dropped as noise.
fn fts_escape(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| term.len() > 2)
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_to_archival(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryBlock, MemoryError> {
    let text: String = row
        .try_get("text")
        .map_err(|e| MemoryError::QueryFailed(format!("text column: {e}")))?;
    let mut block = MemoryBlock::new(MemoryTier::Archival, text, 0.5);
    block.id = row
        .try_get("id")
        .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))?;
    block.priority = row.try_get("importance").unwrap_or(0.5);
    block.source = row.try_get("source").ok().flatten();
    block.tags = row
        .try_get::<String, _>("tags")
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    block.created_at = parse_ts(row.try_get("created_at").ok());
    block.accessed_at = parse_ts(row.try_get("accessed_at").ok());
    block.access_count = row.try_get::<i64, _>("access_count").unwrap_or(0) as u32;
    if let Ok(Some(last_decay)) = row.try_get::<Option<String>, _>("last_decay") {
        block
            .metadata
            .insert("last_decay".into(), serde_json::Value::String(last_decay));
    }
    block.embedding = row
        .try_get::<Option<Vec<u8>>, _>("embedding")
        .ok()
        .flatten()
        .map(|blob| decode_embedding(&blob));
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_mem::CoreSection;

    async fn store() -> (tempfile::TempDir, SqliteMemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMemoryStore::new(dir.path().join("memory.db").to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn core_round_trip() {
        let (_dir, store) = store().await;
        let mut core = CoreMemory::default();
        core.replace(&CoreSection::Persona, "Helper");
        core.append(&CoreSection::UserFacts, "Prefers Rust");

        store.save_core(&core).await.unwrap();
        let loaded = store.load_core().await.unwrap();
        assert_eq!(loaded.persona, "Helper");
        assert_eq!(loaded.user_facts, vec!["Prefers Rust"]);
    }

    #[tokio::test]
    async fn working_round_trip_preserves_order() {
        let (_dir, store) = store().await;
        let blocks = vec![
            MemoryBlock::working(Role::User, "first"),
            MemoryBlock::working(Role::Assistant, "second"),
        ];
        store.save_working(&blocks).await.unwrap();

        let loaded = store.load_working().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].text, "first");
        assert_eq!(loaded[1].role, Some(Role::Assistant));
    }

    #[tokio::test]
    async fn archival_keyword_search_ranks_matches() {
        let (_dir, store) = store().await;
        store
            .insert_archival(&MemoryBlock::archival("The user asked about leave policy", 0.3))
            .await
            .unwrap();
        store
            .insert_archival(&MemoryBlock::archival("Discussed database tuning", 0.3))
            .await
            .unwrap();

        let hits = store
            .keyword_search_archival("leave policy", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("leave policy"));
    }

    #[tokio::test]
    async fn fts_escape_strips_operators() {
        assert_eq!(fts_escape("leave AND policy\""), "\"leave\" OR \"AND\" OR \"policy\"");
        assert_eq!(fts_escape("a an"), "");
    }

    #[tokio::test]
    async fn archival_embedding_round_trip() {
        let (_dir, store) = store().await;
        let mut block = MemoryBlock::archival("embedded fact", 0.4);
        block.embedding = Some(vec![0.25, -0.5, 1.0]);
        store.insert_archival(&block).await.unwrap();

        let all = store.all_archival().await.unwrap();
        assert_eq!(all[0].embedding.as_deref(), Some(&[0.25, -0.5, 1.0][..]));
    }

    #[tokio::test]
    async fn recall_query_filters_by_kind_and_time() {
        let (_dir, store) = store().await;
        let entry = RecallEntry::new("task_completed", "answered leave question");
        store.insert_recall(&entry).await.unwrap();
        store
            .insert_recall(&RecallEntry::new("feedback_received", "user liked it"))
            .await
            .unwrap();

        let tasks = store
            .query_recall(Some("task_completed"), None, None, 10)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "answered leave question");

        let future = Utc::now() + chrono::Duration::hours(1);
        let none = store
            .query_recall(None, Some(future), None, 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn touch_bumps_access_count() {
        let (_dir, store) = store().await;
        let block = MemoryBlock::archival("fact", 0.3);
        store.insert_archival(&block).await.unwrap();
        store.touch_archival(&block.id).await.unwrap();
        store.touch_archival(&block.id).await.unwrap();

        let all = store.all_archival().await.unwrap();
        assert_eq!(all[0].access_count, 2);
    }
}
