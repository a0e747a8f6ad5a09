//! The single-writer memory actor.
//!
//! All tier mutations are funneled through one task that owns the core and
//! working tiers plus the persistence handles; callers talk to it through
//! a bounded command channel and get snapshots back. This is the one place
//! in the process where shared mutable memory state is allowed.

use chrono::{DateTime, Utc};
use hearthmind_core::error::MemoryError;
use hearthmind_core::gateway::Gateway;
use hearthmind_core::memory::{MemoryBlock, RecallEntry};
use hearthmind_core::message::Role;
use hearthmind_core::token::estimate_tokens;
use hearthmind_config::MemoryConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::archival::{ArchivalMemory, ConsolidationReport, EVICTION_IMPORTANCE};
use crate::core_mem::{CoreMemory, CoreSection};
use crate::store::SqliteMemoryStore;
use crate::working::WorkingMemory;

const COMMAND_QUEUE: usize = 64;

enum Command {
    AddMessage {
        role: Role,
        text: String,
        reply: oneshot::Sender<Result<usize, MemoryError>>,
    },
    CoreAppend {
        section: CoreSection,
        content: String,
        reply: oneshot::Sender<Result<(), MemoryError>>,
    },
    CoreReplace {
        section: CoreSection,
        content: String,
        reply: oneshot::Sender<Result<(), MemoryError>>,
    },
    CoreGet {
        section: CoreSection,
        reply: oneshot::Sender<Result<String, MemoryError>>,
    },
    BuildContext {
        archival_query: Option<String>,
        archival_k: usize,
        reply: oneshot::Sender<Result<String, MemoryError>>,
    },
    ArchivalInsert {
        block: Box<MemoryBlock>,
        reply: oneshot::Sender<Result<(), MemoryError>>,
    },
    ArchivalSearch {
        query: String,
        k: usize,
        reply: oneshot::Sender<Result<Vec<(MemoryBlock, f64)>, MemoryError>>,
    },
    ArchivalCount {
        reply: oneshot::Sender<Result<usize, MemoryError>>,
    },
    Consolidate {
        reply: oneshot::Sender<Result<ConsolidationReport, MemoryError>>,
    },
    RecallLog {
        entry: Box<RecallEntry>,
        reply: oneshot::Sender<Result<(), MemoryError>>,
    },
    RecallQuery {
        event_kind: Option<String>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<RecallEntry>, MemoryError>>,
    },
    WorkingSnapshot {
        reply: oneshot::Sender<Vec<MemoryBlock>>,
    },
}

/// Clonable client for the memory actor.
#[derive(Clone)]
pub struct MemoryHandle {
    tx: mpsc::Sender<Command>,
}

/// Spawn the memory actor, restoring persisted state.
pub async fn spawn(
    config: MemoryConfig,
    store: Arc<SqliteMemoryStore>,
    gateway: Arc<dyn Gateway>,
) -> Result<MemoryHandle, MemoryError> {
    let core = store.load_core().await?;
    let mut working = WorkingMemory::new(config.max_msgs, config.max_tokens);
    working.restore(store.load_working().await?);

    let archival = ArchivalMemory::new(store.clone(), gateway);
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);

    tokio::spawn(run(
        config, core, working, archival, store, rx,
    ));
    Ok(MemoryHandle { tx })
}

async fn run(
    config: MemoryConfig,
    mut core: CoreMemory,
    mut working: WorkingMemory,
    archival: ArchivalMemory,
    store: Arc<SqliteMemoryStore>,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::AddMessage { role, text, reply } => {
                let result = add_message(&mut working, &archival, &store, role, &text).await;
                let _ = reply.send(result);
            }
            Command::CoreAppend {
                section,
                content,
                reply,
            } => {
                core.append(&section, &content);
                let _ = reply.send(store.save_core(&core).await);
            }
            Command::CoreReplace {
                section,
                content,
                reply,
            } => {
                core.replace(&section, &content);
                let _ = reply.send(store.save_core(&core).await);
            }
            Command::CoreGet { section, reply } => {
                let _ = reply.send(core.get(&section));
            }
            Command::BuildContext {
                archival_query,
                archival_k,
                reply,
            } => {
                let result =
                    build_context(&config, &core, &working, &archival, archival_query, archival_k)
                        .await;
                let _ = reply.send(result);
            }
            Command::ArchivalInsert { block, reply } => {
                let _ = reply.send(archival.insert(&block).await);
            }
            Command::ArchivalSearch { query, k, reply } => {
                let _ = reply.send(archival.search(&query, k).await);
            }
            Command::ArchivalCount { reply } => {
                let _ = reply.send(archival.count().await);
            }
            Command::Consolidate { reply } => {
                let _ = reply.send(archival.consolidate().await);
            }
            Command::RecallLog { entry, reply } => {
                let _ = reply.send(store.insert_recall(&entry).await);
            }
            Command::RecallQuery {
                event_kind,
                from,
                to,
                limit,
                reply,
            } => {
                let _ = reply.send(
                    store
                        .query_recall(event_kind.as_deref(), from, to, limit)
                        .await,
                );
            }
            Command::WorkingSnapshot { reply } => {
                let _ = reply.send(working.blocks().cloned().collect());
            }
        }
    }
    debug!("memory actor stopped");
}

/// Evictions are archived strictly before the new message is current: the
/// archival inserts land (and are persisted) before the working window is
/// saved with the new message in place.
async fn add_message(
    working: &mut WorkingMemory,
    archival: &ArchivalMemory,
    store: &SqliteMemoryStore,
    role: Role,
    text: &str,
) -> Result<usize, MemoryError> {
    let evicted = working.push(MemoryBlock::working(role, text));
    let count = evicted.len();

    for old in evicted {
        let mut block = MemoryBlock::archival(
            format!(
                "{}: {}",
                old.role.map(|r| r.to_string()).unwrap_or_default(),
                old.text
            ),
            EVICTION_IMPORTANCE,
        )
        .with_source("conversation");
        block.created_at = old.created_at;
        archival.insert(&block).await?;
    }

    store
        .save_working(&working.blocks().cloned().collect::<Vec<_>>())
        .await?;
    Ok(count)
}

/// Core first, then relevant archival memories, then the working window.
/// The assembled string never exceeds `max_context_tokens`.
async fn build_context(
    config: &MemoryConfig,
    core: &CoreMemory,
    working: &WorkingMemory,
    archival: &ArchivalMemory,
    archival_query: Option<String>,
    archival_k: usize,
) -> Result<String, MemoryError> {
    let mut out = core.render();
    let budget = config.max_context_tokens;
    let core_tokens = estimate_tokens(&out);
    let mut remaining = budget.saturating_sub(core_tokens);

    if let Some(query) = archival_query
        && archival_k > 0
        && remaining > 0
    {
        match archival.search(&query, archival_k).await {
            Ok(hits) if !hits.is_empty() => {
                let mut section = String::from("## RELEVANT MEMORIES\n");
                for (block, _) in hits {
                    let line = format!("- {}\n", block.text);
                    if estimate_tokens(&section) + estimate_tokens(&line) > remaining {
                        break;
                    }
                    section.push_str(&line);
                }
                let section_tokens = estimate_tokens(&section);
                if section_tokens <= remaining {
                    remaining -= section_tokens;
                    out.push_str(&section);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("archival search failed during context assembly: {e}"),
        }
    }

    if !working.is_empty() && remaining > 0 {
        let rendered = working.render(remaining.saturating_sub(4));
        if estimate_tokens(&rendered) <= remaining {
            out.push_str(&rendered);
        }
    }

    Ok(out)
}

impl MemoryHandle {
    async fn send<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, MemoryError>>) -> Command,
    ) -> Result<T, MemoryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| MemoryError::ActorClosed)?;
        rx.await.map_err(|_| MemoryError::ActorClosed)?
    }

    /// Append a message to the working tier. Returns how many blocks were
    /// evicted to archival.
    pub async fn add_message(&self, role: Role, text: &str) -> Result<usize, MemoryError> {
        let text = text.to_string();
        self.send(|reply| Command::AddMessage { role, text, reply })
            .await
    }

    /// Append to a core section.
    pub async fn core_append(
        &self,
        section: CoreSection,
        content: &str,
    ) -> Result<(), MemoryError> {
        let content = content.to_string();
        self.send(|reply| Command::CoreAppend {
            section,
            content,
            reply,
        })
        .await
    }

    /// Replace a core section.
    pub async fn core_replace(
        &self,
        section: CoreSection,
        content: &str,
    ) -> Result<(), MemoryError> {
        let content = content.to_string();
        self.send(|reply| Command::CoreReplace {
            section,
            content,
            reply,
        })
        .await
    }

    /// Read a core section.
    pub async fn core_get(&self, section: CoreSection) -> Result<String, MemoryError> {
        self.send(|reply| Command::CoreGet { section, reply }).await
    }

    /// Assemble context: core, relevant archival, working.
    pub async fn build_context(
        &self,
        archival_query: Option<&str>,
        archival_k: usize,
    ) -> Result<String, MemoryError> {
        let archival_query = archival_query.map(String::from);
        self.send(|reply| Command::BuildContext {
            archival_query,
            archival_k,
            reply,
        })
        .await
    }

    /// Insert an archival block directly.
    pub async fn archival_insert(&self, block: MemoryBlock) -> Result<(), MemoryError> {
        self.send(|reply| Command::ArchivalInsert {
            block: Box::new(block),
            reply,
        })
        .await
    }

    /// Search the archival tier.
    pub async fn archival_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(MemoryBlock, f64)>, MemoryError> {
        let query = query.to_string();
        self.send(|reply| Command::ArchivalSearch { query, k, reply })
            .await
    }

    /// Number of archival entries.
    pub async fn archival_count(&self) -> Result<usize, MemoryError> {
        self.send(|reply| Command::ArchivalCount { reply }).await
    }

    /// Run one consolidation pass.
    pub async fn consolidate(&self) -> Result<ConsolidationReport, MemoryError> {
        self.send(|reply| Command::Consolidate { reply }).await
    }

    /// Record an episodic recall entry.
    pub async fn recall_log(&self, entry: RecallEntry) -> Result<(), MemoryError> {
        self.send(|reply| Command::RecallLog {
            entry: Box::new(entry),
            reply,
        })
        .await
    }

    /// Query the recall journal.
    pub async fn recall_query(
        &self,
        event_kind: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RecallEntry>, MemoryError> {
        let event_kind = event_kind.map(String::from);
        self.send(|reply| Command::RecallQuery {
            event_kind,
            from,
            to,
            limit,
            reply,
        })
        .await
    }

    /// Snapshot of the working window.
    pub async fn working_snapshot(&self) -> Result<Vec<MemoryBlock>, MemoryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::WorkingSnapshot { reply })
            .await
            .map_err(|_| MemoryError::ActorClosed)?;
        rx.await.map_err(|_| MemoryError::ActorClosed)
    }
}
