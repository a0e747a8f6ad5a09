//! Message and Conversation domain types.
//!
//! A conversation is an ordered sequence of messages plus named branches.
//! Branch `main` is implicit: `messages` is the main line, and forks live
//! in the `branches` map.

use crate::token::estimate_tokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID.
    pub id: String,

    /// Who sent this message.
    pub role: Role,

    /// The text content.
    pub content: String,

    /// Timestamp.
    pub ts: DateTime<Utc>,

    /// Estimated token cost of `content`.
    pub token_est: usize,

    /// Optional metadata (route, worker, degradation markers, …).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            token_est: estimate_tokens(&content),
            content,
            ts: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }
}

/// A conversation: an ordered message sequence with named branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID.
    pub id: ConversationId,

    /// Optional conversation-level system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Which branch is currently active. `main` is the implicit default.
    pub branch_name: String,

    /// Messages on the main branch, in order.
    pub messages: Vec<Message>,

    /// Named forks; each holds its full message sequence.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<String, Vec<Message>>,

    /// When this conversation was created.
    pub created_at: DateTime<Utc>,

    /// When the last message was added. Monotonic per write.
    pub updated_at: DateTime<Utc>,
}

/// Name of the implicit default branch.
pub const MAIN_BRANCH: &str = "main";

impl Conversation {
    /// Create a new empty conversation on `main`.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            system_prompt: None,
            branch_name: MAIN_BRANCH.to_string(),
            messages: Vec::new(),
            branches: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The messages of the currently active branch.
    pub fn active_messages(&self) -> &[Message] {
        if self.branch_name == MAIN_BRANCH {
            &self.messages
        } else {
            self.branches
                .get(&self.branch_name)
                .map(Vec::as_slice)
                .unwrap_or(&self.messages)
        }
    }

    /// Append a message to the active branch. `updated_at` is monotonic.
    pub fn push(&mut self, message: Message) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
        if self.branch_name == MAIN_BRANCH {
            self.messages.push(message);
        } else {
            self.branches
                .entry(self.branch_name.clone())
                .or_default()
                .push(message);
        }
    }

    /// Total estimated tokens on the active branch.
    pub fn estimated_tokens(&self) -> usize {
        self.active_messages().iter().map(|m| m.token_est).sum()
    }

    /// Find a message by ID on any branch.
    pub fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .chain(self.branches.values().flatten())
            .find(|m| m.id == message_id)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello there");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello there");
        assert!(msg.token_est > 0);
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;
        conv.push(Message::user("First message"));
        assert_eq!(conv.messages.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn push_targets_active_branch() {
        let mut conv = Conversation::new();
        conv.push(Message::user("on main"));
        conv.branches.insert("alt".into(), conv.messages.clone());
        conv.branch_name = "alt".into();
        conv.push(Message::user("on alt"));

        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.branches["alt"].len(), 2);
        assert_eq!(conv.active_messages().len(), 2);
    }

    #[test]
    fn find_message_searches_branches() {
        let mut conv = Conversation::new();
        conv.push(Message::user("main msg"));
        let branched = Message::user("branch msg");
        let branched_id = branched.id.clone();
        conv.branches.insert("alt".into(), vec![branched]);

        assert!(conv.find_message(&branched_id).is_some());
        assert!(conv.find_message("nope").is_none());
    }

    #[test]
    fn serialization_roundtrip() {
        let mut conv = Conversation::new();
        conv.push(Message::user("Test message"));
        let json = serde_json::to_string(&conv).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.messages[0].content, "Test message");
        assert_eq!(back.branch_name, MAIN_BRANCH);
    }
}
