//! Core data models used throughout Jorge.
//!
//! These types represent the users, conversations, messages, and attached
//! files that flow between the store, the prompt pipeline, and the HTTP
//! surface. Timestamps are unix seconds; [`format_ts_iso`] renders them for
//! the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered account that owns conversations.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub created_at: i64,
}

/// A titled, user-owned thread of messages and attached files.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A persisted message. Immutable once created.
///
/// `id` is strictly increasing within the store, so it doubles as the
/// chronological sort key and the pagination cursor.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// Metadata for an uploaded file attached to a conversation.
#[derive(Debug, Clone)]
pub struct AttachedFile {
    pub id: i64,
    pub conversation_id: String,
    pub filename: String,
    pub media_type: String,
    pub size_bytes: i64,
    /// Where the blob store put the bytes.
    pub stored_path: String,
    pub created_at: i64,
}

/// File metadata prior to insertion.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub conversation_id: String,
    pub filename: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub stored_path: String,
}

/// One `{role, content}` pair of a transcript sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatTurn {
    fn from(m: &Message) -> Self {
        Self::new(m.role, m.content.clone())
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
