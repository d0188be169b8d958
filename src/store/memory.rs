//! In-memory [`ChatStore`] implementation for tests and library users.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Ids come from
//! monotonically increasing counters, matching SQLite AUTOINCREMENT, and
//! the same parent checks SQLite's foreign keys would perform are applied
//! by hand.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::models::{AttachedFile, Conversation, Message, NewFile, Role, User};

use super::{normalize_title, ChatStore};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
    files: Vec<AttachedFile>,
    next_message_id: i64,
    next_file_id: i64,
}

/// In-memory store for tests and library users.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a message and bumps the conversation's `updated_at`.
    fn push_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<Message> {
        let mut t = self.write();
        let now = Utc::now().timestamp();
        match t.conversations.get_mut(conversation_id) {
            Some(c) => c.updated_at = now,
            None => return Err(conversation_missing(conversation_id)),
        }
        t.next_message_id += 1;
        let msg = Message {
            id: t.next_message_id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        };
        t.messages.push(msg.clone());
        Ok(msg)
    }
}

fn conversation_missing(id: &str) -> ChatError {
    ChatError::not_found(format!("conversation not found: {}", id))
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn create_user(&self, id: &str, display_name: Option<&str>) -> Result<User> {
        let mut t = self.write();
        if t.users.contains_key(id) {
            return Err(ChatError::invalid(format!("user already exists: {}", id)));
        }
        let user = User {
            id: id.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: Utc::now().timestamp(),
        };
        t.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let mut t = self.write();
        if !t.users.contains_key(user_id) {
            return Err(ChatError::ReferentialViolation(format!(
                "user_id does not exist: {}",
                user_id
            )));
        }
        let now = Utc::now().timestamp();
        let convo = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: normalize_title(title),
            created_at: now,
            updated_at: now,
        };
        t.conversations.insert(convo.id.clone(), convo.clone());
        Ok(convo)
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let t = self.read();
        let mut out: Vec<Conversation> = t
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.read().conversations.get(id).cloned())
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Option<Conversation>> {
        let mut t = self.write();
        Ok(t.conversations.get_mut(id).map(|c| {
            c.title = Some(title.to_string());
            c.updated_at = Utc::now().timestamp();
            c.clone()
        }))
    }

    async fn delete_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let mut t = self.write();
        let removed = t.conversations.remove(id);
        if removed.is_some() {
            t.messages.retain(|m| m.conversation_id != id);
            t.files.retain(|f| f.conversation_id != id);
        }
        Ok(removed)
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        self.push_message(conversation_id, role, content)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        before_id: Option<i64>,
    ) -> Result<Vec<Message>> {
        let t = self.read();
        let limit = usize::try_from(limit).unwrap_or(0);
        // `messages` is append-only, so it is already in ascending id order.
        let mut newest_first: Vec<Message> = t
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before_id.map_or(true, |b| m.id < b))
            .take(limit)
            .cloned()
            .collect();
        newest_first.reverse();
        Ok(newest_first)
    }

    async fn append_reply(&self, conversation_id: &str, content: &str) -> Result<Message> {
        self.push_message(conversation_id, Role::Assistant, content)
    }

    async fn insert_file(&self, file: NewFile) -> Result<AttachedFile> {
        let mut t = self.write();
        if !t.conversations.contains_key(&file.conversation_id) {
            return Err(conversation_missing(&file.conversation_id));
        }
        t.next_file_id += 1;
        let stored = AttachedFile {
            id: t.next_file_id,
            conversation_id: file.conversation_id,
            filename: file.filename,
            media_type: file.media_type,
            size_bytes: file.size_bytes,
            stored_path: file.stored_path,
            created_at: Utc::now().timestamp(),
        };
        t.files.push(stored.clone());
        Ok(stored)
    }

    async fn list_files(&self, conversation_id: &str) -> Result<Vec<AttachedFile>> {
        Ok(self
            .read()
            .files
            .iter()
            .filter(|f| f.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn delete_file(
        &self,
        conversation_id: &str,
        file_id: i64,
    ) -> Result<Option<AttachedFile>> {
        let mut t = self.write();
        let pos = t
            .files
            .iter()
            .position(|f| f.id == file_id && f.conversation_id == conversation_id);
        Ok(pos.map(|i| t.files.remove(i)))
    }
}
