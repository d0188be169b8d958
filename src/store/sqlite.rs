//! SQLite-backed [`ChatStore`] implementation.
//!
//! Maps each [`ChatStore`] operation to runtime-checked `sqlx::query`
//! statements against the schema created by [`crate::migrate`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{is_foreign_key_violation, ChatError, Result};
use crate::models::{AttachedFile, Conversation, Message, NewFile, Role, User};

use super::{normalize_title, ChatStore};

/// SQLite implementation of the [`ChatStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a message and bumps the conversation's `updated_at` in one
    /// transaction.
    async fn insert_and_touch(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO messages (conversation_id, role, content, created_at) \
             VALUES (?, ?, ?, ?) RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(conversation_fk(conversation_id))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        message_from_row(&row)
    }
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: role.parse().map_err(ChatError::Persistence)?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

fn file_from_row(row: &SqliteRow) -> AttachedFile {
    AttachedFile {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        filename: row.get("filename"),
        media_type: row.get("media_type"),
        size_bytes: row.get("size_bytes"),
        stored_path: row.get("stored_path"),
        created_at: row.get("created_at"),
    }
}

/// Maps a foreign-key failure on a conversation-scoped insert to NotFound.
fn conversation_fk(conversation_id: &str) -> impl FnOnce(sqlx::Error) -> ChatError + '_ {
    move |e| {
        if is_foreign_key_violation(&e) {
            ChatError::not_found(format!("conversation not found: {}", conversation_id))
        } else {
            e.into()
        }
    }
}

const CONVERSATION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, created_at";
const FILE_COLUMNS: &str =
    "id, conversation_id, filename, media_type, size_bytes, stored_path, created_at";

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_user(&self, id: &str, display_name: Option<&str>) -> Result<User> {
        let now = Utc::now().timestamp();
        let inserted = sqlx::query(
            "INSERT INTO users (id, display_name, created_at) VALUES (?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(display_name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(ChatError::invalid(format!("user already exists: {}", id)));
        }

        Ok(User {
            id: id.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: now,
        })
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(&format!(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {}",
            CONVERSATION_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(normalize_title(title))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ChatError::ReferentialViolation(format!("user_id does not exist: {}", user_id))
            } else {
                e.into()
            }
        })?;

        Ok(conversation_from_row(&row))
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM conversations WHERE user_id = ? \
             ORDER BY updated_at DESC, created_at DESC",
            CONVERSATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(conversation_from_row).collect())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM conversations WHERE id = ?",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? RETURNING {}",
            CONVERSATION_COLUMNS
        ))
        .bind(title)
        .bind(Utc::now().timestamp())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn delete_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "DELETE FROM conversations WHERE id = ? RETURNING {}",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        self.insert_and_touch(conversation_id, role, content).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        before_id: Option<i64>,
    ) -> Result<Vec<Message>> {
        let rows = match before_id {
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM messages WHERE conversation_id = ? \
                     ORDER BY id DESC LIMIT ?",
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Some(before) => {
                sqlx::query(&format!(
                    "SELECT {} FROM messages WHERE conversation_id = ? AND id < ? \
                     ORDER BY id DESC LIMIT ?",
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        // Newest-first from SQL, ascending for callers.
        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn append_reply(&self, conversation_id: &str, content: &str) -> Result<Message> {
        self.insert_and_touch(conversation_id, Role::Assistant, content)
            .await
    }

    async fn insert_file(&self, file: NewFile) -> Result<AttachedFile> {
        let row = sqlx::query(&format!(
            "INSERT INTO files (conversation_id, filename, media_type, size_bytes, stored_path, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {}",
            FILE_COLUMNS
        ))
        .bind(&file.conversation_id)
        .bind(&file.filename)
        .bind(&file.media_type)
        .bind(file.size_bytes)
        .bind(&file.stored_path)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(conversation_fk(&file.conversation_id))?;

        Ok(file_from_row(&row))
    }

    async fn list_files(&self, conversation_id: &str) -> Result<Vec<AttachedFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE conversation_id = ? ORDER BY id ASC",
            FILE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(file_from_row).collect())
    }

    async fn delete_file(
        &self,
        conversation_id: &str,
        file_id: i64,
    ) -> Result<Option<AttachedFile>> {
        let row = sqlx::query(&format!(
            "DELETE FROM files WHERE id = ? AND conversation_id = ? RETURNING {}",
            FILE_COLUMNS
        ))
        .bind(file_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(file_from_row))
    }
}
