//! Storage abstraction for conversations, messages, and file metadata.
//!
//! The [`ChatStore`] trait is the narrow data-access interface the chat
//! pipeline talks to. [`SqliteStore`] is the production backend;
//! [`InMemoryStore`] enforces the same referential rules without a
//! database and backs the pipeline tests.
//!
//! Implementations must be `Send + Sync` so a single handle can be shared
//! by every request.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AttachedFile, Conversation, Message, NewFile, Role, User};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend for the chat pipeline.
///
/// Missing rows are reported as `Ok(None)` by lookups; inserts that
/// reference a missing parent fail with [`ChatError::NotFound`] or, for
/// conversation owners, [`ChatError::ReferentialViolation`].
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_user`](ChatStore::create_user) | Register an owner account |
/// | [`create_conversation`](ChatStore::create_conversation) | Start a thread for a user |
/// | [`list_conversations`](ChatStore::list_conversations) | Threads of a user, most recently updated first |
/// | [`get_conversation`](ChatStore::get_conversation) | One thread by id |
/// | [`rename_conversation`](ChatStore::rename_conversation) | Retitle a thread |
/// | [`delete_conversation`](ChatStore::delete_conversation) | Remove a thread and everything under it |
/// | [`insert_message`](ChatStore::insert_message) | Append one message, bumping `updated_at` |
/// | [`list_messages`](ChatStore::list_messages) | Cursor-paginated history, ascending |
/// | [`append_reply`](ChatStore::append_reply) | Assistant message + `updated_at` bump, atomically |
/// | [`insert_file`](ChatStore::insert_file) | Record an uploaded file |
/// | [`list_files`](ChatStore::list_files) | Attached files in attachment order |
/// | [`delete_file`](ChatStore::delete_file) | Detach one file from its thread |
///
/// [`ChatError::NotFound`]: crate::error::ChatError::NotFound
/// [`ChatError::ReferentialViolation`]: crate::error::ChatError::ReferentialViolation
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_user(&self, id: &str, display_name: Option<&str>) -> Result<User>;

    async fn create_conversation(&self, user_id: &str, title: Option<&str>)
        -> Result<Conversation>;

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Sets the title and bumps `updated_at`.
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Option<Conversation>>;

    /// Deletes the conversation with its messages and file rows, returning
    /// the deleted row.
    async fn delete_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Appends a message and bumps the conversation's `updated_at`.
    async fn insert_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message>;

    /// Returns the newest `limit` messages (with `id < before_id` when
    /// given), in ascending id order.
    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        before_id: Option<i64>,
    ) -> Result<Vec<Message>>;

    /// Inserts an assistant message and bumps the conversation's
    /// `updated_at` in one unit of work.
    async fn append_reply(&self, conversation_id: &str, content: &str) -> Result<Message>;

    async fn insert_file(&self, file: NewFile) -> Result<AttachedFile>;

    /// Files attached to a conversation, first attached first.
    async fn list_files(&self, conversation_id: &str) -> Result<Vec<AttachedFile>>;

    async fn delete_file(&self, conversation_id: &str, file_id: i64)
        -> Result<Option<AttachedFile>>;
}

/// Title normalization shared by both backends: trimmed, blank → `None`.
pub(crate) fn normalize_title(title: Option<&str>) -> Option<String> {
    title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
