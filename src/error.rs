//! Error taxonomy for the chat pipeline.
//!
//! Every store operation and every step of a message send returns
//! [`ChatError`]. Client-side variants carry a message safe to show the
//! caller; server-side variants carry diagnostic detail that the HTTP layer
//! logs and replaces with a generic message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A required field was missing or blank after trimming.
    #[error("{0}")]
    InvalidInput(String),

    /// The referenced conversation, file, or user does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A row referenced a parent that does not exist (e.g. unknown owner).
    #[error("{0}")]
    ReferentialViolation(String),

    /// The inference endpoint failed or returned no usable text.
    #[error("model call failed: {0}")]
    UpstreamModel(String),

    /// The store or the blob directory failed.
    #[error("storage failure: {0}")]
    Persistence(String),
}

impl ChatError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ChatError::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ChatError::NotFound(message.into())
    }

    /// True for failures the caller caused and should not retry as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidInput(_) | ChatError::NotFound(_) | ChatError::ReferentialViolation(_)
        )
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Persistence(e.to_string())
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

/// Returns true when a sqlx error is a SQLite foreign-key violation.
pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation)
        }
        _ => false,
    }
}
