//! File-context assembly for the system prompt.
//!
//! [`ContextBuilder::build`] gathers every file attached to a conversation,
//! extracts its text, labels each non-empty result with its filename, joins
//! the blocks with [`FILE_SEPARATOR`], and hard-cuts the result at a
//! character budget.
//!
//! Extraction results are cached per file id. Attached files are immutable,
//! so an entry only goes stale when the file is deleted, at which point the
//! caller drops it with [`ContextBuilder::forget`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::Result;
use crate::extract::{self, ExtractError};
use crate::models::AttachedFile;
use crate::store::ChatStore;

/// Default character budget for the file context.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

/// Placed between per-file blocks.
pub const FILE_SEPARATOR: &str = "\n\n---\n\n";

pub struct ContextBuilder {
    store: Arc<dyn ChatStore>,
    cache: RwLock<HashMap<i64, String>>,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Builds the file context for a conversation, at most `max_chars`
    /// characters long. Returns `""` when no file yields usable text.
    pub async fn build(&self, conversation_id: &str, max_chars: usize) -> Result<String> {
        let files = self.store.list_files(conversation_id).await?;

        let mut blocks = Vec::with_capacity(files.len());
        for file in &files {
            let text = self.file_text(file).await;
            let text = text.trim();
            if text.is_empty() {
                debug!(file_id = file.id, filename = %file.filename, "no usable text; skipping");
                continue;
            }
            blocks.push(format!("FILE: {}\n{}", file.filename, text));
        }

        Ok(truncate_chars(&blocks.join(FILE_SEPARATOR), max_chars).to_string())
    }

    /// Drops the cached text of a deleted file.
    pub fn forget(&self, file_id: i64) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&file_id);
    }

    pub fn cached_files(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Extracted text for one file; a failed extraction counts as empty.
    async fn file_text(&self, file: &AttachedFile) -> String {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&file.id)
            .cloned();
        if let Some(hit) = cached {
            return hit;
        }

        match extract_in_background(file.media_type.clone(), PathBuf::from(&file.stored_path))
            .await
        {
            Ok(text) => {
                self.cache
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(file.id, text.clone());
                text
            }
            Err(e) => {
                warn!(
                    file_id = file.id,
                    filename = %file.filename,
                    error = %e,
                    "extraction failed; treating file as empty"
                );
                String::new()
            }
        }
    }
}

/// Runs the blocking parse off the async executor.
async fn extract_in_background(
    media_type: String,
    path: PathBuf,
) -> std::result::Result<String, ExtractError> {
    tokio::task::spawn_blocking(move || extract::extract_file(&media_type, &path))
        .await
        .map_err(|e| ExtractError::Io(std::io::Error::other(e)))?
}

/// The first `max_chars` characters of `s` (Unicode scalar values).
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
