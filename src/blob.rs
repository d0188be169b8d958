//! Local blob storage for uploaded file bytes.
//!
//! Bytes live under `[storage].upload_dir` with a generated name built from
//! a random UUID and the original extension, so user-supplied filenames
//! never reach the filesystem.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::config::StorageConfig;

/// Directory-backed store for raw upload bytes.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.upload_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `bytes` under a fresh opaque name and returns its path.
    pub async fn save(&self, original_filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(stored_name(original_filename));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Removes a stored blob. Failures are logged and swallowed: metadata
    /// deletion must not depend on the blob still being there.
    pub async fn remove(&self, stored_path: &str) {
        if let Err(e) = tokio::fs::remove_file(stored_path).await {
            warn!(path = %stored_path, error = %e, "failed to remove stored blob");
        }
    }
}

/// `<uuid>.<ext>` with the extension lowercased, or just `<uuid>` when the
/// original name has none.
fn stored_name(original_filename: &str) -> String {
    let id = Uuid::new_v4();
    match file_extension(original_filename) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Lowercased extension of a client-supplied filename, if it is a plain
/// alphanumeric suffix.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stored_names_keep_only_the_extension() {
        let name = stored_name("Lecture 01 (final).PDF");
        assert!(name.ends_with(".pdf"));
        assert!(Uuid::parse_str(name.trim_end_matches(".pdf")).is_ok());

        let bare = stored_name("README");
        assert!(Uuid::parse_str(&bare).is_ok());
    }

    #[test]
    fn suspicious_extensions_are_dropped() {
        assert_eq!(file_extension("notes.tar.gz"), Some("gz".to_string()));
        assert_eq!(file_extension("evil.p/df"), None);
        assert_eq!(file_extension("slides.pptx"), Some("pptx".to_string()));
    }

    #[tokio::test]
    async fn save_then_remove() {
        let tmp = TempDir::new().unwrap();
        let blobs = BlobStore::new(tmp.path().join("uploads"));
        let path = blobs.save("deck.pptx", b"bytes").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");

        blobs.remove(path.to_str().unwrap()).await;
        assert!(!path.exists());

        // Removing again only logs.
        blobs.remove(path.to_str().unwrap()).await;
    }
}
