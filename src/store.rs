//! Object storage for raw uploads and normalized text.
//!
//! Every ingested document leaves two objects behind: the original bytes at
//! `raw/{owner}/{doc_id}/{filename}` and the normalized text at
//! `clean/{owner}/{doc_id}/content.md`. The trait keeps the pipeline
//! independent of where those objects live; the default backend writes to a
//! local directory tree.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("failed to write object {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Write-only object store. Puts overwrite silently.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;
}

/// Key for a document's original bytes.
pub fn raw_key(owner: &str, doc_id: &str, filename: &str) -> String {
    format!("raw/{}/{}/{}", owner, doc_id, filename)
}

/// Key for a document's normalized text.
pub fn clean_key(owner: &str, doc_id: &str) -> String {
    format!("clean/{}/{}/content.md", owner, doc_id)
}

/// Filesystem-backed store rooted at a configured directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        // Keys are server-constructed, but owner/filename segments come from
        // callers; reject traversal outright.
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(Path::new(key)))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        let wrap = |source| StorageError::Write {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(wrap)?;
        Ok(())
    }
}
