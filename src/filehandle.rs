//! Read-only file content, materialized once at `open`.
//!
//! File sizes here are blob sizes, generally modest; reading eagerly
//! keeps `read` a plain slice copy and avoids holding live object-store
//! handles across concurrent reads. Callers streaming very large blobs
//! should batch `read` calls rather than mapping the file.

use crate::error::FsError;
use crate::node::Node;
use crate::repo::Repository;

/// Per-`open` state: the full content to serve until `release`.
#[derive(Debug)]
pub struct FileBuffer {
    data: Vec<u8>,
}

impl FileBuffer {
    /// Materializes content for a data node: raw blob bytes, or the hex
    /// id of a commit's first parent (no trailing newline).
    pub fn open(repo: &Repository, node: &Node) -> Result<Self, FsError> {
        match node {
            Node::Parent { parent, .. } => Ok(FileBuffer {
                data: parent.to_string().into_bytes(),
            }),
            Node::Blob { oid, .. } => Ok(FileBuffer {
                data: repo.blob_bytes(*oid)?,
            }),
            _ => Err(FsError::IsDir),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The slice visible through a `read(size, offset)` call; empty at
    /// or past EOF.
    pub fn read_at(&self, offset: u64, size: usize) -> &[u8] {
        if offset >= self.len() {
            return &[];
        }
        let start = offset as usize;
        let end = start.saturating_add(size).min(self.data.len());
        &self.data[start..end]
    }
}
