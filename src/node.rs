//! Node resolution: from a parsed [`PathSpec`] to a live view of the
//! object store.
//!
//! Nodes are recomputed for every inbound operation. The store is a
//! content-addressed key-value store and its lookups are cheap; a cache
//! would need invalidation nothing else here provides.

use std::time::SystemTime;

use gix::ObjectId;

use crate::error::FsError;
use crate::path::{PathSpec, OID_HEX_LEN};
use crate::repo::{Repository, TreeHit};

/// A resolved filesystem object, valid for the duration of one call.
#[derive(Debug, Clone)]
pub enum Node {
    /// `/`
    Root { mtime: SystemTime },
    /// `/commits`
    CommitList { mtime: SystemTime },
    /// `/blobs`
    BlobList { mtime: SystemTime },
    /// `/commits/<oid>` — a commit directory.
    Commit {
        oid: ObjectId,
        tree: ObjectId,
        has_parent: bool,
        mtime: SystemTime,
    },
    /// A browsable tree: `/commits/<oid>/tree` or a subtree below it.
    Tree { tree: ObjectId, mtime: SystemTime },
    /// The synthetic `parent` file: 40 hex bytes, no newline.
    Parent {
        parent: ObjectId,
        mtime: SystemTime,
    },
    /// A blob-backed regular file.
    Blob {
        oid: ObjectId,
        size: u64,
        mtime: SystemTime,
    },
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            Node::Root { .. }
                | Node::CommitList { .. }
                | Node::BlobList { .. }
                | Node::Commit { .. }
                | Node::Tree { .. }
        )
    }

    pub fn mtime(&self) -> SystemTime {
        match self {
            Node::Root { mtime }
            | Node::CommitList { mtime }
            | Node::BlobList { mtime }
            | Node::Commit { mtime, .. }
            | Node::Tree { mtime, .. }
            | Node::Parent { mtime, .. }
            | Node::Blob { mtime, .. } => *mtime,
        }
    }

    /// Byte length, for data nodes only.
    pub fn size(&self) -> Option<u64> {
        match self {
            Node::Parent { .. } => Some(OID_HEX_LEN as u64),
            Node::Blob { size, .. } => Some(*size),
            _ => None,
        }
    }
}

/// Materializes the node a path classifies as, or `NoEntry`.
pub fn resolve(
    repo: &Repository,
    start_time: SystemTime,
    spec: &PathSpec,
) -> Result<Node, FsError> {
    match spec {
        PathSpec::Root => Ok(Node::Root { mtime: start_time }),
        PathSpec::CommitList => Ok(Node::CommitList { mtime: start_time }),
        PathSpec::BlobList => Ok(Node::BlobList { mtime: start_time }),
        PathSpec::Commit { oid } => {
            let info = repo.commit_info(*oid, start_time)?;
            Ok(Node::Commit {
                oid: info.id,
                tree: info.tree,
                has_parent: info.first_parent.is_some(),
                mtime: info.time,
            })
        }
        PathSpec::CommitTree { oid } => {
            let info = repo.commit_info(*oid, start_time)?;
            Ok(Node::Tree {
                tree: info.tree,
                mtime: info.time,
            })
        }
        PathSpec::CommitParent { oid } => {
            let info = repo.commit_info(*oid, start_time)?;
            let parent = info.first_parent.ok_or(FsError::NoEntry)?;
            Ok(Node::Parent {
                parent,
                mtime: info.time,
            })
        }
        PathSpec::TreePath { oid, path } => {
            let info = repo.commit_info(*oid, start_time)?;
            match repo.tree_hit(info.tree, path)? {
                TreeHit::Subtree(tree) => Ok(Node::Tree {
                    tree,
                    mtime: info.time,
                }),
                TreeHit::Blob { oid, size } => Ok(Node::Blob {
                    oid,
                    size,
                    mtime: info.time,
                }),
            }
        }
        PathSpec::Blob { oid } => {
            let size = repo.blob_size(*oid)?;
            Ok(Node::Blob {
                oid: *oid,
                size,
                mtime: start_time,
            })
        }
    }
}
