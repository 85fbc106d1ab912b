//! Repository access helpers.
//!
//! These abstractions wrap `gix` primitives so the filesystem code can
//! remain largely agnostic of the underlying git library. One
//! thread-safe handle is opened at startup; every operation and every
//! directory producer materializes its own thread-local view.

use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use gix::bstr::BStr;
use gix::object::tree::EntryKind;
use gix::object::Kind;
use gix::{ObjectId, ThreadSafeRepository};

use crate::error::FsError;

/// Minimal repository wrapper that keeps a thread-safe handle.
#[derive(Debug)]
pub struct Repository {
    inner: ThreadSafeRepository,
}

/// Everything the filesystem wants to know about one commit.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub time: SystemTime,
    pub first_parent: Option<ObjectId>,
}

/// Outcome of resolving a path inside a tree.
#[derive(Debug, Clone)]
pub enum TreeHit {
    Subtree(ObjectId),
    Blob { oid: ObjectId, size: u64 },
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = ThreadSafeRepository::open(path)
            .with_context(|| format!("failed to open repository at {}", path.display()))?;
        Ok(Self { inner: repo })
    }

    pub fn thread_local(&self) -> gix::Repository {
        self.inner.to_thread_local()
    }

    /// Looks up a commit and gathers timestamp, root tree, and first
    /// parent. A missing or non-commit object is `NoEntry`.
    ///
    /// `default_time` stands in when the committer signature is
    /// unreadable.
    pub fn commit_info(
        &self,
        oid: ObjectId,
        default_time: SystemTime,
    ) -> Result<CommitInfo, FsError> {
        let repo = self.thread_local();
        let commit = repo.find_commit(oid).map_err(|_| FsError::NoEntry)?;
        let tree = commit.tree_id().map_err(|_| FsError::NoEntry)?.detach();
        let time = commit_time_to_system(&commit, default_time);
        let first_parent = commit.parent_ids().next().map(|id| id.detach());
        Ok(CommitInfo {
            id: oid,
            tree,
            time,
            first_parent,
        })
    }

    /// Byte length of a blob, from the header-only lookup.
    pub fn blob_size(&self, oid: ObjectId) -> Result<u64, FsError> {
        let repo = self.thread_local();
        let header = repo.find_header(oid).map_err(|_| FsError::NoEntry)?;
        if header.kind() != Kind::Blob {
            return Err(FsError::NoEntry);
        }
        Ok(header.size())
    }

    /// Full raw content of a blob.
    pub fn blob_bytes(&self, oid: ObjectId) -> Result<Vec<u8>, FsError> {
        let repo = self.thread_local();
        let mut blob = repo.find_blob(oid).map_err(|_| FsError::NoEntry)?;
        Ok(std::mem::take(&mut blob.data))
    }

    /// Resolves `rela_path` inside the tree named by `tree_id`.
    ///
    /// Symlink and submodule entries are outside the projected
    /// namespace, so they miss just like absent names do.
    pub fn tree_hit(&self, tree_id: ObjectId, rela_path: &str) -> Result<TreeHit, FsError> {
        let repo = self.thread_local();
        let tree = repo.find_tree(tree_id).map_err(|_| FsError::NoEntry)?;
        let entry = tree
            .lookup_entry_by_path(rela_path)
            .map_err(|_| FsError::NoEntry)?
            .ok_or(FsError::NoEntry)?;
        match entry.mode().kind() {
            EntryKind::Tree => Ok(TreeHit::Subtree(entry.id().detach())),
            EntryKind::Blob | EntryKind::BlobExecutable => {
                let oid = entry.id().detach();
                let size = self.blob_size(oid)?;
                Ok(TreeHit::Blob { oid, size })
            }
            EntryKind::Link | EntryKind::Commit => Err(FsError::NoEntry),
        }
    }
}

/// Walks every object id in the store, in whatever order the object
/// database yields, until `f` breaks. Enumeration errors end the walk;
/// ids that fail to decode are skipped.
pub fn visit_all_objects(
    repo: &gix::Repository,
    f: &mut dyn FnMut(&gix::Repository, &ObjectId) -> ControlFlow<()>,
) {
    let Ok(iter) = repo.objects.iter() else {
        return;
    };
    for id in iter {
        let Ok(id) = id else { continue };
        if f(repo, &id).is_break() {
            return;
        }
    }
}

/// Object kind from the header-only lookup; `None` when the object is
/// missing or unreadable.
pub fn object_kind(repo: &gix::Repository, oid: &ObjectId) -> Option<Kind> {
    repo.find_header(*oid).ok().map(|header| header.kind())
}

/// Visits the names of a tree's immediate children, skipping entries
/// that are neither subtrees nor blobs.
pub fn visit_tree_names(
    repo: &gix::Repository,
    tree_id: ObjectId,
    f: &mut dyn FnMut(&BStr) -> ControlFlow<()>,
) {
    let Ok(tree) = repo.find_tree(tree_id) else {
        return;
    };
    for entry in tree.iter() {
        let Ok(entry) = entry else { return };
        match entry.inner.mode.kind() {
            EntryKind::Tree | EntryKind::Blob | EntryKind::BlobExecutable => {}
            EntryKind::Link | EntryKind::Commit => continue,
        }
        if f(entry.inner.filename).is_break() {
            return;
        }
    }
}

fn commit_time_to_system(commit: &gix::Commit<'_>, default: SystemTime) -> SystemTime {
    match commit.committer() {
        Ok(signature) => match signature.time() {
            Ok(time) => seconds_to_system_time(time.seconds),
            Err(_) => default,
        },
        Err(_) => default,
    }
}

fn seconds_to_system_time(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}
