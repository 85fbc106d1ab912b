//! Path grammar: lexical classification of absolute paths.
//!
//! Classification never touches the object store; whether the named
//! objects exist is the resolver's business.

use gix::ObjectId;
use itertools::Itertools;

use crate::error::FsError;

/// Hex length of an object id (SHA-1).
pub const OID_HEX_LEN: usize = 40;

const NAME_COMMITS: &str = "commits";
const NAME_BLOBS: &str = "blobs";
const NAME_TREE: &str = "tree";
const NAME_PARENT: &str = "parent";

/// One fully classified absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    /// `/`
    Root,
    /// `/commits`
    CommitList,
    /// `/blobs`
    BlobList,
    /// `/commits/<oid>`
    Commit { oid: ObjectId },
    /// `/commits/<oid>/tree`
    CommitTree { oid: ObjectId },
    /// `/commits/<oid>/parent`
    CommitParent { oid: ObjectId },
    /// `/commits/<oid>/tree/<sub...>` — a path inside the commit's tree.
    TreePath { oid: ObjectId, path: String },
    /// `/blobs/<oid>`
    Blob { oid: ObjectId },
}

/// Parses `path` or reports `NoEntry`.
///
/// The bridge hands us absolute paths without trailing slashes; anything
/// else (empty components, unknown names, malformed ids) falls out of the
/// namespace.
pub fn parse(path: &str) -> Result<PathSpec, FsError> {
    let rest = path.strip_prefix('/').ok_or(FsError::NoEntry)?;
    if rest.is_empty() {
        return Ok(PathSpec::Root);
    }

    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(FsError::NoEntry);
    }

    match parts[0] {
        NAME_COMMITS => parse_commit_sub_path(&parts),
        NAME_BLOBS => parse_blob_sub_path(&parts),
        _ => Err(FsError::NoEntry),
    }
}

fn parse_commit_sub_path(parts: &[&str]) -> Result<PathSpec, FsError> {
    if parts.len() == 1 {
        return Ok(PathSpec::CommitList);
    }

    let oid = parse_oid(parts[1])?;

    match parts.get(2) {
        None => Ok(PathSpec::Commit { oid }),
        Some(&NAME_TREE) => {
            if parts.len() == 3 {
                Ok(PathSpec::CommitTree { oid })
            } else {
                Ok(PathSpec::TreePath {
                    oid,
                    path: parts[3..].iter().join("/"),
                })
            }
        }
        // `parent` is a leaf; anything below it does not exist.
        Some(&NAME_PARENT) if parts.len() == 3 => Ok(PathSpec::CommitParent { oid }),
        Some(_) => Err(FsError::NoEntry),
    }
}

fn parse_blob_sub_path(parts: &[&str]) -> Result<PathSpec, FsError> {
    if parts.len() == 1 {
        return Ok(PathSpec::BlobList);
    }
    if parts.len() > 2 {
        return Err(FsError::NoEntry);
    }
    Ok(PathSpec::Blob {
        oid: parse_oid(parts[1])?,
    })
}

/// Accepts exactly [`OID_HEX_LEN`] lowercase hex characters.
///
/// Uppercase input is rejected so every object has a single canonical
/// path.
fn parse_oid(part: &str) -> Result<ObjectId, FsError> {
    if part.len() != OID_HEX_LEN {
        return Err(FsError::NoEntry);
    }
    if !part
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(FsError::NoEntry);
    }
    ObjectId::from_hex(part.as_bytes()).map_err(|_| FsError::NoEntry)
}
