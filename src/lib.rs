//! gitrofs: a read-only FUSE projection of a Git object store.
//!
//! `/commits/<oid>` exposes each commit as a directory with a browsable
//! `tree/` and a synthetic `parent` file; `/blobs/<oid>` exposes every
//! blob as a regular file. Every write is rejected.

pub mod dirstream;
pub mod error;
pub mod filehandle;
pub mod fs;
pub mod inode;
pub mod node;
pub mod path;
pub mod repo;

#[cfg(test)]
pub(crate) mod testutil;
