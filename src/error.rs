//! Error taxonomy for the filesystem layer.
//!
//! Components return typed failures; the facade converts them into the
//! bridge's `io::Error`-with-raw-errno convention at the boundary.

use std::io;

use once_cell::sync::OnceCell;
use thiserror::Error;

/// Process exit code reserved for internal logic violations.
pub const LOGIC_ERROR_EXIT: i32 = 64;

#[derive(Debug, Error)]
pub enum FsError {
    /// Unparsable path, missing object, or any lower-level store failure.
    #[error("no such file or directory")]
    NoEntry,

    #[error("not a directory")]
    NotDir,

    #[error("is a directory")]
    IsDir,

    #[error("read-only filesystem")]
    ReadOnly,

    /// `readdir` was called with an offset that does not match the
    /// tracked cursor.
    #[error("directory offset {got} does not match cursor {expected}")]
    BadOffset { expected: u64, got: u64 },

    #[error("out of memory")]
    OutOfMemory,

    /// Plumbing failure (pipe creation, thread spawn).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NoEntry => libc::ENOENT,
            FsError::NotDir => libc::ENOTDIR,
            FsError::IsDir => libc::EISDIR,
            FsError::ReadOnly => libc::EROFS,
            FsError::BadOffset { .. } => libc::EBADF,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        io::Error::from_raw_os_error(err.errno())
    }
}

static HALT_HOOK: OnceCell<fn(&str) -> !> = OnceCell::new();

/// Replaces process termination on logic violations, for tests.
pub fn set_halt_hook(hook: fn(&str) -> !) {
    let _ = HALT_HOOK.set(hook);
}

/// Terminates the process on a reachable-only-by-bug condition.
///
/// The mount is in an unknown state at this point, so exiting beats
/// limping on. Tests install a hook that panics instead.
pub fn halt(msg: &str) -> ! {
    if let Some(hook) = HALT_HOOK.get() {
        hook(msg);
    }
    tracing::error!("logic error: {msg}");
    std::process::exit(LOGIC_ERROR_EXIT);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NoEntry.errno(), libc::ENOENT);
        assert_eq!(FsError::NotDir.errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsDir.errno(), libc::EISDIR);
        assert_eq!(FsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(
            FsError::BadOffset {
                expected: 3,
                got: 7
            }
            .errno(),
            libc::EBADF
        );
        assert_eq!(FsError::OutOfMemory.errno(), libc::ENOMEM);
    }

    #[test]
    fn io_error_carries_errno() {
        let err: io::Error = FsError::ReadOnly.into();
        assert_eq!(err.raw_os_error(), Some(libc::EROFS));
    }

    #[test]
    #[should_panic(expected = "captured: boom")]
    fn halt_hook_replaces_termination() {
        set_halt_hook(|msg| panic!("captured: {msg}"));
        halt("boom");
    }
}
