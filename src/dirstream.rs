//! Lazy directory streaming.
//!
//! Each `opendir` spawns one producer thread that enumerates the
//! directory's entries and writes each name, NUL-terminated, into a
//! private pipe. The consumer side reads into a small growable buffer,
//! splits on NUL, and hands complete names to the bridge's emitter with
//! a byte-offset cursor. The pipe gives backpressure for free and makes
//! cancellation a single flag read on the producer side.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gix::object::Kind;
use gix::ObjectId;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::pipe;

use crate::error::{halt, FsError};
use crate::node::Node;
use crate::repo::{self, Repository};

/// Consumer buffer growth increment; also the refill read size.
const READ_CHUNK: usize = 64;

const NAME_DOT: &[u8] = b".";
const NAME_DOT_DOT: &[u8] = b"..";
const NAME_COMMITS: &[u8] = b"commits";
const NAME_BLOBS: &[u8] = b"blobs";
const NAME_TREE: &[u8] = b"tree";
const NAME_PARENT: &[u8] = b"parent";

/// What a directory's producer enumerates.
#[derive(Debug, Clone)]
pub enum DirSource {
    Root,
    /// Every object id in the store of the given kind.
    Objects { kind: Kind },
    /// The fixed children of one commit directory.
    CommitDir { has_parent: bool },
    /// The immediate children of one tree.
    Tree { id: ObjectId },
}

impl DirSource {
    pub fn for_node(node: &Node) -> Result<Self, FsError> {
        match node {
            Node::Root { .. } => Ok(DirSource::Root),
            Node::CommitList { .. } => Ok(DirSource::Objects { kind: Kind::Commit }),
            Node::BlobList { .. } => Ok(DirSource::Objects { kind: Kind::Blob }),
            Node::Commit { has_parent, .. } => Ok(DirSource::CommitDir {
                has_parent: *has_parent,
            }),
            Node::Tree { tree, .. } => Ok(DirSource::Tree { id: *tree }),
            Node::Parent { .. } | Node::Blob { .. } => Err(FsError::NotDir),
        }
    }
}

/// Producer-side half: the write end of the pipe plus the shared
/// cancellation flag.
struct EntryWriter {
    pipe: File,
    cancel: Arc<AtomicBool>,
}

impl EntryWriter {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Writes one NUL-terminated name. Cancellation and any pipe error
    /// (the consumer hung up) both end the enumeration.
    fn send(&mut self, name: &[u8]) -> ControlFlow<()> {
        if self.cancelled() {
            return ControlFlow::Break(());
        }
        let write = self
            .pipe
            .write_all(name)
            .and_then(|()| self.pipe.write_all(&[0]));
        match write {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}

fn produce(repo: Arc<Repository>, source: DirSource, mut out: EntryWriter) {
    if out.send(NAME_DOT).is_break() || out.send(NAME_DOT_DOT).is_break() {
        return;
    }

    match source {
        DirSource::Root => {
            if out.send(NAME_COMMITS).is_break() {
                return;
            }
            let _ = out.send(NAME_BLOBS);
        }
        DirSource::Objects { kind } => {
            let local = repo.thread_local();
            repo::visit_all_objects(&local, &mut |local, id| {
                if out.cancelled() {
                    return ControlFlow::Break(());
                }
                if repo::object_kind(local, id) != Some(kind) {
                    return ControlFlow::Continue(());
                }
                out.send(id.to_string().as_bytes())
            });
        }
        DirSource::CommitDir { has_parent } => {
            if out.send(NAME_TREE).is_break() {
                return;
            }
            if has_parent {
                let _ = out.send(NAME_PARENT);
            }
        }
        DirSource::Tree { id } => {
            let local = repo.thread_local();
            repo::visit_tree_names(&local, id, &mut |name| out.send(name.as_ref()));
        }
    }
    // Dropping `out` closes the write end; the consumer sees EOF.
}

/// Per-`opendir` state: consumer pipe end, producer thread, cursor, and
/// the splice buffer between them.
pub struct DirStream {
    reader: File,
    producer: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    last_offset: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl DirStream {
    pub fn spawn(repo: Arc<Repository>, source: DirSource) -> Result<Self, FsError> {
        let (read_fd, write_fd) = pipe().map_err(io::Error::from)?;
        let cancel = Arc::new(AtomicBool::new(false));
        let writer = EntryWriter {
            pipe: File::from(write_fd),
            cancel: Arc::clone(&cancel),
        };
        let producer = thread::Builder::new()
            .name("gitrofs-readdir".into())
            .spawn(move || produce(repo, source, writer))
            .map_err(FsError::Io)?;
        Ok(DirStream {
            reader: File::from(read_fd),
            producer: Some(producer),
            cancel,
            last_offset: 0,
            buf: Vec::new(),
            pos: 0,
        })
    }

    /// Feeds complete entry names to `emit` until the stream is
    /// exhausted or the emitter reports its buffer full (`Ok(false)`).
    ///
    /// `offset` must equal the cursor returned with the last accepted
    /// entry; the first call starts at 0. A rejected entry stays
    /// buffered and is delivered again on the next call.
    pub fn fill(
        &mut self,
        offset: u64,
        emit: &mut dyn FnMut(&[u8], u64) -> Result<bool, FsError>,
    ) -> Result<(), FsError> {
        if offset != self.last_offset {
            return Err(FsError::BadOffset {
                expected: self.last_offset,
                got: offset,
            });
        }

        loop {
            while let Some(nul) = self.buf[self.pos..].iter().position(|b| *b == 0) {
                if nul == 0 {
                    halt("empty name in directory stream");
                }
                let next_offset = self.last_offset + nul as u64 + 1;
                let name = &self.buf[self.pos..self.pos + nul];
                if !emit(name, next_offset)? {
                    return Ok(());
                }
                self.pos += nul + 1;
                self.last_offset = next_offset;
            }

            self.compact();
            if self.refill()? == 0 {
                // Producer finished and closed its end.
                return Ok(());
            }
        }
    }

    /// Left-shifts consumed bytes away once the scan cursor catches up,
    /// keeping memory bounded to a small multiple of the largest name.
    fn compact(&mut self) {
        if self.pos == self.buf.len() {
            self.buf.clear();
        } else if self.pos > 0 {
            self.buf.drain(..self.pos);
        }
        self.pos = 0;
    }

    fn refill(&mut self) -> Result<usize, FsError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    self.buf
                        .try_reserve(n)
                        .map_err(|_| FsError::OutOfMemory)?;
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FsError::Io(err)),
            }
        }
    }

    /// Stops the producer and reaps it. Safe to call more than once;
    /// also runs on drop so a failed `opendir` unwinds the same way.
    pub fn shutdown(&mut self) {
        if self.producer.is_none() {
            return;
        }
        self.cancel.store(true, Ordering::Relaxed);
        self.drain();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }

    /// Non-blocking drain to EOF so a producer blocked mid-write gets
    /// room to finish, notice the flag, and exit.
    fn drain(&mut self) {
        if set_nonblocking(&self.reader).is_err() {
            return;
        }
        let mut sink = [0u8; 256];
        loop {
            match self.reader.read(&mut sink) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::yield_now();
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn set_nonblocking(file: &File) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(file, FcntlArg::F_GETFL)?);
    fcntl(file, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;
    use crate::node;
    use crate::path::parse;
    use crate::testutil::Fixture;

    fn stream_for(fx: &Fixture, path: &str) -> DirStream {
        let spec = parse(path).unwrap();
        let node = node::resolve(&fx.repo, SystemTime::now(), &spec).unwrap();
        let source = DirSource::for_node(&node).unwrap();
        DirStream::spawn(Arc::clone(&fx.repo), source).unwrap()
    }

    /// Drives `fill` to exhaustion, recording names and cursors.
    fn read_all(stream: &mut DirStream, offset: u64) -> Vec<(String, u64)> {
        let mut entries = Vec::new();
        stream
            .fill(offset, &mut |name, next| {
                entries.push((String::from_utf8(name.to_vec()).unwrap(), next));
                Ok(true)
            })
            .unwrap();
        entries
    }

    fn names(entries: &[(String, u64)]) -> Vec<String> {
        entries.iter().map(|(name, _)| name.clone()).collect()
    }

    #[test]
    fn root_lists_fixed_children() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, "/");
        let entries = read_all(&mut stream, 0);
        assert_eq!(names(&entries), vec![".", "..", "commits", "blobs"]);
    }

    #[test]
    fn cursor_is_strictly_increasing_byte_offsets() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, "/");
        let entries = read_all(&mut stream, 0);
        let mut last = 0;
        for (name, next) in &entries {
            // each entry advances by its own length plus the NUL
            assert_eq!(*next, last + name.len() as u64 + 1);
            last = *next;
        }
    }

    #[test]
    fn commit_dir_lists_parent_only_when_present() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, &format!("/commits/{}", fx.child_commit));
        assert_eq!(
            names(&read_all(&mut stream, 0)),
            vec![".", "..", "tree", "parent"]
        );

        let mut stream = stream_for(&fx, &format!("/commits/{}", fx.root_commit));
        assert_eq!(names(&read_all(&mut stream, 0)), vec![".", "..", "tree"]);
    }

    #[test]
    fn commit_list_yields_every_commit_once() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, "/commits");
        let entries = read_all(&mut stream, 0);
        let mut listed: Vec<String> = names(&entries)[2..].to_vec();
        listed.sort();
        let mut expected = vec![fx.root_commit.to_string(), fx.child_commit.to_string()];
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn blob_list_yields_every_blob_once() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, "/blobs");
        let entries = read_all(&mut stream, 0);
        let mut listed: Vec<String> = names(&entries)[2..].to_vec();
        listed.sort();
        let mut expected: Vec<String> = fx.all_blobs.iter().map(|id| id.to_string()).collect();
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn tree_listing_skips_symlinks_and_handles_long_names() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, &format!("/commits/{}/tree", fx.child_commit));
        // git tree order; the long name exceeds the 64-byte buffer chunk
        assert_eq!(
            names(&read_all(&mut stream, 0)),
            vec![".", "..", Fixture::LONG_NAME, "hello.txt", "sub"]
        );
    }

    #[test]
    fn emitter_full_leaves_entry_for_redelivery() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, "/blobs");

        let mut first = Vec::new();
        stream
            .fill(0, &mut |name, next| {
                if first.len() == 3 {
                    return Ok(false);
                }
                first.push((String::from_utf8(name.to_vec()).unwrap(), next));
                Ok(true)
            })
            .unwrap();
        assert_eq!(first.len(), 3);

        // resume at the offset of the last accepted entry
        let resume_at = first.last().unwrap().1;
        let rest = read_all(&mut stream, resume_at);

        let full: Vec<String> = names(&first).into_iter().chain(names(&rest)).collect();
        let mut full_stream = stream_for(&fx, "/blobs");
        assert_eq!(names(&read_all(&mut full_stream, 0)), full);
    }

    #[test]
    fn mismatched_offset_is_rejected() {
        let fx = Fixture::new();
        let mut stream = stream_for(&fx, "/");
        let err = stream.fill(7, &mut |_, _| Ok(true)).unwrap_err();
        assert!(matches!(err, FsError::BadOffset { expected: 0, got: 7 }));
    }

    #[test]
    fn empty_store_lists_nothing_beyond_dot_entries() {
        let (_dir, repo) = crate::testutil::empty_repo();
        let mut root = DirStream::spawn(Arc::clone(&repo), DirSource::Root).unwrap();
        assert_eq!(
            names(&read_all(&mut root, 0)),
            vec![".", "..", "commits", "blobs"]
        );

        for path in ["/commits", "/blobs"] {
            let node = node::resolve(&repo, SystemTime::now(), &parse(path).unwrap()).unwrap();
            let source = DirSource::for_node(&node).unwrap();
            let mut stream = DirStream::spawn(Arc::clone(&repo), source).unwrap();
            assert_eq!(names(&read_all(&mut stream, 0)), vec![".", ".."]);
        }
    }

    #[test]
    fn release_without_reading_terminates_promptly() {
        let fx = Fixture::new();
        // Never read a byte; shutdown must still cancel and join.
        let mut stream = stream_for(&fx, "/blobs");
        stream.shutdown();
        // And again through the drop path.
        let stream = stream_for(&fx, "/commits");
        drop(stream);
    }
}
