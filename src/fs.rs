//! FUSE filesystem facade.
//!
//! Binds the path grammar, resolver, directory streams, and file
//! buffers to the bridge's operation table. The bridge addresses
//! objects by inode, so a bidirectional inode↔path table recovers the
//! path first; everything after that is the per-call pipeline
//! parse → resolve → dispatch, with no state besides the open-handle
//! registries.

use std::collections::HashMap;
use std::ffi::CStr;
use std::io;
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuse_backend_rs::abi::fuse_abi::{stat64, ROOT_ID};
use fuse_backend_rs::api::filesystem::{
    Context, DirEntry, Entry, FileSystem, OpenOptions, ZeroCopyWriter,
};
use gix::ObjectId;
use parking_lot::{Mutex, RwLock};

use crate::dirstream::{DirSource, DirStream};
use crate::error::FsError;
use crate::filehandle::FileBuffer;
use crate::inode::{inode_from_oid, InodeTable};
use crate::node::{self, Node};
use crate::path::{self, OID_HEX_LEN};
use crate::repo::Repository;

const DIR_ATTR_MODE: u32 = libc::S_IFDIR | 0o555;
const FILE_ATTR_MODE: u32 = libc::S_IFREG | 0o444;

const ENTRY_TTL: Duration = Duration::from_secs(1);
const ATTR_TTL: Duration = Duration::from_secs(1);

const NAME_DOT: &[u8] = b".";
const NAME_DOT_DOT: &[u8] = b"..";
const NAME_TREE: &[u8] = b"tree";

/// How one open directory types its entries for the bridge.
#[derive(Debug, Clone, Copy)]
enum Listing {
    Root,
    Commits,
    Blobs,
    CommitDir,
    Tree,
}

impl Listing {
    fn for_source(source: &DirSource) -> Self {
        match source {
            DirSource::Root => Listing::Root,
            DirSource::Objects { kind } => {
                if *kind == gix::object::Kind::Commit {
                    Listing::Commits
                } else {
                    Listing::Blobs
                }
            }
            DirSource::CommitDir { .. } => Listing::CommitDir,
            DirSource::Tree { .. } => Listing::Tree,
        }
    }
}

/// Per-`opendir` state held in the handle registry.
struct OpenDir {
    stream: DirStream,
    listing: Listing,
    path: Arc<str>,
    self_ino: u64,
    parent_ino: u64,
}

pub struct GitRoFs {
    repo: Arc<Repository>,
    start_time: SystemTime,
    inodes: RwLock<InodeTable>,
    dirs: RwLock<HashMap<u64, Arc<Mutex<OpenDir>>>>,
    files: RwLock<HashMap<u64, Arc<FileBuffer>>>,
    next_handle: AtomicU64,
}

impl GitRoFs {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo: Arc::new(repo),
            start_time: SystemTime::now(),
            inodes: RwLock::new(InodeTable::new(ROOT_ID)),
            dirs: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn path_of(&self, inode: u64) -> io::Result<Arc<str>> {
        self.inodes
            .read()
            .path_of(inode)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    /// The per-call pipeline: parse, then resolve against the store.
    fn resolve(&self, path: &str) -> Result<Node, FsError> {
        let spec = path::parse(path)?;
        node::resolve(&self.repo, self.start_time, &spec)
    }

    fn attr_for(&self, ctx: &Context, inode: u64, node: &Node) -> stat64 {
        match node.size() {
            None => build_dir_attr(inode, ctx.uid, ctx.gid, node.mtime()),
            Some(size) => build_file_attr(inode, ctx.uid, ctx.gid, size, node.mtime()),
        }
    }

    fn alloc_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn intern(&self, path: &str) -> u64 {
        self.inodes.write().intern(path)
    }

    /// Inode and `d_type` for one directory entry.
    ///
    /// Object-id names derive their inode without touching the table so
    /// listing a store with millions of objects does not grow it; the
    /// table learns those paths if and when the kernel looks them up.
    fn dirent_for(
        &self,
        listing: Listing,
        dir_path: &str,
        self_ino: u64,
        parent_ino: u64,
        name: &[u8],
    ) -> (u64, u32) {
        if name == NAME_DOT {
            return (self_ino, libc::DT_DIR as u32);
        }
        if name == NAME_DOT_DOT {
            return (parent_ino, libc::DT_DIR as u32);
        }
        match listing {
            Listing::Root => {
                let name = String::from_utf8_lossy(name);
                (
                    self.intern(&child_path(dir_path, &name)),
                    libc::DT_DIR as u32,
                )
            }
            Listing::Commits => (oid_ino(name), libc::DT_DIR as u32),
            Listing::Blobs => (oid_ino(name), libc::DT_REG as u32),
            Listing::CommitDir => {
                let dtype = if name == NAME_TREE {
                    libc::DT_DIR
                } else {
                    libc::DT_REG
                };
                let name = String::from_utf8_lossy(name);
                (self.intern(&child_path(dir_path, &name)), dtype as u32)
            }
            Listing::Tree => {
                let name = String::from_utf8_lossy(name);
                (
                    self.intern(&child_path(dir_path, &name)),
                    libc::DT_UNKNOWN as u32,
                )
            }
        }
    }
}

impl FileSystem for GitRoFs {
    type Inode = u64;
    type Handle = u64;

    fn lookup(
        &self,
        ctx: &Context,
        parent: Self::Inode,
        name: &CStr,
    ) -> io::Result<Entry> {
        let name =
            str::from_utf8(name.to_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::ENOENT))?;
        let parent_path = self.path_of(parent)?;
        let path = child_path(&parent_path, name);

        let node = self.resolve(&path).map_err(io::Error::from)?;
        let inode = self.intern(&path);
        Ok(Entry {
            inode,
            generation: 0,
            attr: self.attr_for(ctx, inode, &node),
            attr_flags: 0,
            attr_timeout: ATTR_TTL,
            entry_timeout: ENTRY_TTL,
        })
    }

    fn getattr(
        &self,
        ctx: &Context,
        inode: Self::Inode,
        _handle: Option<Self::Handle>,
    ) -> io::Result<(stat64, Duration)> {
        let path = self.path_of(inode)?;
        let node = self.resolve(&path).map_err(io::Error::from)?;
        Ok((self.attr_for(ctx, inode, &node), ATTR_TTL))
    }

    fn opendir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions)> {
        let path = self.path_of(inode)?;
        let node = self.resolve(&path).map_err(io::Error::from)?;
        if !node.is_dir() {
            return Err(FsError::NotDir.into());
        }

        let source = DirSource::for_node(&node).map_err(io::Error::from)?;
        let listing = Listing::for_source(&source);
        let stream = DirStream::spawn(Arc::clone(&self.repo), source).map_err(io::Error::from)?;

        let parent_ino = self.intern(&parent_path(&path));
        let handle = self.alloc_handle();
        tracing::debug!(path = %path, handle, "opendir");
        self.dirs.write().insert(
            handle,
            Arc::new(Mutex::new(OpenDir {
                stream,
                listing,
                path: Arc::clone(&path),
                self_ino: inode,
                parent_ino,
            })),
        );
        Ok((Some(handle), OpenOptions::empty()))
    }

    fn readdir(
        &self,
        _ctx: &Context,
        _inode: Self::Inode,
        handle: Self::Handle,
        _size: u32,
        offset: u64,
        add_entry: &mut dyn FnMut(DirEntry) -> io::Result<usize>,
    ) -> io::Result<()> {
        let dir = self
            .dirs
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        let mut dir = dir.lock();
        let OpenDir {
            stream,
            listing,
            path,
            self_ino,
            parent_ino,
        } = &mut *dir;
        let (listing, self_ino, parent_ino) = (*listing, *self_ino, *parent_ino);
        let dir_path = Arc::clone(path);

        stream
            .fill(offset, &mut |name, next_offset| {
                let (ino, type_) =
                    self.dirent_for(listing, &dir_path, self_ino, parent_ino, name);
                let written = add_entry(DirEntry {
                    ino,
                    offset: next_offset,
                    type_,
                    name,
                })
                .map_err(FsError::Io)?;
                Ok(written != 0)
            })
            .map_err(io::Error::from)
    }

    fn releasedir(
        &self,
        _ctx: &Context,
        _inode: Self::Inode,
        _flags: u32,
        handle: Self::Handle,
    ) -> io::Result<()> {
        if let Some(dir) = self.dirs.write().remove(&handle) {
            let mut dir = dir.lock();
            tracing::debug!(path = %dir.path, handle, "releasedir");
            dir.stream.shutdown();
        }
        Ok(())
    }

    fn open(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions, Option<u32>)> {
        if flags as i32 & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return Err(FsError::ReadOnly.into());
        }

        let path = self.path_of(inode)?;
        let node = self.resolve(&path).map_err(io::Error::from)?;
        if node.is_dir() {
            return Err(FsError::IsDir.into());
        }

        let buffer = FileBuffer::open(&self.repo, &node).map_err(io::Error::from)?;
        let handle = self.alloc_handle();
        tracing::debug!(path = %path, handle, size = buffer.len(), "open");
        self.files.write().insert(handle, Arc::new(buffer));
        Ok((Some(handle), OpenOptions::empty(), None))
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &self,
        _ctx: &Context,
        _inode: Self::Inode,
        handle: Self::Handle,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> io::Result<usize> {
        let buffer = self
            .files
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        let chunk = buffer.read_at(offset, size as usize);
        if chunk.is_empty() {
            return Ok(0);
        }
        w.write_all(chunk)?;
        Ok(chunk.len())
    }

    #[allow(clippy::too_many_arguments)]
    fn release(
        &self,
        _ctx: &Context,
        _inode: Self::Inode,
        _flags: u32,
        handle: Self::Handle,
        _flush: bool,
        _flock_release: bool,
        _lock_owner: Option<u64>,
    ) -> io::Result<()> {
        self.files.write().remove(&handle);
        Ok(())
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Inode for an object-id directory entry; falls back to a name hash
/// only if the producer ever emitted something that is not an id.
fn oid_ino(name: &[u8]) -> u64 {
    if name.len() == OID_HEX_LEN {
        if let Ok(oid) = ObjectId::from_hex(name) {
            return inode_from_oid(&oid);
        }
    }
    // not reachable from the object listings; keep readdir total anyway
    name.iter().fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
        (acc ^ u64::from(*b)).wrapping_mul(0x100_0000_01b3)
    })
}

fn build_dir_attr(inode: u64, uid: u32, gid: u32, time: SystemTime) -> stat64 {
    let (secs, nsecs) = time_to_unix_parts(time);
    let mut attr: stat64 = unsafe { std::mem::zeroed() };
    attr.st_ino = inode;
    attr.st_mode = DIR_ATTR_MODE;
    attr.st_nlink = 2;
    attr.st_uid = uid;
    attr.st_gid = gid;
    attr.st_blksize = 4096;
    attr.st_blocks = 0;
    // size intentionally left zeroed for directories
    attr.st_atime = secs;
    attr.st_atime_nsec = nsecs;
    attr.st_mtime = secs;
    attr.st_mtime_nsec = nsecs;
    attr.st_ctime = secs;
    attr.st_ctime_nsec = nsecs;
    attr
}

fn build_file_attr(inode: u64, uid: u32, gid: u32, size: u64, time: SystemTime) -> stat64 {
    let (secs, nsecs) = time_to_unix_parts(time);
    let mut attr: stat64 = unsafe { std::mem::zeroed() };
    attr.st_ino = inode;
    attr.st_mode = FILE_ATTR_MODE;
    attr.st_nlink = 1;
    attr.st_uid = uid;
    attr.st_gid = gid;
    attr.st_blksize = 4096;
    attr.st_blocks = 0;
    attr.st_size = size as i64;
    attr.st_atime = secs;
    attr.st_atime_nsec = nsecs;
    attr.st_mtime = secs;
    attr.st_mtime_nsec = nsecs;
    attr.st_ctime = secs;
    attr.st_ctime_nsec = nsecs;
    attr
}

fn time_to_unix_parts(time: SystemTime) -> (i64, i64) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => (duration.as_secs() as i64, duration.subsec_nanos() as i64),
        Err(err) => {
            let duration = err.duration();
            (-(duration.as_secs() as i64), duration.subsec_nanos() as i64)
        }
    }
}
