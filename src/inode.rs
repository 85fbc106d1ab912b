//! Conversion between paths, Git object ids, and 64-bit inode numbers.
//!
//! The bridge addresses files by inode, the filesystem by path, so the
//! facade keeps a bidirectional table. Names that are object ids derive
//! their inode directly from the low 64 bits of the id; everything else
//! draws from a counter. Derivation collisions are not tracked beyond
//! falling back to the counter for the later arrival.

use std::collections::HashMap;
use std::sync::Arc;

use gix::ObjectId;

use crate::path::OID_HEX_LEN;

/// Convert a Git object id into a 64-bit inode by taking the low 64 bits.
#[must_use]
pub fn inode_from_oid(oid: &ObjectId) -> u64 {
    let bytes = oid.as_bytes();
    let len = bytes.len();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[len - 8..]);
    u64::from_be_bytes(buf)
}

#[derive(Debug)]
pub struct InodeTable {
    by_ino: HashMap<u64, Arc<str>>,
    by_path: HashMap<Arc<str>, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new(root_ino: u64) -> Self {
        let mut table = InodeTable {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            next: root_ino + 1,
        };
        let root: Arc<str> = Arc::from("/");
        table.by_ino.insert(root_ino, Arc::clone(&root));
        table.by_path.insert(root, root_ino);
        table
    }

    pub fn path_of(&self, ino: u64) -> Option<Arc<str>> {
        self.by_ino.get(&ino).cloned()
    }

    /// Returns the inode for `path`, assigning one on first sight.
    pub fn intern(&mut self, path: &str) -> u64 {
        if let Some(ino) = self.by_path.get(path) {
            return *ino;
        }

        let ino = match derived_ino(path) {
            Some(candidate) if candidate != 0 && !self.by_ino.contains_key(&candidate) => {
                candidate
            }
            _ => self.alloc(),
        };

        let shared: Arc<str> = Arc::from(path);
        self.by_ino.insert(ino, Arc::clone(&shared));
        self.by_path.insert(shared, ino);
        ino
    }

    fn alloc(&mut self) -> u64 {
        loop {
            let ino = self.next;
            self.next += 1;
            if !self.by_ino.contains_key(&ino) {
                return ino;
            }
        }
    }
}

/// Inode derived from the final path component when it is an object id.
fn derived_ino(path: &str) -> Option<u64> {
    let last = path.rsplit('/').next()?;
    if last.len() != OID_HEX_LEN {
        return None;
    }
    let oid = ObjectId::from_hex(last.as_bytes()).ok()?;
    Some(inode_from_oid(&oid))
}
