//! File attribute types, shaped the way the teacher crate's `memory.rs`
//! filesystem already expects them (`FileAttr { ino, kind, perm, .. }`
//! with a `Default` impl), generalized so the FUSE adapter (finesse's
//! §4.H) can translate a `fuse_attr_out` reply into this shape regardless
//! of which embedded filesystem produced it.

use std::time::SystemTime;

/// Kind of a filesystem entry, mirroring `fuse_kernel`'s `S_IF*` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    NamedPipe,
    CharDevice,
    BlockDevice,
    Directory,
    RegularFile,
    Symlink,
    Socket,
}

/// Attributes of a filesystem entry, as returned by `getattr`/`lookup`/
/// `create`/`setattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: FileType,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub flags: u32,
    pub blksize: u32,
}

impl Default for FileAttr {
    fn default() -> Self {
        FileAttr {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
            crtime: SystemTime::UNIX_EPOCH,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        }
    }
}

/// The subset of `setattr` fields the kernel may ask to change, each
/// individually optional. Mirrors `fuse_setattr_in`'s `valid` bitmask
/// without exposing the bitmask itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttrInput {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub fh: Option<u64>,
    pub crtime: Option<SystemTime>,
    pub flags: Option<u32>,
}
