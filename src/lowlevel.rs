//! The embedded FUSE daemon's low-level operation vector (spec.md §4.H:
//! "The server embeds the FUSE daemon's low-level operation vector"). This
//! crate does not implement a filesystem itself (spec.md §1 "Explicitly
//! out of scope": "the FUSE filesystem implementation itself"); it only
//! consumes one through this trait, shaped after the teacher's own
//! `Filesystem` trait in spirit (one method per low-level operation, a
//! `Request` context parameter, directly-returned results) but synchronous
//! and errno-returning rather than reply-object-based, since here the
//! adapter (§4.H) is the only caller and it needs a plain return value to
//! translate into a protocol response.

use std::time::SystemTime;

use finesse_abi::{FileAttr, Ino, SetAttrInput, FUSE_ROOT_ID};

/// One directory entry, as returned by `readdir`/`readdirplus`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: Ino,
    pub offset: i64,
    pub kind: finesse_abi::FileType,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatfsData {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// A successful `lookup`/`mknod`/`mkdir`/`symlink`/`link`/`create` result:
/// an inode's attributes plus the directory-entry cache hints the kernel
/// (or here, the adapter) would otherwise apply.
#[derive(Debug, Clone)]
pub struct EntryOut {
    pub attr: FileAttr,
    pub generation: u64,
    pub entry_valid: std::time::Duration,
    pub attr_valid: std::time::Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenOut {
    pub fh: u64,
    pub flags: u32,
}

/// Result type every low-level operation returns: `Err(errno)` is
/// forwarded verbatim as the protocol response's `result` field (spec.md
/// §4.H "Failure semantics").
pub type OpResult<T> = Result<T, i32>;

/// The embedded FUSE low-level operation vector. `uid`/`gid`/`pid` request
/// context that a real kernel-facing implementation would read off the
/// in-kernel request header is passed explicitly per call instead, since
/// here every call genuinely originates from this crate's adapter rather
/// than from `/dev/fuse`.
pub trait FuseLowLevelOps: Send + Sync {
    fn lookup(&self, parent: Ino, name: &str) -> OpResult<EntryOut>;
    fn forget(&self, ino: Ino, nlookup: u64);
    fn getattr(&self, ino: Ino) -> OpResult<FileAttr>;
    fn setattr(&self, ino: Ino, input: &SetAttrInput) -> OpResult<FileAttr>;
    fn readlink(&self, ino: Ino) -> OpResult<String>;
    fn mknod(&self, parent: Ino, name: &str, mode: u32, rdev: u32) -> OpResult<EntryOut>;
    fn mkdir(&self, parent: Ino, name: &str, mode: u32) -> OpResult<EntryOut>;
    fn unlink(&self, parent: Ino, name: &str) -> OpResult<()>;
    fn rmdir(&self, parent: Ino, name: &str) -> OpResult<()>;
    fn symlink(&self, parent: Ino, name: &str, link: &str) -> OpResult<EntryOut>;
    fn rename(&self, old_parent: Ino, old_name: &str, new_parent: Ino, new_name: &str, flags: u32) -> OpResult<()>;
    fn link(&self, ino: Ino, new_parent: Ino, new_name: &str) -> OpResult<EntryOut>;
    fn open(&self, ino: Ino, flags: u32) -> OpResult<OpenOut>;
    fn read(&self, ino: Ino, fh: u64, offset: i64, size: u32) -> OpResult<Vec<u8>>;
    fn write(&self, ino: Ino, fh: u64, offset: i64, data: &[u8], flags: u32) -> OpResult<u32>;
    fn flush(&self, ino: Ino, fh: u64, lock_owner: u64) -> OpResult<()>;
    fn release(&self, ino: Ino, fh: u64, flags: u32, lock_owner: u64, flush: bool) -> OpResult<()>;
    fn fsync(&self, ino: Ino, fh: u64, datasync: bool) -> OpResult<()>;
    fn opendir(&self, ino: Ino, flags: u32) -> OpResult<OpenOut>;
    fn readdir(&self, ino: Ino, fh: u64, offset: i64) -> OpResult<Vec<DirEntry>>;
    fn releasedir(&self, ino: Ino, fh: u64, flags: u32) -> OpResult<()>;
    fn fsyncdir(&self, ino: Ino, fh: u64, datasync: bool) -> OpResult<()>;
    fn setxattr(&self, ino: Ino, name: &str, value: &[u8], flags: u32) -> OpResult<()>;
    fn getxattr(&self, ino: Ino, name: &str, size: u32) -> OpResult<Vec<u8>>;
    fn listxattr(&self, ino: Ino, size: u32) -> OpResult<Vec<u8>>;
    fn removexattr(&self, ino: Ino, name: &str) -> OpResult<()>;
    fn statfs(&self, ino: Ino) -> OpResult<StatfsData>;
    fn access(&self, ino: Ino, mask: u32) -> OpResult<()>;
    fn create(&self, parent: Ino, name: &str, mode: u32, flags: u32) -> OpResult<(EntryOut, OpenOut)>;
    fn getlk(&self, ino: Ino, fh: u64, owner: u64, lock: FileLock) -> OpResult<FileLock>;
    fn setlk(&self, ino: Ino, fh: u64, owner: u64, lock: FileLock, sleep: bool) -> OpResult<()>;
    fn bmap(&self, ino: Ino, blocksize: u32, idx: u64) -> OpResult<u64>;
    fn ioctl(&self, ino: Ino, fh: u64, cmd: u32, arg: u64, flags: u32) -> OpResult<u64>;
    fn poll(&self, ino: Ino, fh: u64, kh: u64) -> OpResult<u32>;
    fn flock(&self, ino: Ino, fh: u64, lock_owner: u64, operation: i32) -> OpResult<()>;
    fn fallocate(&self, ino: Ino, fh: u64, offset: i64, length: i64, mode: i32) -> OpResult<()>;
    fn copy_file_range(
        &self,
        ino_in: Ino,
        fh_in: u64,
        offset_in: i64,
        ino_out: Ino,
        fh_out: u64,
        offset_out: i64,
        len: u64,
        flags: u32,
    ) -> OpResult<u64>;
    fn lseek(&self, ino: Ino, fh: u64, offset: i64, whence: i32) -> OpResult<i64>;

    /// Called once, before any other operation, with the FUSE root inode
    /// number (always [`FUSE_ROOT_ID`]).
    fn init(&self) {
        let _ = FUSE_ROOT_ID;
    }

    fn destroy(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileLock {
    pub start: u64,
    pub end: u64,
    pub lock_type: u32,
    pub pid: u32,
}

pub(crate) fn duration_since_epoch(t: SystemTime) -> std::time::Duration {
    t.duration_since(std::time::UNIX_EPOCH).unwrap_or_default()
}
