//! Server FUSE adapter (spec.md §4.H). Translates a FUSE-class protocol
//! request into a synchronous call against the embedded operation vector
//! ([`crate::lowlevel::FuseLowLevelOps`]) and translates the result back
//! into a protocol response.
//!
//! The source models a request's provenance (kernel-owned vs.
//! Finesse-owned) with a bit smuggled into the kernel's own request
//! structure, then routes the reply accordingly (spec.md §4.H, §9).
//! [`RequestOrigin`] is that tag, kept as a real enum rather than a bit.
//! There is no kernel-facing FUSE session in this crate (spec.md §1 scopes
//! the embedded filesystem's own mount machinery out, and the retrieval
//! pack never carried the upstream session/channel/reply plumbing a real
//! one would need), so `RequestOrigin::Kernel` has no original FUSE reply
//! machinery to forward to; [`execute`] reports that path as unsupported
//! rather than inventing one.
//!
//! Request completion (spec.md §9: "replace with a one-shot completion
//! primitive... no mutex needed once the primitive is one-shot") is a
//! `sync_channel` of capacity one. Every embedded operation here is a
//! direct synchronous call rather than a real asynchronous kernel
//! round-trip, so the channel is satisfied on the same thread that made
//! the call; the shape is kept anyway because it is the structure a real
//! kernel-backed embedding would need and it keeps the dispatcher's view
//! of "call out, then block for completion" uniform regardless of origin.

use std::sync::mpsc::sync_channel;

use finesse_abi::codec::ROOT_HANDLE;
use finesse_abi::fuse_protocol::*;
use finesse_abi::{FileAttr as AbiFileAttr, Ino, FUSE_ROOT_ID};
use uuid::Uuid;

use crate::arena::SlotSegment;
use crate::error::{FinesseError, Result};
use crate::lowlevel::{EntryOut, FuseLowLevelOps};
use crate::object_table::ObjectTable;

/// Where a FUSE-class request originated (spec.md §9's provenance bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Arrived via `/dev/fuse`, destined for the kernel's own reply path.
    /// No such path exists in this embedding; see the module doc.
    Kernel,
    /// Arrived over a Finesse shared-memory slot; its reply returns to
    /// the dispatcher that is blocked waiting on it.
    Finesse,
}

/// The outcome of executing one FUSE-class request: the errno to write
/// into the response envelope's `result` field, the translated response
/// body, and — for replies too large for a slot (readdir/readdirplus) —
/// the auxiliary segment the caller must keep alive until the client has
/// consumed it (spec.md §4.B "per-client-slot on-demand segments").
pub struct FuseCompletion {
    pub errno: i32,
    pub response: FuseResponse,
    pub aux: Option<SlotSegment>,
}

impl FuseCompletion {
    fn ok(response: FuseResponse) -> Self {
        FuseCompletion { errno: 0, response, aux: None }
    }

    fn ok_with_aux(response: FuseResponse, aux: SlotSegment) -> Self {
        FuseCompletion { errno: 0, response, aux: Some(aux) }
    }

    fn fail(errno: i32) -> Self {
        FuseCompletion { errno, response: FuseResponse::Empty, aux: None }
    }
}

/// Executes `req` per its provenance (spec.md §4.H steps 1-6, collapsed
/// since the embedded operation vector is always called synchronously
/// here).
pub fn execute(ops: &dyn FuseLowLevelOps, table: &ObjectTable, origin: RequestOrigin, req: FuseRequest) -> FuseCompletion {
    match origin {
        RequestOrigin::Kernel => FuseCompletion::fail(libc::ENOTSUP),
        RequestOrigin::Finesse => {
            // Models the per-request completion object (spec.md §3, §9):
            // a one-shot channel carrying the reply.
            let (tx, rx) = sync_channel::<FuseCompletion>(1);
            let completion = dispatch(ops, table, req);
            let _ = tx.send(completion);
            rx.recv().expect("dispatch always sends exactly once")
        }
    }
}

/// Resolves a handle to an inode without minting a new object-table
/// reference: the caller only needs the inode to make one call, not a
/// reference that outlives this request (that is `NameMap`'s job, spec.md
/// §4.I). The root sentinel resolves directly, bypassing the table.
pub(crate) fn resolve_handle(table: &ObjectTable, handle: Uuid) -> Result<Ino> {
    if handle == ROOT_HANDLE {
        return Ok(FUSE_ROOT_ID);
    }
    let obj = table.lookup_by_uuid(handle).ok_or(FinesseError::InvalidHandle)?;
    table.release(obj.uuid);
    Ok(obj.inode)
}

/// Mints (or bumps the refcount of) the object-table entry for a
/// lookup/create-shaped result and builds the wire reply around it.
fn mint_entry(table: &ObjectTable, out: EntryOut) -> EntryReply {
    let obj = table.create(out.attr.ino, Uuid::new_v4());
    EntryReply {
        handle: obj.uuid,
        attr: AttrWire::from_attr(&out.attr),
        generation: out.generation,
        entry_valid_sec: out.entry_valid.as_secs(),
        attr_valid_sec: out.attr_valid.as_secs(),
    }
}

fn file_type_code(kind: finesse_abi::FileType) -> u32 {
    use finesse_abi::FileType::*;
    match kind {
        NamedPipe => 0,
        CharDevice => 1,
        BlockDevice => 2,
        Directory => 3,
        RegularFile => 4,
        Symlink => 5,
        Socket => 6,
    }
}

fn to_wire_lock(lock: &crate::lowlevel::FileLock) -> FileLock {
    FileLock { start: lock.start, end: lock.end, lock_type: lock.lock_type, pid: lock.pid }
}

fn from_wire_lock(lock: &FileLock) -> crate::lowlevel::FileLock {
    crate::lowlevel::FileLock { start: lock.start, end: lock.end, lock_type: lock.lock_type, pid: lock.pid }
}

/// Packs a directory listing into an auxiliary segment (spec.md §4.C:
/// "readdir/readdirplus results are almost always larger than a slot").
/// Entry format: `ino:u64, offset:i64, kind:u32, name_len:u32, name bytes`,
/// repeated `entries.len()` times.
pub(crate) fn encode_dir_entries(entries: &[crate::lowlevel::DirEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for e in entries {
        buf.extend_from_slice(&e.ino.to_le_bytes());
        buf.extend_from_slice(&e.offset.to_le_bytes());
        buf.extend_from_slice(&file_type_code(e.kind).to_le_bytes());
        let name = e.name.as_bytes();
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
        buf.extend_from_slice(name);
    }
    buf
}

fn dir_stream(entries: &[crate::lowlevel::DirEntry]) -> Result<(DirStreamReply, SlotSegment)> {
    let buf = encode_dir_entries(entries);
    let seg = SlotSegment::create(&buf)?;
    let aux_name = Name::new(&seg.name).map_err(|_| FinesseError::Overflow)?;
    Ok((DirStreamReply { aux_name, entry_count: entries.len() as u32 }, seg))
}

fn dispatch(ops: &dyn FuseLowLevelOps, table: &ObjectTable, req: FuseRequest) -> FuseCompletion {
    macro_rules! resolved {
        ($handle:expr) => {
            match resolve_handle(table, $handle) {
                Ok(ino) => ino,
                Err(e) => return FuseCompletion::fail(e.errno()),
            }
        };
    }

    match req {
        FuseRequest::Lookup(r) => {
            let parent = resolved!(r.parent);
            match ops.lookup(parent, r.name.as_str()) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Entry(mint_entry(table, out))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Forget(r) => {
            let ino = resolved!(r.target);
            ops.forget(ino, r.nlookup);
            FuseCompletion::ok(FuseResponse::Empty)
        }
        FuseRequest::ForgetMulti(r) => {
            for item in r.items {
                let ino = resolved!(item.target);
                ops.forget(ino, item.nlookup);
            }
            FuseCompletion::ok(FuseResponse::Empty)
        }
        FuseRequest::Getattr(r) => {
            let ino = resolved!(r.target);
            match ops.getattr(ino) {
                Ok(attr) => FuseCompletion::ok(FuseResponse::Attr(AttrWire::from_attr(&attr))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Setattr(r) => {
            let ino = resolved!(r.target);
            let input = r.to_input();
            match ops.setattr(ino, &input) {
                Ok(attr) => FuseCompletion::ok(FuseResponse::Attr(AttrWire::from_attr(&attr))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Readlink(r) => {
            let ino = resolved!(r.target);
            match ops.readlink(ino) {
                Ok(link) => match Name::new(&link) {
                    Ok(name) => FuseCompletion::ok(FuseResponse::Readlink(ReadlinkReply { link: name })),
                    Err(_) => FuseCompletion::fail(FinesseError::Overflow.errno()),
                },
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Mknod(r) => {
            let parent = resolved!(r.parent);
            match ops.mknod(parent, r.name.as_str(), r.mode, r.rdev) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Entry(mint_entry(table, out))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Mkdir(r) => {
            let parent = resolved!(r.parent);
            match ops.mkdir(parent, r.name.as_str(), r.mode) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Entry(mint_entry(table, out))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Unlink(r) => {
            let parent = resolved!(r.parent);
            match ops.unlink(parent, r.name.as_str()) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Rmdir(r) => {
            let parent = resolved!(r.parent);
            match ops.rmdir(parent, r.name.as_str()) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Symlink(r) => {
            let parent = resolved!(r.parent);
            match ops.symlink(parent, r.name.as_str(), r.link.as_str()) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Entry(mint_entry(table, out))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Rename(r) => {
            let old_parent = resolved!(r.old_parent);
            let new_parent = resolved!(r.new_parent);
            match ops.rename(old_parent, r.old_name.as_str(), new_parent, r.new_name.as_str(), r.flags) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Link(r) => {
            let ino = resolved!(r.target);
            let new_parent = resolved!(r.new_parent);
            match ops.link(ino, new_parent, r.new_name.as_str()) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Entry(mint_entry(table, out))),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Open(r) => {
            let ino = resolved!(r.target);
            match ops.open(ino, r.flags) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Open(OpenReply { fh: out.fh, flags: out.flags })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Read(r) => {
            let ino = resolved!(r.target);
            match ops.read(ino, r.fh, r.offset, r.size) {
                Ok(data) => match WriteData::new(&data) {
                    Ok(data) => FuseCompletion::ok(FuseResponse::Read(ReadReply { data })),
                    Err(_) => FuseCompletion::fail(FinesseError::Overflow.errno()),
                },
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Write(r) => {
            let ino = resolved!(r.target);
            match ops.write(ino, r.fh, r.offset, r.data.as_slice(), r.flags) {
                Ok(written) => FuseCompletion::ok(FuseResponse::Write(WriteReply { written })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Flush(r) => {
            let ino = resolved!(r.target);
            match ops.flush(ino, r.fh, r.lock_owner) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Release(r) => {
            let ino = resolved!(r.target);
            match ops.release(ino, r.fh, r.flags, r.lock_owner, r.flush) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Fsync(r) => {
            let ino = resolved!(r.target);
            match ops.fsync(ino, r.fh, r.datasync) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Opendir(r) => {
            let ino = resolved!(r.target);
            match ops.opendir(ino, r.flags) {
                Ok(out) => FuseCompletion::ok(FuseResponse::Open(OpenReply { fh: out.fh, flags: out.flags })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Readdir(r) => {
            let ino = resolved!(r.target);
            match ops.readdir(ino, r.fh, r.offset) {
                Ok(entries) => match dir_stream(&entries) {
                    Ok((reply, seg)) => FuseCompletion::ok_with_aux(FuseResponse::DirStream(reply), seg),
                    Err(e) => FuseCompletion::fail(e.errno()),
                },
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        // The embedded operation vector has no distinct readdirplus entry
        // point (spec.md §1 only consumes a low-level op vector; this
        // crate's trait mirrors the subset it needs), so readdirplus is
        // serviced identically to readdir.
        FuseRequest::Readdirplus(r) => {
            let ino = resolved!(r.target);
            match ops.readdir(ino, r.fh, r.offset) {
                Ok(entries) => match dir_stream(&entries) {
                    Ok((reply, seg)) => FuseCompletion::ok_with_aux(FuseResponse::DirStream(reply), seg),
                    Err(e) => FuseCompletion::fail(e.errno()),
                },
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Releasedir(r) => {
            let ino = resolved!(r.target);
            match ops.releasedir(ino, r.fh, r.flags) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Fsyncdir(r) => {
            let ino = resolved!(r.target);
            match ops.fsyncdir(ino, r.fh, r.datasync) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Setxattr(r) => {
            let ino = resolved!(r.target);
            match ops.setxattr(ino, r.name.as_str(), r.value.as_slice(), r.flags) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Getxattr(r) => {
            let ino = resolved!(r.target);
            match ops.getxattr(ino, r.name.as_str(), r.size) {
                Ok(data) if r.size == 0 => {
                    FuseCompletion::ok(FuseResponse::XattrSize(XattrSizeReply { size: data.len() as u32 }))
                }
                Ok(data) => match XattrValue::new(&data) {
                    Ok(data) => FuseCompletion::ok(FuseResponse::XattrData(XattrDataReply { data })),
                    Err(_) => FuseCompletion::fail(FinesseError::Overflow.errno()),
                },
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Listxattr(r) => {
            let ino = resolved!(r.target);
            match ops.listxattr(ino, r.size) {
                Ok(data) if r.size == 0 => {
                    FuseCompletion::ok(FuseResponse::XattrSize(XattrSizeReply { size: data.len() as u32 }))
                }
                Ok(data) => match XattrValue::new(&data) {
                    Ok(data) => FuseCompletion::ok(FuseResponse::XattrData(XattrDataReply { data })),
                    Err(_) => FuseCompletion::fail(FinesseError::Overflow.errno()),
                },
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Removexattr(r) => {
            let ino = resolved!(r.target);
            match ops.removexattr(ino, r.name.as_str()) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Statfs(r) => {
            let ino = resolved!(r.target);
            match ops.statfs(ino) {
                Ok(s) => FuseCompletion::ok(FuseResponse::Statfs(StatfsReply {
                    blocks: s.blocks,
                    bfree: s.bfree,
                    bavail: s.bavail,
                    files: s.files,
                    ffree: s.ffree,
                    bsize: s.bsize,
                    namelen: s.namelen,
                    frsize: s.frsize,
                })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Access(r) => {
            let ino = resolved!(r.target);
            match ops.access(ino, r.mask) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Create(r) => {
            let parent = resolved!(r.parent);
            match ops.create(parent, r.name.as_str(), r.mode, r.flags) {
                Ok((entry, open)) => FuseCompletion::ok(FuseResponse::Create(CreateReply {
                    entry: mint_entry(table, entry),
                    fh: open.fh,
                    flags: open.flags,
                })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Getlk(r) => {
            let ino = resolved!(r.target);
            match ops.getlk(ino, r.fh, r.owner, from_wire_lock(&r.lock)) {
                Ok(lock) => FuseCompletion::ok(FuseResponse::Lock(LockReply { lock: to_wire_lock(&lock) })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Setlk(r) => {
            let ino = resolved!(r.target);
            match ops.setlk(ino, r.fh, r.owner, from_wire_lock(&r.lock), r.sleep) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Bmap(r) => {
            let ino = resolved!(r.target);
            match ops.bmap(ino, r.blocksize, r.idx) {
                Ok(block) => FuseCompletion::ok(FuseResponse::Bmap(BmapReply { block })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Ioctl(r) => {
            let ino = resolved!(r.target);
            match ops.ioctl(ino, r.fh, r.cmd, r.arg, r.flags) {
                Ok(result) => FuseCompletion::ok(FuseResponse::Ioctl(IoctlReply { result })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Poll(r) => {
            let ino = resolved!(r.target);
            match ops.poll(ino, r.fh, r.kh) {
                Ok(revents) => FuseCompletion::ok(FuseResponse::Poll(PollReply { revents })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Flock(r) => {
            let ino = resolved!(r.target);
            match ops.flock(ino, r.fh, r.lock_owner, r.operation) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Fallocate(r) => {
            let ino = resolved!(r.target);
            match ops.fallocate(ino, r.fh, r.offset, r.length, r.mode) {
                Ok(()) => FuseCompletion::ok(FuseResponse::Empty),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::CopyFileRange(r) => {
            let ino_in = resolved!(r.target_in);
            let ino_out = resolved!(r.target_out);
            match ops.copy_file_range(ino_in, r.fh_in, r.offset_in, ino_out, r.fh_out, r.offset_out, r.len, r.flags) {
                Ok(copied) => FuseCompletion::ok(FuseResponse::CopyFileRange(CopyFileRangeReply { copied })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::Lseek(r) => {
            let ino = resolved!(r.target);
            match ops.lseek(ino, r.fh, r.offset, r.whence) {
                Ok(offset) => FuseCompletion::ok(FuseResponse::Lseek(LseekReply { offset })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        // WriteBuf/RetrieveReply mirror the kernel's zero-copy splice path
        // (spec.md §4.C lists them among the FUSE-class operations); this
        // embedding has no splice buffer to hand back, so they degrade to
        // a plain write/no-op respectively.
        FuseRequest::WriteBuf(r) => {
            let ino = resolved!(r.target);
            match ops.write(ino, r.fh, r.offset, r.data.as_slice(), 0) {
                Ok(written) => FuseCompletion::ok(FuseResponse::Write(WriteReply { written })),
                Err(errno) => FuseCompletion::fail(errno),
            }
        }
        FuseRequest::RetrieveReply(r) => {
            let _ = resolved!(r.target);
            FuseCompletion::ok(FuseResponse::Empty)
        }
    }
}

/// Used by the native `NameMap` handler (spec.md §4.I), which needs to
/// perform the same adapter lookup this module's `Lookup` arm does but
/// without going through the full FUSE-class request/response shapes.
pub fn lookup_for_name_map(ops: &dyn FuseLowLevelOps, parent: Ino, name: &str) -> std::result::Result<AbiFileAttr, i32> {
    ops.lookup(parent, name).map(|out| out.attr)
}
