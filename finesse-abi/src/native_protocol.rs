//! Native, Finesse-specific calls (spec.md §2 item 3, §4.C): these have no
//! FUSE low-level counterpart and exist purely to support the client-side
//! shim (out of scope here) and diagnostics.

use crate::codec::{wire_struct, FixedName, Handle, WireCodec};
use std::io;

pub const NATIVE_NAME_CAP: usize = 512;
pub type NativeName = FixedName<NATIVE_NAME_CAP>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NativeOp {
    Test = 0,
    ServerStat = 1,
    NameMap = 2,
    NameMapRelease = 3,
    DirectoryMap = 4,
    DirectoryMapRelease = 5,
}

pub const NATIVE_OP_NAMES: [&str; 6] = [
    "test",
    "server stat",
    "name map",
    "name map release",
    "directory map",
    "directory map release",
];

const _: () = assert!(NATIVE_OP_NAMES.len() == 6);

impl NativeOp {
    pub fn name(self) -> &'static str {
        NATIVE_OP_NAMES[self as usize]
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        use NativeOp::*;
        const ALL: [NativeOp; 6] = [Test, ServerStat, NameMap, NameMapRelease, DirectoryMap, DirectoryMapRelease];
        ALL.get(v as usize).copied()
    }
}

/// Round-trip liveness probe (spec.md §4.C: "Test... confirms the channel
/// is alive end to end"). The request carries an arbitrary token the
/// response echoes back unchanged.
wire_struct! {
    pub struct TestRequest { pub token: u64 }
}
wire_struct! {
    pub struct TestReply { pub token: u64 }
}

/// Asks the server to report the aggregate counters it has been
/// accumulating (spec.md §4.K). The reply is a fixed summary, not a raw
/// dump — full detail is written to the CSV file at shutdown instead.
wire_struct! {
    pub struct ServerStatRequest { pub reset: bool }
}
wire_struct! {
    pub struct ServerStatReply {
        pub total_calls: u64,
        pub total_errors: u64,
        pub clients_connected: u32,
        pub regions_active: u32,
    }
}

/// Resolve a path (relative to a parent handle, or absolute when `parent`
/// is [`crate::codec::ROOT_HANDLE`]) to a handle, short-circuiting the
/// client's own per-call path walk (spec.md §4.J "name map").
wire_struct! {
    pub struct NameMapRequest { pub parent: Handle, pub path: NativeName }
}
wire_struct! {
    pub struct NameMapReply { pub result_handle: Handle, pub ino: u64 }
}

/// Drop the server-side reference a prior `NameMap` took out (spec.md §4.J:
/// "every successful NameMap must be balanced by a NameMapRelease").
wire_struct! {
    pub struct NameMapReleaseRequest { pub target: Handle }
}
wire_struct! {
    pub struct NameMapReleaseReply { pub was_live: bool }
}

/// [SUPPLEMENT] Materialize a directory's contents into an auxiliary
/// shared-memory arena addressed by handle, for a client doing its own
/// directory caching rather than calling through `readdir` per entry
/// (named in spec.md §4.C/§2 but not given an operational shape there;
/// SPEC_FULL.md §4.I backfills it from the original directory-map path).
wire_struct! {
    pub struct DirectoryMapRequest { pub target: Handle }
}
wire_struct! {
    pub struct DirectoryMapReply { pub aux_name: NativeName, pub entry_count: u32, pub generation: u64 }
}

/// Release a directory map obtained via `DirectoryMap` and let its
/// auxiliary arena be reclaimed once every client handle on it is gone.
wire_struct! {
    pub struct DirectoryMapReleaseRequest { pub target: Handle, pub generation: u64 }
}
wire_struct! {
    pub struct DirectoryMapReleaseReply { pub was_live: bool }
}

#[derive(Debug, Clone)]
pub enum NativeRequest {
    Test(TestRequest),
    ServerStat(ServerStatRequest),
    NameMap(NameMapRequest),
    NameMapRelease(NameMapReleaseRequest),
    DirectoryMap(DirectoryMapRequest),
    DirectoryMapRelease(DirectoryMapReleaseRequest),
}

impl NativeRequest {
    pub fn op(&self) -> NativeOp {
        match self {
            NativeRequest::Test(_) => NativeOp::Test,
            NativeRequest::ServerStat(_) => NativeOp::ServerStat,
            NativeRequest::NameMap(_) => NativeOp::NameMap,
            NativeRequest::NameMapRelease(_) => NativeOp::NameMapRelease,
            NativeRequest::DirectoryMap(_) => NativeOp::DirectoryMap,
            NativeRequest::DirectoryMapRelease(_) => NativeOp::DirectoryMapRelease,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NativeRequest::Test(r) => r.encode(buf),
            NativeRequest::ServerStat(r) => r.encode(buf),
            NativeRequest::NameMap(r) => r.encode(buf),
            NativeRequest::NameMapRelease(r) => r.encode(buf),
            NativeRequest::DirectoryMap(r) => r.encode(buf),
            NativeRequest::DirectoryMapRelease(r) => r.encode(buf),
        }
    }

    pub fn decode(op: NativeOp, buf: &[u8]) -> io::Result<Self> {
        Ok(match op {
            NativeOp::Test => NativeRequest::Test(TestRequest::decode(buf)?),
            NativeOp::ServerStat => NativeRequest::ServerStat(ServerStatRequest::decode(buf)?),
            NativeOp::NameMap => NativeRequest::NameMap(NameMapRequest::decode(buf)?),
            NativeOp::NameMapRelease => NativeRequest::NameMapRelease(NameMapReleaseRequest::decode(buf)?),
            NativeOp::DirectoryMap => NativeRequest::DirectoryMap(DirectoryMapRequest::decode(buf)?),
            NativeOp::DirectoryMapRelease => {
                NativeRequest::DirectoryMapRelease(DirectoryMapReleaseRequest::decode(buf)?)
            }
        })
    }
}

#[derive(Debug, Clone)]
pub enum NativeResponse {
    Test(TestReply),
    ServerStat(ServerStatReply),
    NameMap(NameMapReply),
    NameMapRelease(NameMapReleaseReply),
    DirectoryMap(DirectoryMapReply),
    DirectoryMapRelease(DirectoryMapReleaseReply),
}

impl NativeResponse {
    pub fn encode(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NativeResponse::Test(r) => r.encode(buf),
            NativeResponse::ServerStat(r) => r.encode(buf),
            NativeResponse::NameMap(r) => r.encode(buf),
            NativeResponse::NameMapRelease(r) => r.encode(buf),
            NativeResponse::DirectoryMap(r) => r.encode(buf),
            NativeResponse::DirectoryMapRelease(r) => r.encode(buf),
        }
    }
}

const _: () = assert!(std::mem::size_of::<NameMapRequest>() < crate::message::PAYLOAD_SIZE);
const _: () = assert!(std::mem::size_of::<DirectoryMapReply>() < crate::message::PAYLOAD_SIZE);
