//! A minimal synchronous Finesse client, sufficient to drive the protocol
//! end to end in tests and the demo binary. The real client-side
//! interception shims (one per intercepted libc entry point) are out of
//! scope here (spec.md §1); this is the small test harness spec.md §8's
//! scenarios are written against.

use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::Duration;

use uuid::Uuid;

use finesse_abi::codec::WireCodec;
use finesse_abi::fuse_protocol::{FuseOp, FuseRequest, FuseResponse};
use finesse_abi::native_protocol::{NativeOp, NativeRequest, NativeResponse};
use finesse_abi::wire::{ConfirmationRecord, DeregistrationRecord, RegistrationRecord};
use finesse_abi::{MessageClass, FINESSE_MESSAGE_VERSION};

use crate::error::{FinesseError, Result};
use crate::region::{self, MappedRegion};

/// A connected client's handle on one server (spec.md §4.D/§4.A). Dropping
/// it sends a [`DeregistrationRecord`] and unmaps the region.
pub struct FinesseClient {
    socket: OwnedFd,
    region: MappedRegion,
    client_id: Uuid,
}

impl FinesseClient {
    /// Performs the full registration handshake against a server already
    /// listening at `socket_path`: connect, send a [`RegistrationRecord`]
    /// naming a freshly created shared-memory segment, and map the region
    /// the server confirms.
    pub fn connect(socket_path: &Path, region_size: u64) -> Result<Self> {
        let socket = finesse_sys::seqpacket::connect(socket_path)?;
        let client_id = Uuid::new_v4();
        let shm_name = format!("finesse-client-{}", client_id.simple());

        let record = RegistrationRecord {
            client_id,
            shm_name: finesse_abi::wire::ShmName::new(&shm_name).map_err(|_| FinesseError::Overflow)?,
            requested_region_size: region_size,
        };
        let mut buf = vec![0u8; 512];
        let n = record.encode(&mut buf)?;
        finesse_sys::seqpacket::send(&socket, &buf[..n])?;

        let mut reply_buf = vec![0u8; 512];
        let n = finesse_sys::seqpacket::recv(&socket, &mut reply_buf)?;
        if n == 0 {
            return Err(FinesseError::NotConnected);
        }
        let confirmation = ConfirmationRecord::decode(&reply_buf[..n])?;
        if confirmation.result != 0 {
            return Err(FinesseError::Backend(confirmation.result));
        }

        let fd = finesse_sys::shm::open_existing(confirmation.shm_name.as_str())?;
        let region = MappedRegion::map(fd)?;

        Ok(FinesseClient { socket, region, client_id })
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Sends a FUSE-class request through the shared-memory channel and
    /// blocks for the response (spec.md §4.A full round trip:
    /// AllocateRequestBuffer, RequestReady, GetResponse).
    pub fn call_fuse(&self, req: FuseRequest) -> Result<(i32, FuseResponse)> {
        let region = self.region.layout();
        let op = req.op();
        let idx = region::allocate_request_buffer(region, MessageClass::Fuse, op as u8)?;
        {
            let slot = unsafe { region.slot_mut(idx) };
            let n = req.encode(&mut slot.payload)?;
            let _ = n;
        }
        region::request_ready(region, idx);
        region::get_response(region, idx, true)?;
        let result = region.slot(idx).result();
        let response = decode_fuse_response(op, &region.slot(idx).payload)?;
        region::release_request_buffer(region, idx)?;
        Ok((result, response))
    }

    /// Sends a native-class request (spec.md §4.C) through the same
    /// channel.
    pub fn call_native(&self, req: NativeRequest) -> Result<(i32, NativeResponse)> {
        let region = self.region.layout();
        let op = req.op();
        let idx = region::allocate_request_buffer(region, MessageClass::Native, op as u8)?;
        {
            let slot = unsafe { region.slot_mut(idx) };
            req.encode(&mut slot.payload)?;
        }
        region::request_ready(region, idx);
        region::get_response(region, idx, true)?;
        let result = region.slot(idx).result();
        let response = decode_native_response(op, &region.slot(idx).payload)?;
        region::release_request_buffer(region, idx)?;
        Ok((result, response))
    }

    /// Round-trip liveness probe (spec.md §4.C "Test").
    pub fn ping(&self, token: u64) -> Result<u64> {
        let (errno, resp) = self.call_native(NativeRequest::Test(finesse_abi::native_protocol::TestRequest { token }))?;
        if errno != 0 {
            return Err(FinesseError::Backend(errno));
        }
        match resp {
            NativeResponse::Test(r) => Ok(r.token),
            _ => Err(FinesseError::InvalidArgument),
        }
    }

    /// Blocks up to `timeout` waiting for the registration socket to
    /// become connectable, useful in tests that race server startup.
    pub fn wait_until_live(socket_path: &Path, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if finesse_sys::seqpacket::is_live(socket_path) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl Drop for FinesseClient {
    fn drop(&mut self) {
        let record = DeregistrationRecord { client_id: self.client_id };
        let mut buf = [0u8; 64];
        if let Ok(n) = record.encode(&mut buf) {
            let _ = finesse_sys::seqpacket::send(&self.socket, &buf[..n]);
        }
    }
}

/// A reply's shape can't be derived from the request alone — e.g. `Open`
/// and `Opendir` share a request shape but this client never needs to
/// distinguish them since the server always knows which it sent; for a
/// test client it is enough to decode against the op that was sent.
fn decode_fuse_response(op: FuseOp, buf: &[u8]) -> Result<FuseResponse> {
    use finesse_abi::fuse_protocol::*;
    Ok(match op {
        FuseOp::Lookup | FuseOp::Mknod | FuseOp::Mkdir | FuseOp::Symlink | FuseOp::Link => {
            FuseResponse::Entry(EntryReply::decode(buf)?)
        }
        FuseOp::Create => FuseResponse::Create(CreateReply::decode(buf)?),
        FuseOp::Getattr | FuseOp::Setattr => FuseResponse::Attr(AttrWire::decode(buf)?),
        FuseOp::Readlink => FuseResponse::Readlink(ReadlinkReply::decode(buf)?),
        FuseOp::Open | FuseOp::Opendir => FuseResponse::Open(OpenReply::decode(buf)?),
        FuseOp::Read => FuseResponse::Read(ReadReply::decode(buf)?),
        FuseOp::Write | FuseOp::WriteBuf => FuseResponse::Write(WriteReply::decode(buf)?),
        FuseOp::Readdir | FuseOp::Readdirplus => FuseResponse::DirStream(DirStreamReply::decode(buf)?),
        FuseOp::Statfs => FuseResponse::Statfs(StatfsReply::decode(buf)?),
        FuseOp::Getlk => FuseResponse::Lock(LockReply::decode(buf)?),
        FuseOp::Bmap => FuseResponse::Bmap(BmapReply::decode(buf)?),
        FuseOp::Ioctl => FuseResponse::Ioctl(IoctlReply::decode(buf)?),
        FuseOp::Poll => FuseResponse::Poll(PollReply::decode(buf)?),
        FuseOp::CopyFileRange => FuseResponse::CopyFileRange(CopyFileRangeReply::decode(buf)?),
        FuseOp::Lseek => FuseResponse::Lseek(LseekReply::decode(buf)?),
        FuseOp::Getxattr | FuseOp::Listxattr => {
            // Ambiguous without echoing the request size back; a real
            // client already knows which variant it asked for from its
            // own call site, so this test client only supports the
            // zero-size ("size probe") shape here.
            FuseResponse::XattrSize(XattrSizeReply::decode(buf)?)
        }
        _ => FuseResponse::Empty,
    })
}

fn decode_native_response(op: NativeOp, buf: &[u8]) -> Result<NativeResponse> {
    use finesse_abi::native_protocol::*;
    Ok(match op {
        NativeOp::Test => NativeResponse::Test(TestReply::decode(buf)?),
        NativeOp::ServerStat => NativeResponse::ServerStat(ServerStatReply::decode(buf)?),
        NativeOp::NameMap => NativeResponse::NameMap(NameMapReply::decode(buf)?),
        NativeOp::NameMapRelease => NativeResponse::NameMapRelease(NameMapReleaseReply::decode(buf)?),
        NativeOp::DirectoryMap => NativeResponse::DirectoryMap(DirectoryMapReply::decode(buf)?),
        NativeOp::DirectoryMapRelease => NativeResponse::DirectoryMapRelease(DirectoryMapReleaseReply::decode(buf)?),
    })
}
