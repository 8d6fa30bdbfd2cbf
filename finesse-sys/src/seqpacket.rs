//! UNIX-domain `SOCK_SEQPACKET` helpers for the registration transport
//! (SPEC_FULL.md §4.D). Registration is small and rare compared to the
//! shared-memory fast path, so this is a thin synchronous wrapper over
//! `nix` rather than anything async.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use nix::sys::socket::{
    self, AddressFamily, Backlog, SockFlag, SockType, UnixAddr,
};

/// Create, bind and start listening on a seqpacket socket at `path`.
///
/// Per SPEC_FULL.md §4.D, a stale socket file left by a previous instance
/// is detected by attempting to connect to it; on connect failure the path
/// is unlinked and replaced. Callers should invoke
/// [`remove_stale`] before this.
pub fn listen(path: &Path, backlog: i32) -> io::Result<OwnedFd> {
    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::empty(),
        None,
    )
    .map_err(nix_to_io)?;
    let addr = UnixAddr::new(path).map_err(nix_to_io)?;
    socket::bind(fd.as_raw_fd(), &addr).map_err(nix_to_io)?;
    let backlog = Backlog::new(backlog).map_err(nix_to_io)?;
    socket::listen(&fd, backlog).map_err(nix_to_io)?;
    Ok(fd)
}

/// Accept one pending connection.
pub fn accept(listener: &OwnedFd) -> io::Result<OwnedFd> {
    let fd = socket::accept(listener.as_raw_fd()).map_err(nix_to_io)?;
    // SAFETY: accept() on a valid fd returns a valid, uniquely owned fd.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Connect to a server's registration socket.
pub fn connect(path: &Path) -> io::Result<OwnedFd> {
    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::empty(),
        None,
    )
    .map_err(nix_to_io)?;
    let addr = UnixAddr::new(path).map_err(nix_to_io)?;
    socket::connect(fd.as_raw_fd(), &addr).map_err(nix_to_io)?;
    Ok(fd)
}

/// Send exactly one seqpacket datagram. Returns the number of bytes sent,
/// which on a correctly connected `SOCK_SEQPACKET` socket is always
/// `buf.len()` or an error.
pub fn send(fd: &OwnedFd, buf: &[u8]) -> io::Result<usize> {
    socket::send(fd.as_raw_fd(), buf, socket::MsgFlags::empty()).map_err(nix_to_io)
}

/// Receive exactly one seqpacket datagram. Returns `Ok(0)` on
/// end-of-stream (the peer closed its end), matching SPEC_FULL.md §4.D's
/// disconnect-detection contract.
pub fn recv(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    socket::recv(fd.as_raw_fd(), buf, socket::MsgFlags::empty()).map_err(nix_to_io)
}

/// Probe whether a socket path is live by attempting to connect to it.
/// Returns `true` if some process is listening, `false` if the path is
/// absent or stale (connect refused/timed out).
pub fn is_live(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    connect(path).is_ok()
}

/// Remove a stale socket file, if present and not live. No-op if nothing
/// is there.
pub fn remove_stale(path: &Path) -> io::Result<()> {
    if path.exists() && !is_live(path) {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
