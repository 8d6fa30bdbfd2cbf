//! POSIX shared-memory object creation/open/unlink helpers.
//!
//! These back both the per-client request-channel region (SPEC_FULL.md
//! §4.A) and the on-demand auxiliary arenas (§4.B). Mapping the resulting
//! file descriptor into the process's address space is left to the caller
//! (the `finesse` crate uses `memmap2` for that, since it is already
//! memory-safe and there is no reason to hand-roll `mmap`).

use std::ffi::CString;
use std::io;
use std::os::fd::OwnedFd;

use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

/// Create a new shared-memory object, failing if one already exists with
/// this name. SPEC_FULL.md §4.D requires the client to create its region
/// with read-write, exclusive-create semantics.
pub fn create_exclusive(name: &str, size: u64) -> io::Result<OwnedFd> {
    let cname = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let fd = shm_open(
        cname.as_c_str(),
        OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )
    .map_err(nix_to_io)?;
    ftruncate(&fd, size as i64).map_err(nix_to_io)?;
    Ok(fd)
}

/// Open an existing shared-memory object by name, read-write.
pub fn open_existing(name: &str) -> io::Result<OwnedFd> {
    let cname = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    shm_open(cname.as_c_str(), OFlag::O_RDWR, Mode::empty()).map_err(nix_to_io)
}

/// Unlink a shared-memory object's name from the filesystem namespace. The
/// backing storage persists until every open file descriptor referencing
/// it is closed (SPEC_FULL.md §4.D: "it persists until both parties close
/// their file descriptors").
pub fn unlink(name: &str) -> io::Result<()> {
    let cname = CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    shm_unlink(cname.as_c_str()).map_err(nix_to_io)
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
