//! Wire types shared between a Finesse client (the shared library that
//! intercepts libc entry points — out of scope here, see spec.md §1) and
//! the Finesse-aware FUSE server that embeds the `finesse` crate.
//!
//! Every type in this crate is `#[repr(C)]` plain data: no methods that
//! allocate, no I/O. The `finesse` crate builds the communication and
//! dispatch logic on top of these layouts.

pub mod attr;
pub mod codec;
pub mod fuse_protocol;
pub mod message;
pub mod native_protocol;
pub mod region;
pub mod stats;
pub mod wire;

pub use attr::{FileAttr, FileType, SetAttrInput};
pub use codec::{Handle, ROOT_HANDLE};
pub use message::{Message, MessageClass, MessageType};
pub use region::{RegionHeader, Slot, FINESSE_SIGNATURE, SHM_MESSAGE_COUNT, SHM_PAGE_SIZE};
pub use stats::CallStats;
pub use wire::{ConfirmationRecord, RegistrationRecord};

/// Current fixed protocol version. SPEC_FULL.md/spec.md explicitly scope
/// out version negotiation: a client and server simply refuse to talk if
/// this constant doesn't match.
pub const FINESSE_MESSAGE_VERSION: u32 = 1;

/// `fuse_ino_t` equivalent: the inode number space of the embedded FUSE
/// filesystem.
pub type Ino = u64;

/// The reserved root inode number, matching the FUSE convention.
pub const FUSE_ROOT_ID: Ino = 1;
