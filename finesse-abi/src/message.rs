//! The in-slot message layout (SPEC_FULL.md §4.C / spec.md §3 "Message
//! slot"). Every field is little-endian (true for any `u32`/`u64`/`i32` on
//! the architectures Finesse targets) and naturally aligned; no
//! length-prefixed variable-size field lives inside a slot, per spec.md §6.

use crate::stats::CallStats;
use crate::FINESSE_MESSAGE_VERSION;

/// `message_type` values. Kept as a thin enum with explicit `u32`
/// conversions rather than a `#[repr(u32)]` enum placed directly in the
/// shared struct, so that a corrupted or stale peer's garbage value is a
/// recoverable [`None`] rather than undefined behavior from transmuting an
/// invalid discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
}

impl MessageType {
    pub const fn as_u32(self) -> u32 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
        }
    }

    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Response),
            _ => None,
        }
    }
}

/// `message_class` values: whether the body is a FUSE-shaped request or a
/// native Finesse-specific one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Fuse,
    Native,
}

impl MessageClass {
    pub const fn as_u32(self) -> u32 {
        match self {
            MessageClass::Fuse => 0,
            MessageClass::Native => 1,
        }
    }

    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(MessageClass::Fuse),
            1 => Some(MessageClass::Native),
            _ => None,
        }
    }
}

/// Envelope is padded to this size so the payload begins on a cache line.
pub const MESSAGE_ENVELOPE_SIZE: usize = 64;

/// Remaining slot space available for a class-tagged request/response
/// body after the envelope and embedded statistics block.
pub const PAYLOAD_SIZE: usize =
    crate::region::SHM_PAGE_SIZE - MESSAGE_ENVELOPE_SIZE - std::mem::size_of::<CallStats>();

/// One message slot's full contents: envelope + embedded statistics +
/// opaque class-tagged payload bytes. `encode`/`decode` helpers in
/// [`crate::fuse_protocol`] and [`crate::native_protocol`] serialize the
/// ergonomic Rust request/response types into and out of `payload`.
#[repr(C)]
pub struct Message {
    message_type: u32,
    result: i32,
    request_id: u64,
    version: u32,
    message_class: u32,
    _envelope_pad: [u8; MESSAGE_ENVELOPE_SIZE - 24],
    pub stats: CallStats,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Message {
    /// Reset this slot to a freshly allocated request envelope. Called
    /// only by [`crate::region`]'s allocator (SPEC_FULL.md §4.A): "stamp
    /// the message envelope... record the start timestamp".
    pub fn init_request(&mut self, class: MessageClass) {
        self.message_type = MessageType::Request.as_u32();
        self.result = libc::ENOSYS;
        self.version = FINESSE_MESSAGE_VERSION;
        self.message_class = class.as_u32();
        self.request_id = 0;
        self.stats = CallStats::default();
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u32(self.message_type)
    }

    pub fn set_message_type(&mut self, t: MessageType) {
        self.message_type = t.as_u32();
    }

    pub fn message_class(&self) -> Option<MessageClass> {
        MessageClass::from_u32(self.message_class)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn result(&self) -> i32 {
        self.result
    }

    pub fn set_result(&mut self, result: i32) {
        self.result = result;
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn set_request_id(&mut self, id: u64) {
        self.request_id = id;
    }
}

const _: () = assert!(std::mem::size_of::<Message>() <= crate::region::SHM_PAGE_SIZE);
