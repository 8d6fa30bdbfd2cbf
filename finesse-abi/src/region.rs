//! Shared-memory region layout (spec.md §3 "Shared-memory region",
//! SPEC_FULL.md §4.A). One region exists per connected client. This module
//! only describes the byte layout; the allocation/signalling logic lives
//! in the `finesse` crate's `region` module, which operates on a mapped
//! `&RegionLayout`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};

use finesse_sys::{ShmCondvar, ShmMutex};
use uuid::Uuid;

use crate::message::Message;

/// One system page. Each slot occupies exactly this many bytes
/// (spec.md §3: "N message slots, each exactly one page").
pub const SHM_PAGE_SIZE: usize = 4096;

/// Fixed slot count. The allocation/request-ready/response-ready bitmaps
/// are each a single `u64`, so this can never change without widening
/// those bitmaps (spec.md §3, §9 "keep this exactly").
pub const SHM_MESSAGE_COUNT: usize = 64;

/// First 16 bytes of every region header; MUST compare equal on both
/// sides before either party trusts the mapping (spec.md §6).
pub const FINESSE_SIGNATURE: [u8; 16] = *b"FinesseShMemV1\0\0";

/// Request id 0 is reserved to mean "invalid" (spec.md §3).
pub const INVALID_REQUEST_ID: u64 = 0;

/// Fixed-size header preceding the slot array. Bitmaps are atomics so the
/// allocator can use lock-free compare-and-swap (spec.md §4.A, §9); the
/// mutex/condvar pairs guard only the *ready* transitions, never the
/// allocation bitmap itself.
#[repr(C)]
pub struct RegionHeader {
    pub signature: [u8; 16],
    pub server_id: Uuid,
    pub client_id: Uuid,
    pub region_size: u64,

    pub allocation_bitmap: AtomicU64,
    pub request_ready_bitmap: AtomicU64,
    pub response_ready_bitmap: AtomicU64,

    pub request_id_counter: AtomicU64,
    pub last_buffer_allocated: AtomicU32,
    pub request_waiters: AtomicU32,
    pub shutdown_requested: AtomicBool,
    _pad0: [u8; 7],

    pub request_mutex: ShmMutex,
    pub request_condvar: ShmCondvar,
    pub response_mutex: ShmMutex,
    pub response_condvar: ShmCondvar,
}

/// One message slot. Exactly one page; see [`crate::message::Message`].
pub type Slot = Message;

/// The full mapped region: header immediately followed by
/// [`SHM_MESSAGE_COUNT`] slots (spec.md §3/§6). Slots are wrapped in
/// `UnsafeCell` rather than accessed through raw pointer casts: `UnsafeCell<T>`
/// is guaranteed to share `T`'s layout, so the wire shape is unaffected, and
/// the interior mutability every slot needs (the allocator hands out
/// `&RegionLayout`, never `&mut`, because the mapping is genuinely shared
/// across processes) is spelled out rather than implied.
#[repr(C)]
pub struct RegionLayout {
    pub header: RegionHeader,
    slots: [UnsafeCell<Slot>; SHM_MESSAGE_COUNT],
}

// SAFETY: every field reachable from a shared `&RegionLayout` is either an
// atomic, a `ShmMutex`/`ShmCondvar` (themselves `unsafe impl Sync`), or a
// `Slot` guarded by the allocation bitmap's CAS protocol: a thread only
// calls `slot_mut` on an index it has exclusively claimed.
unsafe impl Sync for RegionLayout {}

const _: () = assert!(std::mem::size_of::<Slot>() == SHM_PAGE_SIZE);

impl RegionLayout {
    pub const fn total_size() -> usize {
        std::mem::size_of::<RegionHeader>() + SHM_MESSAGE_COUNT * SHM_PAGE_SIZE
    }

    pub fn slot(&self, i: usize) -> &Slot {
        unsafe { &*self.slots[i].get() }
    }

    /// # Safety
    /// The caller must hold exclusive logical ownership of slot `i` (e.g.
    /// have just won the allocation-bitmap CAS for it, or be the single
    /// side permitted to write it in the current protocol phase).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, i: usize) -> &mut Slot {
        &mut *self.slots[i].get()
    }
}
