//! Auxiliary shared-memory arenas (spec.md §4.B). Two distinct mechanisms
//! share this module:
//!
//! - [`Arena`]: an independently managed slab of uniformly sized buffers,
//!   backed by its own memory-mapped anonymous segment, allocated/freed
//!   with the same bitmap-CAS discipline as [`crate::region`]. Grounded on
//!   `finesse/communications/buffer.c`'s `FincommCreateArena` /
//!   `FincommAllocateBuffer` / `FincommFreeBuffer`.
//! - [`SlotSegment`]: the simpler per-(client, slot) on-demand segment used
//!   for one oversized response, grounded on
//!   `finesse/communications/dirmap.c`'s lazy per-slot segment lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::{FinesseError, Result};

/// One-bitmap limit, matching the message slab (spec.md §4.B: "Maximum
/// buffer count is 64 (one-bitmap limit, matching the message slab)").
pub const ARENA_MAX_BUFFERS: usize = 64;

#[repr(C)]
struct ArenaHeader {
    signature: [u8; 8],
    buffer_size: u64,
    buffer_count: u32,
    _pad: u32,
    allocation_bitmap: AtomicU64,
    hint: AtomicU64,
}

const ARENA_SIGNATURE: [u8; 8] = *b"FinArena";

/// A named slab of `buffer_count` uniformly sized buffers, backed by an
/// anonymous `memmap2::MmapMut` (private to this process — arenas created
/// via this path are server-internal working storage, distinct from the
/// named POSIX shared-memory segments `SlotSegment` creates for a specific
/// client to open by name).
pub struct Arena {
    name: String,
    mmap: memmap2::MmapMut,
    buffer_size: usize,
    buffer_count: usize,
}

impl Arena {
    pub fn create(name: impl Into<String>, buffer_size: usize, buffer_count: usize) -> Result<Self> {
        if buffer_count == 0 || buffer_count > ARENA_MAX_BUFFERS {
            return Err(FinesseError::InvalidArgument);
        }
        let header_size = std::mem::size_of::<ArenaHeader>();
        let total = header_size + buffer_size * buffer_count;
        let mut mmap = memmap2::MmapMut::map_anon(total)?;
        // SAFETY: freshly mapped, exclusively owned memory; no aliasing.
        unsafe {
            let header = mmap.as_mut_ptr() as *mut ArenaHeader;
            (*header).signature = ARENA_SIGNATURE;
            (*header).buffer_size = buffer_size as u64;
            (*header).buffer_count = buffer_count as u32;
            (*header).allocation_bitmap = AtomicU64::new(0);
            (*header).hint = AtomicU64::new(0);
        }
        Ok(Arena {
            name: name.into(),
            mmap,
            buffer_size,
            buffer_count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn header(&self) -> &ArenaHeader {
        unsafe { &*(self.mmap.as_ptr() as *const ArenaHeader) }
    }

    fn buffer_offset(&self, idx: usize) -> usize {
        std::mem::size_of::<ArenaHeader>() + idx * self.buffer_size
    }

    /// Allocates one buffer; returns its index. Mirrors the CAS discipline
    /// of [`crate::region::allocate_request_buffer`].
    pub fn allocate(&self) -> Result<usize> {
        let header = self.header();
        let full_mask: u64 = if self.buffer_count == 64 { u64::MAX } else { (1u64 << self.buffer_count) - 1 };
        loop {
            let current = header.allocation_bitmap.load(Ordering::Acquire);
            if current & full_mask == full_mask {
                return Err(FinesseError::NoMemory);
            }
            let hint = header.hint.load(Ordering::Relaxed) as usize % self.buffer_count;
            let idx = (0..self.buffer_count)
                .map(|off| (hint + off) % self.buffer_count)
                .find(|&i| current & (1u64 << i) == 0)
                .ok_or(FinesseError::NoMemory)?;
            let mask = 1u64 << idx;
            if header
                .allocation_bitmap
                .compare_exchange_weak(current, current | mask, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                header.hint.store(idx as u64, Ordering::Relaxed);
                return Ok(idx);
            }
        }
    }

    pub fn free(&self, idx: usize) -> Result<()> {
        let mask = 1u64 << idx;
        let header = self.header();
        if header.allocation_bitmap.load(Ordering::Acquire) & mask == 0 {
            return Err(FinesseError::CorruptRegion(format!("free of unallocated arena buffer {idx}")));
        }
        header.allocation_bitmap.fetch_and(!mask, Ordering::AcqRel);
        Ok(())
    }

    pub fn buffer_mut(&mut self, idx: usize) -> &mut [u8] {
        let off = self.buffer_offset(idx);
        let size = self.buffer_size;
        &mut self.mmap[off..off + size]
    }

    pub fn buffer(&self, idx: usize) -> &[u8] {
        let off = self.buffer_offset(idx);
        &self.mmap[off..off + self.buffer_size]
    }
}

/// A lazily created, named POSIX shared-memory segment carrying exactly
/// one oversized response for one (client, slot) pair (spec.md §3
/// "Auxiliary buffer", §4.B "per-client-slot on-demand segments").
pub struct SlotSegment {
    pub name: String,
    mmap: memmap2::MmapMut,
}

impl SlotSegment {
    /// Creates a fresh POSIX shared-memory object named after a random
    /// UUID, sized to hold `payload`, and copies `payload` into it.
    pub fn create(payload: &[u8]) -> Result<Self> {
        let name = format!("finesse-aux-{}", Uuid::new_v4().simple());
        let fd = finesse_sys::shm::create_exclusive(&name, payload.len() as u64)?;
        let file = std::fs::File::from(fd);
        let mut mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };
        mmap[..payload.len()].copy_from_slice(payload);
        Ok(SlotSegment { name, mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl Drop for SlotSegment {
    fn drop(&mut self) {
        let _ = finesse_sys::shm::unlink(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_allocate_free_roundtrip() {
        let arena = Arena::create("test-arena", 128, 4).unwrap();
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        assert_ne!(a, b);
        arena.free(a).unwrap();
        let c = arena.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn arena_exhaustion() {
        let arena = Arena::create("small", 64, 2).unwrap();
        arena.allocate().unwrap();
        arena.allocate().unwrap();
        assert!(matches!(arena.allocate(), Err(FinesseError::NoMemory)));
    }

    #[test]
    fn slot_segment_round_trips_payload() {
        let payload = b"directory map payload bytes";
        let seg = SlotSegment::create(payload).unwrap();
        assert_eq!(&seg.bytes()[..payload.len()], payload);
    }
}
