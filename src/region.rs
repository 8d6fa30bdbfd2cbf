//! Shared-memory region allocator (spec.md §4.A). Operates on a mapped
//! [`finesse_abi::region::RegionLayout`] reached through a shared
//! reference — the mapping is genuinely shared across two processes, so
//! there is never an exclusive `&mut RegionLayout` to hand out; every
//! mutation goes through an atomic or through [`RegionLayout::slot_mut`]
//! under the protection of the allocation-bitmap CAS protocol.
//!
//! Grounded on `finesse/communications/fincomm.c`'s `FinesseGetRequestBuffer`,
//! `FinesseRequestReady`, `FinesseResponseReady`, `FinesseReadyRequestWait`,
//! `FinesseGetReadyRequest`, `FinesseReleaseRequestBuffer`.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use finesse_abi::region::{RegionLayout, FINESSE_SIGNATURE, SHM_MESSAGE_COUNT};
use finesse_abi::MessageClass;
use uuid::Uuid;

use crate::error::{FinesseError, Result};

/// "Large sentinel" the request-id counter is seeded to (spec.md §4.A:
/// "seeds the request-id counter to a large sentinel"), so a freshly
/// mapped, not-yet-initialized region's request ids are never confused
/// with the small literal ids a test might otherwise pick.
const REQUEST_ID_SEED: u64 = 0x1_0000_0000;

/// Bounded retry budget for `DestroyRegion`'s wait for waiters to drain
/// (spec.md §4.A: "broadcast... until the waiter count reaches zero or a
/// bounded retry budget is exhausted").
const DESTROY_RETRY_BUDGET: u32 = 1000;

fn now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

fn find_clear_bit(bitmap: u64, hint: usize) -> Option<usize> {
    (0..SHM_MESSAGE_COUNT).map(|off| (hint + off) % SHM_MESSAGE_COUNT).find(|&idx| bitmap & (1u64 << idx) == 0)
}

fn find_set_bit(bitmap: u64, hint: usize) -> Option<usize> {
    (0..SHM_MESSAGE_COUNT).map(|off| (hint + off) % SHM_MESSAGE_COUNT).find(|&idx| bitmap & (1u64 << idx) != 0)
}

/// Writes the header fields of a freshly mapped, zero-filled region:
/// signature, both identifiers, region size, zeroed bitmaps, the
/// request-id sentinel, and both process-shared mutex/condvar pairs
/// (spec.md §4.A "Initialization").
///
/// # Safety
/// `layout` must point at `RegionLayout::total_size()` bytes of writable
/// memory, freshly zero-filled (as a just-`ftruncate`d shared-memory
/// segment is), with no other thread or process yet observing it.
pub unsafe fn init_region(layout: *mut RegionLayout, region_size: u64, server_id: Uuid, client_id: Uuid) -> Result<()> {
    let header = &mut (*layout).header;
    header.signature = FINESSE_SIGNATURE;
    header.server_id = server_id;
    header.client_id = client_id;
    header.region_size = region_size;
    header.allocation_bitmap = AtomicU64::new(0);
    header.request_ready_bitmap = AtomicU64::new(0);
    header.response_ready_bitmap = AtomicU64::new(0);
    header.request_id_counter = AtomicU64::new(REQUEST_ID_SEED);
    header.last_buffer_allocated = AtomicU32::new(0);
    header.request_waiters = AtomicU32::new(0);
    header.shutdown_requested = AtomicBool::new(false);
    header.request_mutex.init(true)?;
    header.request_condvar.init()?;
    header.response_mutex.init(true)?;
    header.response_condvar.init()?;
    Ok(())
}

/// **AllocateRequestBuffer** (spec.md §4.A). Never blocks: on a full
/// region, returns `Err(NoMemory)` immediately.
pub fn allocate_request_buffer(region: &RegionLayout, class: MessageClass, request_type: u8) -> Result<usize> {
    loop {
        let current = region.header.allocation_bitmap.load(Ordering::Acquire);
        if current == u64::MAX {
            return Err(FinesseError::NoMemory);
        }
        let hint = region.header.last_buffer_allocated.load(Ordering::Relaxed) as usize % SHM_MESSAGE_COUNT;
        // `hint` starts from the last-allocated index and rand::random
        // perturbs it so two racing allocators don't repeatedly collide
        // on the same bit (spec.md §4.A "randomised-start scans ... and
        // a last-allocated index hint").
        let jitter: u32 = rand::random();
        let start = (hint + jitter as usize) % SHM_MESSAGE_COUNT;
        let idx = match find_clear_bit(current, start) {
            Some(i) => i,
            None => return Err(FinesseError::NoMemory),
        };
        let mask = 1u64 << idx;
        if region
            .header
            .allocation_bitmap
            .compare_exchange_weak(current, current | mask, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            region.header.last_buffer_allocated.store(idx as u32, Ordering::Relaxed);
            // SAFETY: the CAS above gave this caller exclusive ownership
            // of slot `idx` until it is released.
            let slot = unsafe { region.slot_mut(idx) };
            slot.init_request(class);
            slot.stats.request_class = class.as_u32() as u8;
            slot.stats.request_type = request_type;
            slot.stats.start = now_ns();
            return Ok(idx);
        }
        // Lost the race; reread the bitmap and try again.
    }
}

/// **RequestReady** (spec.md §4.A). Returns `0` — a logic error the
/// caller must treat as a bug — if the slot's allocation bit is clear.
pub fn request_ready(region: &RegionLayout, idx: usize) -> u64 {
    let mask = 1u64 << idx;
    if region.header.allocation_bitmap.load(Ordering::Acquire) & mask == 0 {
        return finesse_abi::region::INVALID_REQUEST_ID;
    }
    let mut id;
    loop {
        let prev = region.header.request_id_counter.fetch_add(1, Ordering::AcqRel);
        id = prev.wrapping_add(1);
        if id != finesse_abi::region::INVALID_REQUEST_ID {
            break;
        }
    }
    unsafe {
        let guard = region.header.request_mutex.lock();
        let slot = region.slot_mut(idx);
        slot.set_request_id(id);
        slot.stats.enqueued = now_ns();
        region.header.request_ready_bitmap.fetch_or(mask, Ordering::AcqRel);
        region.header.request_condvar.signal();
        drop(guard);
    }
    id
}

/// **ResponseReady** (spec.md §4.A). Precondition: the slot's response bit
/// is clear; violating it is a corrupt-region condition (spec.md §7).
pub fn response_ready(region: &RegionLayout, idx: usize) -> Result<()> {
    let mask = 1u64 << idx;
    unsafe {
        let _guard = region.header.response_mutex.lock();
        if region.header.response_ready_bitmap.load(Ordering::Acquire) & mask != 0 {
            return Err(FinesseError::CorruptRegion(format!("response bit {idx} already set")));
        }
        let slot = region.slot_mut(idx);
        slot.stats.response_enqueued = now_ns();
        region.header.response_ready_bitmap.fetch_or(mask, Ordering::AcqRel);
        region.header.response_condvar.broadcast();
    }
    Ok(())
}

/// **GetResponse** (spec.md §4.A). `wait = false` polls once and returns
/// `Err(NotSupported)`-shaped "not ready" via `Ok(false)` instead of
/// blocking; `wait = true` parks on the response condvar.
pub fn get_response(region: &RegionLayout, idx: usize, wait: bool) -> Result<bool> {
    let mask = 1u64 << idx;
    unsafe {
        let mut guard = region.header.response_mutex.lock();
        loop {
            if region.header.shutdown_requested.load(Ordering::Acquire) {
                return Err(FinesseError::NotConnected);
            }
            if region.header.response_ready_bitmap.load(Ordering::Acquire) & mask != 0 {
                break;
            }
            if !wait {
                return Ok(false);
            }
            guard = region.header.response_condvar.wait(guard, &region.header.response_mutex);
        }
        region.header.response_ready_bitmap.fetch_and(!mask, Ordering::AcqRel);
        let slot = region.slot_mut(idx);
        slot.stats.response_dequeued = now_ns();
        slot.stats.completed = now_ns();
    }
    Ok(true)
}

/// **WaitForReadyRequest** (spec.md §4.A).
pub fn wait_for_ready_request(region: &RegionLayout) -> Result<()> {
    unsafe {
        let mut guard = region.header.request_mutex.lock();
        region.header.request_waiters.fetch_add(1, Ordering::AcqRel);
        let outcome = loop {
            if region.header.shutdown_requested.load(Ordering::Acquire) {
                break Err(FinesseError::NotConnected);
            }
            if region.header.request_ready_bitmap.load(Ordering::Acquire) != 0 {
                break Ok(());
            }
            guard = region.header.request_condvar.wait(guard, &region.header.request_mutex);
        };
        region.header.request_waiters.fetch_sub(1, Ordering::AcqRel);
        outcome
    }
}

/// **GetReadyRequest** (spec.md §4.A). Non-blocking; picks a set bit
/// starting from a random index.
pub fn get_ready_request(region: &RegionLayout) -> Result<Option<usize>> {
    unsafe {
        let _guard = region.header.request_mutex.lock();
        if region.header.shutdown_requested.load(Ordering::Acquire) {
            return Err(FinesseError::NotConnected);
        }
        let bitmap = region.header.request_ready_bitmap.load(Ordering::Acquire);
        if bitmap == 0 {
            return Ok(None);
        }
        let hint: u32 = rand::random();
        let idx = find_set_bit(bitmap, hint as usize % SHM_MESSAGE_COUNT).expect("bitmap is non-zero");
        region.header.request_ready_bitmap.fetch_and(!(1u64 << idx), Ordering::AcqRel);
        let slot = region.slot_mut(idx);
        slot.stats.dequeued = now_ns();
        Ok(Some(idx))
    }
}

/// **ReleaseRequestBuffer** (spec.md §4.A). Precondition: the allocation
/// bit was set.
pub fn release_request_buffer(region: &RegionLayout, idx: usize) -> Result<()> {
    let mask = 1u64 << idx;
    if region.header.allocation_bitmap.load(Ordering::Acquire) & mask == 0 {
        return Err(FinesseError::CorruptRegion(format!("release of unallocated slot {idx}")));
    }
    unsafe {
        region.slot_mut(idx).set_request_id(finesse_abi::region::INVALID_REQUEST_ID);
    }
    region.header.allocation_bitmap.fetch_and(!mask, Ordering::AcqRel);
    Ok(())
}

/// **DestroyRegion** (spec.md §4.A). Precondition: allocation bitmap is
/// zero (enforced by the server tearing down a client only after every
/// in-flight request on it has been abandoned or completed).
pub fn destroy_region(region: &RegionLayout) -> Result<()> {
    if region.header.allocation_bitmap.load(Ordering::Acquire) != 0 {
        return Err(FinesseError::CorruptRegion("destroy with slots still allocated".into()));
    }
    region.header.shutdown_requested.store(true, Ordering::Release);
    unsafe {
        let mut retries = 0;
        while region.header.request_waiters.load(Ordering::Acquire) > 0 && retries < DESTROY_RETRY_BUDGET {
            region.header.request_condvar.broadcast();
            std::thread::sleep(Duration::from_millis(1));
            retries += 1;
        }
        region.header.request_mutex.destroy();
        region.header.request_condvar.destroy();
        region.header.response_mutex.destroy();
        region.header.response_condvar.destroy();
    }
    Ok(())
}

/// An owned mapping of one client's region, shared (not exclusive)
/// because the same bytes are also mapped by the peer process. Built on
/// `memmap2::MmapRaw`, which hands out a raw pointer rather than an
/// exclusive `&mut [u8]` for exactly this cross-process-aliasing reason.
pub struct MappedRegion {
    mmap: memmap2::MmapRaw,
}

// SAFETY: the mapped bytes are shared with another process by
// construction; every access goes through the same atomic/CAS/mutex
// discipline `RegionLayout` itself requires.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Maps `fd` (already sized to `RegionLayout::total_size()` via
    /// `ftruncate`) read-write.
    pub fn map(fd: OwnedFd) -> std::io::Result<Self> {
        let file = std::fs::File::from(fd);
        let mmap = memmap2::MmapRaw::map_raw(&file)?;
        if mmap.len() < RegionLayout::total_size() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "shared-memory segment too small"));
        }
        Ok(MappedRegion { mmap })
    }

    pub fn layout(&self) -> &RegionLayout {
        unsafe { &*(self.mmap.as_ptr() as *const RegionLayout) }
    }

    /// # Safety
    /// Only valid to call once, immediately after [`MappedRegion::map`],
    /// before any other thread or the peer process reads the mapping.
    pub unsafe fn layout_mut_ptr(&self) -> *mut RegionLayout {
        self.mmap.as_mut_ptr() as *mut RegionLayout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finesse_abi::region::RegionLayout;

    fn anonymous_region() -> Box<RegionLayout> {
        // A heap-backed stand-in for a shared-memory mapping: every
        // operation under test here only touches the header/slots through
        // the same discipline a real mapping would use, so a `Box` is a
        // faithful single-process substitute.
        let mut region: Box<RegionLayout> = unsafe {
            let layout = std::alloc::Layout::new::<RegionLayout>();
            let ptr = std::alloc::alloc_zeroed(layout) as *mut RegionLayout;
            Box::from_raw(ptr)
        };
        unsafe {
            init_region(&mut *region as *mut RegionLayout, RegionLayout::total_size() as u64, Uuid::new_v4(), Uuid::new_v4())
                .unwrap();
        }
        region
    }

    #[test]
    fn allocate_request_ready_response_roundtrip() {
        let region = anonymous_region();
        let idx = allocate_request_buffer(&region, MessageClass::Native, 0).unwrap();
        let id = request_ready(&region, idx);
        assert_ne!(id, 0);
        assert!(region.header.request_ready_bitmap.load(Ordering::Acquire) & (1 << idx) != 0);

        let got = get_ready_request(&region).unwrap();
        assert_eq!(got, Some(idx));
        assert_eq!(region.header.request_ready_bitmap.load(Ordering::Acquire) & (1 << idx), 0);

        response_ready(&region, idx).unwrap();
        let ready = get_response(&region, idx, false).unwrap();
        assert!(ready);

        let popcount_before = region.header.allocation_bitmap.load(Ordering::Acquire).count_ones();
        release_request_buffer(&region, idx).unwrap();
        let popcount_after = region.header.allocation_bitmap.load(Ordering::Acquire).count_ones();
        assert_eq!(popcount_after, popcount_before - 1);
    }

    #[test]
    fn slab_exhaustion_and_recovery() {
        let region = anonymous_region();
        let mut slots = Vec::new();
        for _ in 0..SHM_MESSAGE_COUNT {
            slots.push(allocate_request_buffer(&region, MessageClass::Fuse, 0).unwrap());
        }
        assert!(matches!(allocate_request_buffer(&region, MessageClass::Fuse, 0), Err(FinesseError::NoMemory)));
        release_request_buffer(&region, slots.pop().unwrap()).unwrap();
        assert!(allocate_request_buffer(&region, MessageClass::Fuse, 0).is_ok());
    }

    #[test]
    fn request_ids_are_monotone_and_nonzero() {
        let region = anonymous_region();
        let a = allocate_request_buffer(&region, MessageClass::Native, 0).unwrap();
        let b = allocate_request_buffer(&region, MessageClass::Native, 0).unwrap();
        let id_a = request_ready(&region, a);
        let id_b = request_ready(&region, b);
        assert_ne!(id_a, 0);
        assert_ne!(id_b, 0);
        assert!(id_b > id_a);
    }

    #[test]
    fn destroy_with_no_clients_succeeds() {
        let region = anonymous_region();
        assert!(destroy_region(&region).is_ok());
    }

    #[test]
    fn get_response_reports_not_connected_after_shutdown() {
        let region = anonymous_region();
        let idx = allocate_request_buffer(&region, MessageClass::Native, 0).unwrap();
        request_ready(&region, idx);
        region.header.shutdown_requested.store(true, Ordering::Release);
        assert!(matches!(get_response(&region, idx, true), Err(FinesseError::NotConnected)));
    }
}
