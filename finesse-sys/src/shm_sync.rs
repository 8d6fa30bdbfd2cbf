//! Cross-process mutex and condition variable pairs.
//!
//! spec.md/SPEC_FULL.md §9 calls these out explicitly: "any target-language
//! concurrency primitive used must be explicitly shareable across processes
//! via a memory mapping... use a futex-based primitive directly" if the
//! runtime can't provide that. Rust's `std::sync::Mutex` cannot be placed in
//! shared memory (it may box internal state, and its poisoning/allocator
//! assumptions don't survive a second process mapping the same bytes), so
//! these wrap the libc primitives with `PTHREAD_PROCESS_SHARED` set and are
//! laid out `#[repr(C)]` so both sides agree on their byte size.

use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;

/// A `pthread_mutex_t` configured for cross-process use, meant to be
/// embedded directly (not behind a pointer) inside a memory-mapped region.
#[repr(C)]
pub struct ShmMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: all access goes through pthread_mutex_lock/unlock, which provide
// their own cross-thread (and here, cross-process) exclusion.
unsafe impl Sync for ShmMutex {}
unsafe impl Send for ShmMutex {}

impl ShmMutex {
    /// Placeholder value suitable for `mem::zeroed()`-style bulk-zero of a
    /// freshly mapped region; callers MUST call [`ShmMutex::init`] before
    /// any use, zeroing alone does not produce a valid pthread mutex.
    pub const fn uninit() -> Self {
        ShmMutex {
            inner: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        }
    }

    /// Initialize the mutex in place. Must be called exactly once, by
    /// whichever side creates the region (the client, per SPEC_FULL.md
    /// §4.D: the client creates and sizes the shared-memory object).
    ///
    /// # Safety
    /// `self` must be backed by memory that both sides have mapped (or
    /// will map) at the time they call [`ShmMutex::lock`]; the mutex must
    /// not be moved after this call.
    pub unsafe fn init(&self, error_check: bool) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let mut attr = attr.assume_init();
        check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        if error_check {
            check(libc::pthread_mutexattr_settype(
                &mut attr,
                libc::PTHREAD_MUTEX_ERRORCHECK,
            ))?;
        }
        let result = check(libc::pthread_mutex_init(self.inner.get(), &attr));
        libc::pthread_mutexattr_destroy(&mut attr);
        result
    }

    /// Lock the mutex, blocking the calling thread. Returns a guard whose
    /// `Drop` unlocks it.
    ///
    /// # Safety
    /// `self` must have been initialized via [`ShmMutex::init`].
    pub unsafe fn lock(&self) -> ShmMutexGuard<'_> {
        let rc = libc::pthread_mutex_lock(self.inner.get());
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed: {rc}");
        ShmMutexGuard { mutex: self }
    }

    /// # Safety
    /// `self` must have been initialized via [`ShmMutex::init`] and must
    /// not be locked by any thread in any process at the time of the call.
    pub unsafe fn destroy(&self) {
        libc::pthread_mutex_destroy(self.inner.get());
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

/// RAII guard returned by [`ShmMutex::lock`].
pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            let rc = libc::pthread_mutex_unlock(self.mutex.inner.get());
            debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed: {rc}");
        }
    }
}

/// A `pthread_cond_t` configured for cross-process use, embedded directly
/// inside a memory-mapped region alongside its companion [`ShmMutex`].
#[repr(C)]
pub struct ShmCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Sync for ShmCondvar {}
unsafe impl Send for ShmCondvar {}

impl ShmCondvar {
    pub const fn uninit() -> Self {
        ShmCondvar {
            inner: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        }
    }

    /// # Safety
    /// Same contract as [`ShmMutex::init`].
    pub unsafe fn init(&self) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        check(libc::pthread_condattr_init(attr.as_mut_ptr()))?;
        let mut attr = attr.assume_init();
        check(libc::pthread_condattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        let result = check(libc::pthread_cond_init(self.inner.get(), &attr));
        libc::pthread_condattr_destroy(&mut attr);
        result
    }

    /// Wait on the condvar. The caller must already hold `mutex`'s lock
    /// (represented by `guard`, which is reborrowed so the mutex stays
    /// locked on return per pthread_cond_wait semantics).
    ///
    /// # Safety
    /// `mutex` must be the same mutex `guard` was produced from.
    pub unsafe fn wait<'a>(&self, guard: ShmMutexGuard<'a>, mutex: &'a ShmMutex) -> ShmMutexGuard<'a> {
        // pthread_cond_wait atomically unlocks+relocks; forget the guard so
        // we don't double-unlock, then hand back a fresh one representing
        // the reacquired lock.
        std::mem::forget(guard);
        let rc = libc::pthread_cond_wait(self.inner.get(), mutex.raw());
        debug_assert_eq!(rc, 0, "pthread_cond_wait failed: {rc}");
        ShmMutexGuard { mutex }
    }

    /// # Safety: `self` must have been initialized.
    pub unsafe fn signal(&self) {
        libc::pthread_cond_signal(self.inner.get());
    }

    /// # Safety: `self` must have been initialized.
    pub unsafe fn broadcast(&self) {
        libc::pthread_cond_broadcast(self.inner.get());
    }

    /// # Safety
    /// `self` must have been initialized and no thread may be waiting on it.
    pub unsafe fn destroy(&self) {
        libc::pthread_cond_destroy(self.inner.get());
    }
}

fn check(rc: i32) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}
