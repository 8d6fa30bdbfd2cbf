//! Raw FFI glue for the primitives Finesse needs that no safe crate in the
//! ecosystem covers exactly right: `pthread_mutex_t`/`pthread_cond_t` pairs
//! configured `PTHREAD_PROCESS_SHARED` and placed inline in a memory-mapped
//! region, plus the small amount of socket/shm setup that has to happen
//! before any of that mapping exists.
//!
//! Unlike the upstream `fuse-sys` this is forked from, this crate links
//! nothing external: no `build.rs`, no `pkg-config`, no libfuse. Every
//! function here is a thin wrapper over libc or nix.

pub mod seqpacket;
pub mod shm;
pub mod shm_sync;

pub use shm_sync::{ShmCondvar, ShmMutex, ShmMutexGuard};
