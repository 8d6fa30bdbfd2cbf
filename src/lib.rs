//! Finesse: a user-space acceleration layer for FUSE filesystems.
//!
//! A conforming client bypasses the kernel VFS round-trip for requests it
//! opts into, forwarding them straight to a Finesse-aware FUSE daemon over a
//! shared-memory channel (spec.md §1). This crate is the daemon-side half of
//! that bypass plus the shared wire discipline: the shared-memory slot
//! allocator, the registration bootstrap, the per-client dispatch loop, the
//! FUSE adapter that executes a request against an embedded filesystem, the
//! name/handle object table, and the per-call statistics subsystem.
//!
//! The client-side interception shims (one per intercepted libc entry
//! point) are out of scope (spec.md §1) — this crate only implements the
//! protocol and dispatch machinery a shim, or the small test client in
//! [`client`], talks to.

pub mod adapter;
pub mod arena;
pub mod client;
pub mod config;
pub mod error;
pub mod lowlevel;
pub mod memory;
pub mod native;
pub mod object_table;
pub mod pathresolve;
pub mod region;
pub mod server;
pub mod stats;

pub use config::FinesseConfig;
pub use error::{FinesseError, Result};
pub use lowlevel::FuseLowLevelOps;
pub use object_table::ObjectTable;
pub use server::FinesseServer;
