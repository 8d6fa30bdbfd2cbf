//! Error taxonomy (spec.md §7). Every public fallible operation in this
//! crate returns `Result<T, FinesseError>`; the `result` field written back
//! into a response slot is always `i32::from(&err)` — a raw POSIX errno,
//! matching `session.rs`'s habit of matching on `err.raw_os_error()`
//! rather than inventing a parallel error code space.

use thiserror::Error;

/// Errors surfaced anywhere in the dispatch/communications stack. Variant
/// names follow the taxonomy spec.md §7 lays out; each carries (or maps
/// to) the exact errno that taxonomy mandates.
#[derive(Debug, Error)]
pub enum FinesseError {
    /// A handle did not resolve to any object-table entry.
    #[error("invalid handle")]
    InvalidHandle,

    /// A path component lookup failed outright.
    #[error("no such entry")]
    NotFound,

    /// A path walk stepped into a non-directory component.
    #[error("not a directory")]
    NotADirectory,

    /// The embedded filesystem reported a non-zero error; forwarded
    /// verbatim (spec.md §4.H "Backing-store failure").
    #[error("backing filesystem error (errno {0})")]
    Backend(i32),

    /// No free slot, no free auxiliary buffer, or synthetic-request
    /// allocation failed.
    #[error("resource exhausted")]
    NoMemory,

    /// Unknown message class or request type.
    #[error("operation not supported")]
    NotSupported,

    /// Malformed length or otherwise structurally invalid request.
    #[error("invalid argument")]
    InvalidArgument,

    /// A `statfs` (or similarly shaped) reply was truncated below the
    /// expected struct size.
    #[error("reply truncated")]
    Overflow,

    /// The region's shutdown flag was observed; the client is gone.
    #[error("not connected")]
    NotConnected,

    /// Invariant violation inside a shared-memory region (spec.md §7 last
    /// paragraph): "unrecoverable corruption of that one client's
    /// region." The dispatcher catches this and tears down only the
    /// offending client rather than aborting the process.
    #[error("corrupt region: {0}")]
    CorruptRegion(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl FinesseError {
    /// The raw errno written into a response's `result` field, matching
    /// spec.md §7's taxonomy.
    pub fn errno(&self) -> i32 {
        match self {
            FinesseError::InvalidHandle => libc::EBADF,
            FinesseError::NotFound => libc::ENOENT,
            FinesseError::NotADirectory => libc::ENOTDIR,
            FinesseError::Backend(errno) => *errno,
            FinesseError::NoMemory => libc::ENOMEM,
            FinesseError::NotSupported => libc::ENOTSUP,
            FinesseError::InvalidArgument => libc::EINVAL,
            FinesseError::Overflow => libc::EOVERFLOW,
            FinesseError::NotConnected => libc::ENOTCONN,
            FinesseError::CorruptRegion(_) => libc::EIO,
            FinesseError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FinesseError::Other(_) => libc::EIO,
        }
    }
}

impl From<&FinesseError> for i32 {
    fn from(err: &FinesseError) -> i32 {
        err.errno()
    }
}

impl From<FinesseError> for i32 {
    fn from(err: FinesseError) -> i32 {
        err.errno()
    }
}

pub type Result<T> = std::result::Result<T, FinesseError>;
