//! Error codes surfaced across the driver's public surface.
//!
//! Every public operation returns a `Result<T, Error>`; there is no hidden
//! last-error side channel. Internal helpers are free to propagate `Error`
//! with `?` the same way.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A long filename (or its generated short-name counterpart) did not fit.
    LfnTooLong,
    /// A fixed-size table (volumes, handles, find iterators) has no free slot.
    InsufficientMemory,
    /// A non-final path segment does not resolve to a directory.
    PathNotFound,
    /// The final path segment does not exist.
    FileNotFound,
    /// No free cluster was available to satisfy an allocation.
    DiskFull,
    /// The block device reported a read or write failure.
    DiskAccessError,
    /// A cluster chain terminated before the recorded file size was reached.
    FatBrokenError,
    /// A FAT12/16 root directory (fixed size, cannot grow) has no free slot.
    DirEntryFull,
    /// `create` targeted a path that is already occupied.
    AlreadyExists,
    /// A handle, iterator, or volume was used outside of its valid lifetime,
    /// or an otherwise-impossible internal invariant was violated.
    InternalError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::LfnTooLong => "long filename too long",
            Error::InsufficientMemory => "no free handle/slot available",
            Error::PathNotFound => "path not found",
            Error::FileNotFound => "file not found",
            Error::DiskFull => "disk full",
            Error::DiskAccessError => "disk access error",
            Error::FatBrokenError => "FAT chain broken",
            Error::DirEntryFull => "directory has no free entry slots",
            Error::AlreadyExists => "already exists",
            Error::InternalError => "internal error",
        };
        f.write_str(s)
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(feature = "no_std"))] {
        impl std::error::Error for Error {}
    }
}

pub type Result<T> = core::result::Result<T, Error>;
