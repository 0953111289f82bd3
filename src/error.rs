//! The error taxonomy returned by the public API.
//!
//! RocketFS never panics on a caller mistake or on device corruption; every
//! failure that the caller could plausibly act on is returned as a
//! [`RocketFsError`]. Paths the original design treats as acceptable data
//! loss (allocator exhaustion falling back to oldest-block reclamation) stay
//! infallible, matching the ring-buffer telemetry use case they serve.

use core::fmt::{self, Display};

/// Errors produced by RocketFS operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RocketFsError {
    /// A block size was given that cannot fit a byte-per-block partition
    /// table (the table must fit inside a single block).
    BlockSizeTooSmall { block_size: u32, minimum: u32 },
    /// The device's `capacity` is not `block_size * NUM_BLOCKS`.
    CapacityMismatch { capacity: u32, expected: u32 },
    /// The file directory has no free slot left.
    DirectoryFull,
    /// `newfile` was called with a name that already exists.
    DuplicateName,
    /// A stream was requested for a file type with no concrete read/write
    /// implementation (only [`crate::directory::FileType::Raw`] is implemented).
    UnknownFileType,
    /// Reserved for a hypothetical runtime-checked FFI shim; the safe API
    /// never returns this because a second stream cannot be opened while the
    /// first still borrows the filesystem.
    StreamAlreadyOpen,
    /// A successor chain did not terminate within `NUM_BLOCKS` hops.
    CorruptChain { file_id: u8 },
    /// An operation that requires a mounted filesystem was attempted first.
    NotMounted,
    /// No file exists at the requested handle (it was deleted or never existed).
    NoSuchFile,
}

impl Display for RocketFsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RocketFsError::BlockSizeTooSmall { block_size, minimum } => write!(
                f,
                "block size {block_size} is smaller than the minimum {minimum} needed to hold the partition table"
            ),
            RocketFsError::CapacityMismatch { capacity, expected } => write!(
                f,
                "device capacity {capacity} does not match expected {expected} for the configured geometry"
            ),
            RocketFsError::DirectoryFull => write!(f, "file directory is full"),
            RocketFsError::DuplicateName => write!(f, "a file with this name already exists"),
            RocketFsError::UnknownFileType => write!(f, "no stream implementation for this file type"),
            RocketFsError::StreamAlreadyOpen => write!(f, "a stream is already open"),
            RocketFsError::CorruptChain { file_id } => {
                write!(f, "successor chain for file {file_id} did not terminate")
            }
            RocketFsError::NotMounted => write!(f, "filesystem is not mounted"),
            RocketFsError::NoSuchFile => write!(f, "no such file"),
        }
    }
}
