//! RocketFS: a small, log-structured filesystem for raw NOR flash.
//!
//! RocketFS persists a modest number of append-friendly "files" (telemetry
//! streams, black-box logs, ...) across power loss on a microcontroller with
//! a few hundred kilobytes of RAM and a handful of megabytes of NOR flash.
//! It never allocates: the partition table, file directory and block
//! successor table are fixed-size arrays sized for the canonical geometry
//! (4096 blocks, 64 files).
//!
//! The host supplies a [`Device`] implementation exposing the flash's
//! `read`/`write`/`erase_block` primitives; everything else (allocation,
//! wear-spreading, chain reconstruction, the stream cursor) lives here.
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "no_std")]
extern crate rlibc as _;

pub mod allocator;
pub mod block;
pub mod chain;
pub mod codec;
pub mod device;
pub mod directory;
pub mod error;
pub mod fs;
pub mod magic;
pub mod partition;
pub mod stream;

pub use device::Device;
pub use directory::FileType;
pub use error::RocketFsError;
pub use fs::{FileHandle, RocketFs};
pub use stream::{Stream, StreamMode};

/// Number of addressable blocks in the canonical geometry.
pub const NUM_BLOCKS: usize = 4096;
/// Number of file directory slots.
pub const NUM_FILES: usize = 64;
/// Number of protected metadata blocks at the start of the device (superblock,
/// partition table, recovery/backup slots, journal).
pub const PROTECTED_BLOCKS: u16 = 8;
/// Number of reserved blocks at the end of the device.
pub const RESERVED_TAIL_BLOCKS: u16 = 4;
/// Length in bytes of a data block's header (magic, file id, predecessor, usage bitmap).
pub const BLOCK_HEADER_LEN: u32 = 16;
/// Number of usage-bitmap regions per block payload.
pub const USAGE_REGIONS: u32 = 64;
/// Magic value stamped into every allocated data block's header.
pub const BLOCK_MAGIC: u32 = 0xC0FFEE42;
/// Default period of the superblock's heuristic magic pattern.
pub const MAGIC_PERIOD: u8 = 7;
/// Default number of flipped bits the magic heuristic tolerates.
pub const CORRUPTION_THRESHOLD: u32 = 8;
/// Block index of the superblock.
pub const SUPERBLOCK_BLOCK: u16 = 0;
/// Block index of the master partition table.
pub const PARTITION_BLOCK: u16 = 1;
/// Block index range of the backup partition-table slots (inclusive).
pub const BACKUP_BLOCKS: core::ops::RangeInclusive<u16> = 2..=6;
/// Block index reserved for the (unimplemented) journal.
pub const JOURNAL_BLOCK: u16 = 7;
/// Age seeded into a block's partition entry on allocation.
pub const SEED_AGE: u8 = 0xC;
/// Sentinel age value reserved and never reached by decrement.
pub const RESERVED_AGE: u8 = 0xF;
