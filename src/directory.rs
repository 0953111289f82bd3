//! File records and the hash-table lookup over the bounded file array.
//!
//! Every file lives in a fixed `NUM_FILES`-slot array, found by linear
//! probing from `hash(name) % NUM_FILES`. There is no deletion tombstone:
//! a slot is empty exactly when its `first_block` is `0`, so a deleted
//! slot immediately becomes available to a later `newfile`.

use crate::NUM_FILES;

/// The concrete data-interpretation strategies a file can declare. Only
/// [`FileType::Raw`] has a stream implementation; the others round-trip
/// through the partition table and file record but have no defined
/// encoding of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    Empty = 0,
    Raw = 1,
    Ecc = 2,
    Crc = 3,
    LowRedundance = 4,
    HighRedundance = 5,
    FourierRedundance = 6,
}

impl FileType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a partition-table nibble. Any value outside the known range
    /// (bit patterns flash can produce but this crate never writes)
    /// decodes as `Empty`, the same way a corrupt block header is treated
    /// as orphaned rather than trusted.
    pub fn from_code(code: u8) -> FileType {
        match code & 0x0F {
            1 => FileType::Raw,
            2 => FileType::Ecc,
            3 => FileType::Crc,
            4 => FileType::LowRedundance,
            5 => FileType::HighRedundance,
            6 => FileType::FourierRedundance,
            _ => FileType::Empty,
        }
    }
}

/// Length of the usable portion of a filename kept in RAM for comparisons
/// and hashing.
pub const FILENAME_LEN: usize = 15;

/// Width of the filename field as actually programmed into a block's
/// payload: the 15 usable bytes plus an explicit null terminator, matching
/// the 16-byte `char filename[16]` field the on-disk layout is grounded on.
pub const FILENAME_FIELD_LEN: usize = FILENAME_LEN + 1;

/// Copy `name` into a fixed 15-byte field, truncating anything past that
/// and null-padding the rest.
pub fn copy_name(name: &str) -> [u8; FILENAME_LEN] {
    let mut buf = [0u8; FILENAME_LEN];
    for (dst, src) in buf.iter_mut().zip(name.as_bytes().iter()) {
        *dst = *src;
    }
    buf
}

/// Widen a filename to the 16-byte field actually written to a block's
/// payload, appending the explicit null terminator.
pub fn encode_field(name: &[u8; FILENAME_LEN]) -> [u8; FILENAME_FIELD_LEN] {
    let mut field = [0u8; FILENAME_FIELD_LEN];
    field[..FILENAME_LEN].copy_from_slice(name);
    field
}

/// Narrow a 16-byte on-disk filename field back to the 15-byte form kept in
/// a `FileRecord`, dropping the trailing null terminator.
pub fn decode_field(field: &[u8; FILENAME_FIELD_LEN]) -> [u8; FILENAME_LEN] {
    let mut name = [0u8; FILENAME_LEN];
    name.copy_from_slice(&field[..FILENAME_LEN]);
    name
}

/// JDK `String.hashCode`-style polynomial hash, seeded at 13 and run over
/// the filename field plus its implicit null terminator (16 bytes total).
pub fn hash_filename(name: &[u8; FILENAME_LEN]) -> u32 {
    let mut hash: u32 = 13;
    for &byte in name {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    hash.wrapping_mul(31)
}

/// An in-RAM directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: [u8; FILENAME_LEN],
    pub file_type: FileType,
    pub hash: u32,
    pub first_block: u16,
    pub last_block: u16,
    pub length: u32,
    pub used_blocks: u16,
}

impl FileRecord {
    pub const EMPTY: FileRecord = FileRecord {
        filename: [0; FILENAME_LEN],
        file_type: FileType::Empty,
        hash: 0,
        first_block: 0,
        last_block: 0,
        length: 0,
        used_blocks: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.first_block == 0
    }

    pub fn name_matches(&self, name: &[u8; FILENAME_LEN]) -> bool {
        &self.filename == name
    }
}

/// Find the slot whose filename matches `name`, probing from
/// `hash(name) % NUM_FILES`.
pub fn find(records: &[FileRecord; NUM_FILES], name: &[u8; FILENAME_LEN]) -> Option<usize> {
    let start = (hash_filename(name) as usize) % NUM_FILES;
    for offset in 0..NUM_FILES {
        let slot = (start + offset) % NUM_FILES;
        let record = &records[slot];
        if !record.is_empty() && record.name_matches(name) {
            return Some(slot);
        }
    }
    None
}

/// Find the first empty slot reachable by probing from
/// `hash(name) % NUM_FILES`, failing if `name` is already present or every
/// slot is taken.
pub fn find_slot_for_new(
    records: &[FileRecord; NUM_FILES],
    name: &[u8; FILENAME_LEN],
) -> Result<usize, NewFileError> {
    let start = (hash_filename(name) as usize) % NUM_FILES;
    let mut free_slot = None;
    for offset in 0..NUM_FILES {
        let slot = (start + offset) % NUM_FILES;
        let record = &records[slot];
        if record.is_empty() {
            if free_slot.is_none() {
                free_slot = Some(slot);
            }
            continue;
        }
        if record.name_matches(name) {
            return Err(NewFileError::DuplicateName);
        }
    }
    free_slot.ok_or(NewFileError::DirectoryFull)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewFileError {
    DuplicateName,
    DirectoryFull,
}
