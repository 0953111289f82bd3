//! Superblock recognition and the block-ownership partition table.
//!
//! The superblock is a single 8-byte heuristic pattern (see [`crate::magic`])
//! stamped at [`crate::SUPERBLOCK_BLOCK`] that lets `mount` distinguish "never
//! formatted" flash from "formatted, maybe with some bit rot" flash without
//! needing a perfect byte-for-byte match.
//!
//! The partition table holds one byte per block, packed as
//! `(file_type << 4) | age`; a zero byte means free. It lives in RAM as a
//! fixed-size array in that unpacked form and is written to flash bitwise
//! inverted, since erased NOR reads back as all-ones and inversion keeps
//! "free in RAM" (`0x00`) lined up with "erased on flash" (`0xFF`). It is
//! only written out on an explicit flush, since updating it in place would
//! otherwise require bit transitions NOR can't make without an erase.

use crate::device::Device;
use crate::directory::FileType;
use crate::magic;
use crate::{
    BACKUP_BLOCKS, CORRUPTION_THRESHOLD, MAGIC_PERIOD, NUM_BLOCKS, PARTITION_BLOCK, RESERVED_AGE,
    SUPERBLOCK_BLOCK,
};

/// Minimum block size able to hold one partition table byte per block.
pub const MIN_BLOCK_SIZE: u32 = NUM_BLOCKS as u32;

/// Ownership and wear-spreading state of a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub file_type: FileType,
    pub age: u8,
}

impl PartitionEntry {
    pub const FREE: PartitionEntry = PartitionEntry { file_type: FileType::Empty, age: 0 };

    pub fn is_free(&self) -> bool {
        self.file_type == FileType::Empty && self.age == 0
    }

    fn ram_byte(self) -> u8 {
        (self.file_type.code() << 4) | (self.age & 0x0F)
    }

    fn from_ram_byte(byte: u8) -> PartitionEntry {
        PartitionEntry { file_type: FileType::from_code(byte >> 4), age: byte & 0x0F }
    }

    fn to_flash_byte(self) -> u8 {
        !self.ram_byte()
    }

    fn from_flash_byte(byte: u8) -> PartitionEntry {
        PartitionEntry::from_ram_byte(!byte)
    }
}

/// The full per-block ownership table, held entirely in RAM in unpacked
/// (not flash-inverted) form.
pub struct PartitionTable {
    entries: [PartitionEntry; NUM_BLOCKS],
}

impl PartitionTable {
    /// A freshly formatted table: every block free.
    pub fn blank() -> PartitionTable {
        PartitionTable { entries: [PartitionEntry::FREE; NUM_BLOCKS] }
    }

    pub fn get(&self, block: u16) -> PartitionEntry {
        self.entries[block as usize]
    }

    pub fn set(&mut self, block: u16, entry: PartitionEntry) {
        self.entries[block as usize] = entry;
    }

    pub fn is_blank(&self) -> bool {
        self.entries.iter().all(|e| e.is_free())
    }

    fn encode_into(&self, buf: &mut [u8]) {
        for (byte, entry) in buf.iter_mut().zip(self.entries.iter()) {
            *byte = entry.to_flash_byte();
        }
        for byte in buf.iter_mut().skip(self.entries.len()) {
            *byte = 0xFF;
        }
    }

    fn decode_from(buf: &[u8]) -> PartitionTable {
        let mut entries = [PartitionEntry::FREE; NUM_BLOCKS];
        for (entry, &byte) in entries.iter_mut().zip(buf.iter()) {
            *entry = PartitionEntry::from_flash_byte(byte);
        }
        PartitionTable { entries }
    }

    /// Seed the protected metadata blocks (`0..PROTECTED_BLOCKS`) with the
    /// reserved age, matching what `format` stamps on disk.
    pub fn seed_protected_range(&mut self, protected_blocks: u16) {
        for block in 0..protected_blocks {
            self.set(block, PartitionEntry { file_type: FileType::Empty, age: RESERVED_AGE });
        }
    }
}

/// Write the formatted-volume superblock stamp.
pub fn write_superblock<D: Device>(device: &mut D, block_size: u32) {
    let addr = SUPERBLOCK_BLOCK as u32 * block_size;
    let mut buf = [0u8; 8];
    crate::codec::write_u64(&mut buf, magic::canonical());
    device.write(addr, &buf);
}

/// Does the block at [`crate::SUPERBLOCK_BLOCK`] recognize as a formatted
/// volume, tolerating the usual handful of flipped bits?
pub fn is_formatted<D: Device>(device: &mut D, block_size: u32) -> bool {
    let addr = SUPERBLOCK_BLOCK as u32 * block_size;
    let mut buf = [0u8; 8];
    device.read(addr, &mut buf);
    let value = crate::codec::read_u64(&buf);
    magic::recognize(MAGIC_PERIOD, CORRUPTION_THRESHOLD, value)
}

/// Write the partition table to its primary slot and mirror it to every
/// backup slot.
pub fn flush<D: Device>(device: &mut D, block_size: u32, table: &PartitionTable) {
    let mut buf_storage = [0u8; NUM_BLOCKS];
    let buf = &mut buf_storage[..block_size.min(NUM_BLOCKS as u32) as usize];
    table.encode_into(buf);

    write_block(device, PARTITION_BLOCK, block_size, buf);
    for backup in BACKUP_BLOCKS {
        write_block(device, backup, block_size, buf);
    }
}

fn write_block<D: Device>(device: &mut D, block: u16, block_size: u32, buf: &[u8]) {
    device.erase_block(block as u32 * block_size);
    device.write(block as u32 * block_size, buf);
}

/// Read the partition table, falling back to the backup slots in order if
/// the primary slot reads back blank (erased but never written, which can
/// happen if a prior flush was interrupted after the erase but before the
/// write).
pub fn mount<D: Device>(device: &mut D, block_size: u32) -> PartitionTable {
    let len = block_size.min(NUM_BLOCKS as u32) as usize;
    let mut buf = [0u8; NUM_BLOCKS];

    device.read(PARTITION_BLOCK as u32 * block_size, &mut buf[..len]);
    let primary = PartitionTable::decode_from(&buf[..len]);
    if !primary.is_blank() {
        return primary;
    }

    for backup in BACKUP_BLOCKS {
        device.read(backup as u32 * block_size, &mut buf[..len]);
        let candidate = PartitionTable::decode_from(&buf[..len]);
        if !candidate.is_blank() {
            log::warn!("primary partition table blank, recovered from backup slot {backup}");
            return candidate;
        }
    }

    primary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MemoryDevice;

    fn device() -> MemoryDevice {
        MemoryDevice::new(NUM_BLOCKS, NUM_BLOCKS as u32)
    }

    #[test]
    fn blank_device_is_not_formatted() {
        let mut dev = device();
        assert!(!is_formatted(&mut dev, NUM_BLOCKS as u32));
    }

    #[test]
    fn stamped_superblock_is_formatted() {
        let mut dev = device();
        write_superblock(&mut dev, NUM_BLOCKS as u32);
        assert!(is_formatted(&mut dev, NUM_BLOCKS as u32));
    }

    #[test]
    fn entry_round_trips_through_flash_inversion() {
        let used = PartitionEntry { file_type: FileType::Raw, age: 9 };
        assert_eq!(PartitionEntry::from_flash_byte(used.to_flash_byte()), used);
        assert_eq!(PartitionEntry::FREE.to_flash_byte(), 0xFF);
        assert!(PartitionEntry::from_flash_byte(0xFF).is_free());
    }

    #[test]
    fn flush_then_mount_round_trips_table() {
        let mut dev = device();
        let mut table = PartitionTable::blank();
        table.set(5, PartitionEntry { file_type: FileType::Raw, age: 7 });
        table.set(100, PartitionEntry { file_type: FileType::Ecc, age: 3 });
        flush(&mut dev, NUM_BLOCKS as u32, &table);

        let mounted = mount(&mut dev, NUM_BLOCKS as u32);
        assert_eq!(mounted.get(5), PartitionEntry { file_type: FileType::Raw, age: 7 });
        assert_eq!(mounted.get(100), PartitionEntry { file_type: FileType::Ecc, age: 3 });
        assert!(mounted.get(6).is_free());
    }

    #[test]
    fn mount_falls_back_to_backup_when_primary_is_blank() {
        let mut dev = device();
        let mut table = PartitionTable::blank();
        table.set(42, PartitionEntry { file_type: FileType::Raw, age: 2 });

        let mut buf = [0u8; NUM_BLOCKS];
        table.encode_into(&mut buf);
        write_block(&mut dev, *BACKUP_BLOCKS.start(), NUM_BLOCKS as u32, &buf);

        let mounted = mount(&mut dev, NUM_BLOCKS as u32);
        assert_eq!(mounted.get(42), PartitionEntry { file_type: FileType::Raw, age: 2 });
    }

    #[test]
    fn seed_protected_range_uses_reserved_age() {
        let mut table = PartitionTable::blank();
        table.seed_protected_range(crate::PROTECTED_BLOCKS);
        assert_eq!(table.get(0).age, RESERVED_AGE);
        assert!(table.get(crate::PROTECTED_BLOCKS).is_free());
    }
}
