//! Block successor chains: the per-file linked list of blocks, and the
//! allocator-facing logic that grows a chain by one block.
//!
//! Each block's header stores only a *predecessor* pointer; the forward
//! ("successor") direction is never written to flash. It is rebuilt once,
//! at mount, by scanning every block's header and inverting the
//! predecessor links into an in-RAM successor table. [`NONE`] (block `0`,
//! the superblock, which can never legitimately be a data block's
//! predecessor) marks "no predecessor" / "no successor" in both the
//! on-flash field and the in-RAM table, chosen specifically so that
//! clearing a predecessor field down to `NONE` is always a pure bit-clear:
//! AND-ing any value down to zero never needs a `1` to appear.

use crate::allocator;
use crate::block::BlockHeader;
use crate::device::Device;
use crate::directory::FileType;
use crate::partition::PartitionTable;
use crate::{RocketFsError, BLOCK_HEADER_LEN, NUM_BLOCKS};

/// Sentinel meaning "no predecessor" / "no successor".
pub const NONE: u16 = 0;

/// In-RAM inversion of every block's predecessor pointer.
pub struct ChainTable {
    successor: [u16; NUM_BLOCKS],
}

impl ChainTable {
    pub fn empty() -> ChainTable {
        ChainTable { successor: [NONE; NUM_BLOCKS] }
    }

    pub fn successor_of(&self, block: u16) -> u16 {
        self.successor[block as usize]
    }

    fn set_successor(&mut self, predecessor: u16, successor: u16) {
        if predecessor != NONE {
            self.successor[predecessor as usize] = successor;
        }
    }

    /// Scan every block's on-flash header and invert predecessor pointers
    /// into the successor table. Called once, at mount.
    pub fn reconstruct<D: Device>(device: &mut D, num_blocks: u16, block_size: u32) -> ChainTable {
        let mut chain = ChainTable::empty();
        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        for block in 0..num_blocks {
            device.read(block as u32 * block_size, &mut buf);
            let header = BlockHeader::decode(&buf);
            if header.is_valid() {
                chain.set_successor(header.predecessor, block);
            }
        }
        chain
    }

    /// Walk from `head` to the end of its chain, bounded at `NUM_BLOCKS`
    /// hops. A chain that doesn't terminate within that bound is treated
    /// as corruption rather than walked forever.
    pub fn tail_of(&self, head: u16, file_id: u8) -> Result<u16, RocketFsError> {
        let mut current = head;
        for _ in 0..NUM_BLOCKS {
            let next = self.successor_of(current);
            if next == NONE {
                return Ok(current);
            }
            current = next;
        }
        Err(RocketFsError::CorruptChain { file_id })
    }
}

/// What happened to a block reclaimed to satisfy a [`grow`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub file_id: u8,
    /// The evicted file's new head, or `None` if its entire chain was
    /// exactly the reclaimed block.
    pub new_head: Option<u16>,
}

/// Result of successfully growing a chain by one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowOutcome {
    pub block: u16,
    pub eviction: Option<Eviction>,
}

/// Append a fresh block after `tail`, reclaiming the oldest occupied block
/// first if the device is full. Writes the new block's header (predecessor
/// = `tail`) and updates `chain` and `table` to match.
pub fn grow<D: Device>(
    device: &mut D,
    block_size: u32,
    table: &mut PartitionTable,
    chain: &mut ChainTable,
    tail: u16,
    file_id: u8,
    file_type: FileType,
) -> Result<GrowOutcome, RocketFsError> {
    let (block, eviction) = match allocator::allocate(table, file_type) {
        Some(block) => (block, None),
        None => {
            let evicted = reclaim_oldest(device, block_size, table, chain)?;
            match allocator::allocate(table, file_type) {
                Some(block) => (block, Some(evicted)),
                None => return Err(RocketFsError::DirectoryFull),
            }
        }
    };

    let header = BlockHeader::new(file_id, tail);
    let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
    header.encode(&mut buf);
    device.write(block as u32 * block_size, &buf);
    chain.set_successor(tail, block);

    Ok(GrowOutcome { block, eviction })
}

fn reclaim_oldest<D: Device>(
    device: &mut D,
    block_size: u32,
    table: &mut PartitionTable,
    chain: &mut ChainTable,
) -> Result<Eviction, RocketFsError> {
    allocator::decay(table);
    let victim = allocator::oldest_occupied(table).ok_or(RocketFsError::DirectoryFull)?;

    let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
    device.read(victim as u32 * block_size, &mut buf);
    let header = BlockHeader::decode(&buf);

    let successor = chain.successor_of(victim);
    let new_head = if successor != NONE {
        patch_predecessor_to_none(device, successor, block_size);
        Some(successor)
    } else {
        None
    };

    allocator::free(table, victim);
    Ok(Eviction { file_id: header.file_id, new_head })
}

/// Clear a block's predecessor field to [`NONE`] with a bit-clear-only
/// write: the patch buffer is all-ones except the predecessor bytes, so
/// every other header field is left untouched by the device's AND-on-write
/// semantics.
fn patch_predecessor_to_none<D: Device>(device: &mut D, block: u16, block_size: u32) {
    let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
    device.read(block as u32 * block_size, &mut buf);
    let mut header = BlockHeader::decode(&buf);
    header.predecessor = NONE;

    let mut patch = [0xFFu8; BLOCK_HEADER_LEN as usize];
    header.encode(&mut patch);
    // Anything the header encoder didn't touch (there is nothing left at
    // this width) stays 0xFF and is therefore a no-op under AND-on-write;
    // the predecessor bytes are the only ones actually cleared.
    device.write(block as u32 * block_size, &patch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MemoryDevice;
    use crate::{NUM_BLOCKS as N, PROTECTED_BLOCKS};

    fn device() -> MemoryDevice {
        MemoryDevice::new(N, BLOCK_HEADER_LEN)
    }

    #[test]
    fn reconstruct_inverts_predecessor_links() {
        let mut dev = device();
        let header_a = BlockHeader::new(3, NONE);
        let header_b = BlockHeader::new(3, PROTECTED_BLOCKS);
        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        header_a.encode(&mut buf);
        dev.write(PROTECTED_BLOCKS as u32 * BLOCK_HEADER_LEN, &buf);
        header_b.encode(&mut buf);
        dev.write((PROTECTED_BLOCKS + 1) as u32 * BLOCK_HEADER_LEN, &buf);

        let chain = ChainTable::reconstruct(&mut dev, N as u16, BLOCK_HEADER_LEN);
        assert_eq!(chain.successor_of(PROTECTED_BLOCKS), PROTECTED_BLOCKS + 1);
        assert_eq!(chain.tail_of(PROTECTED_BLOCKS, 3).unwrap(), PROTECTED_BLOCKS + 1);
    }

    #[test]
    fn tail_of_detects_cycles() {
        let mut chain = ChainTable::empty();
        chain.set_successor(5, 6);
        chain.set_successor(6, 5);
        assert_eq!(chain.tail_of(5, 0), Err(RocketFsError::CorruptChain { file_id: 0 }));
    }

    #[test]
    fn grow_allocates_and_links_when_space_available() {
        let mut dev = device();
        let mut table = PartitionTable::blank();
        let mut chain = ChainTable::empty();

        let outcome =
            grow(&mut dev, BLOCK_HEADER_LEN, &mut table, &mut chain, NONE, 9, FileType::Raw)
                .unwrap();
        assert!(outcome.eviction.is_none());
        assert!(!table.get(outcome.block).is_free());

        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        dev.read(outcome.block as u32 * BLOCK_HEADER_LEN, &mut buf);
        let header = BlockHeader::decode(&buf);
        assert_eq!(header.file_id, 9);
        assert_eq!(header.predecessor, NONE);
    }

    #[test]
    fn grow_reclaims_oldest_block_and_reports_eviction() {
        let mut dev = device();
        let mut table = PartitionTable::blank();
        let mut chain = ChainTable::empty();

        // Fill every data block for file 1, forming a single long chain.
        let mut tail = NONE;
        let mut first = NONE;
        loop {
            match allocator::allocate(&mut table, FileType::Raw) {
                Some(block) => {
                    let header = BlockHeader::new(1, tail);
                    let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
                    header.encode(&mut buf);
                    dev.write(block as u32 * BLOCK_HEADER_LEN, &buf);
                    chain.set_successor(tail, block);
                    if first == NONE {
                        first = block;
                    }
                    tail = block;
                }
                None => break,
            }
        }

        let outcome =
            grow(&mut dev, BLOCK_HEADER_LEN, &mut table, &mut chain, tail, 2, FileType::Raw)
                .unwrap();
        let eviction = outcome.eviction.expect("device was full, reclamation must occur");
        assert_eq!(eviction.file_id, 1);
        assert_eq!(eviction.new_head, Some(chain.successor_of(first)));
    }
}
