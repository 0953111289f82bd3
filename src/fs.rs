//! Top-level filesystem: owns the device and every fixed-size in-RAM table,
//! and orchestrates the other modules into the public API.

use crate::allocator;
use crate::block::BlockHeader;
use crate::chain::{self, ChainTable};
use crate::device::Device;
use crate::directory::{self, FileRecord, FileType, FILENAME_FIELD_LEN};
use crate::partition::{self, PartitionTable};
use crate::stream::{Stream, StreamMode};
use crate::{
    RocketFsError, BLOCK_HEADER_LEN, NUM_BLOCKS, NUM_FILES, PROTECTED_BLOCKS,
    RESERVED_TAIL_BLOCKS, USAGE_REGIONS,
};

/// A lightweight, `Copy` reference to a directory slot. Obtained from
/// [`RocketFs::newfile`] or [`RocketFs::getfile`] and consumed by
/// [`RocketFs::open_stream`] or [`RocketFs::delfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub(crate) u8);

impl FileHandle {
    pub fn id(self) -> u8 {
        self.0
    }
}

/// The filesystem instance: one device, bound at construction, holding the
/// partition table, successor chain and file directory entirely in RAM.
pub struct RocketFs<D: Device> {
    device: D,
    block_size: u32,
    num_blocks: u16,
    table: PartitionTable,
    chain: ChainTable,
    files: [FileRecord; NUM_FILES],
    mounted: bool,
}

impl<D: Device> RocketFs<D> {
    /// Validate `device`'s geometry and bind it. Does not touch flash;
    /// call [`mount`](Self::mount) or [`format`](Self::format) next.
    pub fn new(device: D) -> Result<RocketFs<D>, RocketFsError> {
        let block_size = device.block_size();
        if block_size < partition::MIN_BLOCK_SIZE {
            return Err(RocketFsError::BlockSizeTooSmall {
                block_size,
                minimum: partition::MIN_BLOCK_SIZE,
            });
        }
        let expected = block_size * NUM_BLOCKS as u32;
        if device.capacity() != expected {
            return Err(RocketFsError::CapacityMismatch {
                capacity: device.capacity(),
                expected,
            });
        }

        Ok(RocketFs {
            device,
            block_size,
            num_blocks: NUM_BLOCKS as u16,
            table: PartitionTable::blank(),
            chain: ChainTable::empty(),
            files: [FileRecord::EMPTY; NUM_FILES],
            mounted: false,
        })
    }

    fn region_size(&self) -> u32 {
        self.block_size / USAGE_REGIONS
    }

    fn data_range(&self) -> core::ops::Range<u16> {
        PROTECTED_BLOCKS..(self.num_blocks - RESERVED_TAIL_BLOCKS)
    }

    /// Erase the metadata region and write a blank superblock, partition
    /// table and file directory. Idempotent.
    pub fn format(&mut self) -> Result<(), RocketFsError> {
        log::info!("formatting volume");
        partition::write_superblock(&mut self.device, self.block_size);

        let mut table = PartitionTable::blank();
        table.seed_protected_range(PROTECTED_BLOCKS);
        partition::flush(&mut self.device, self.block_size, &table);

        self.table = table;
        self.chain = ChainTable::empty();
        self.files = [FileRecord::EMPTY; NUM_FILES];
        self.mounted = true;
        Ok(())
    }

    /// Recognise the superblock, load the partition table (with backup-slot
    /// fallback) and reconstruct every chain and file record by scanning
    /// block headers. Formats the volume if no superblock is recognised.
    pub fn mount(&mut self) -> Result<(), RocketFsError> {
        if !partition::is_formatted(&mut self.device, self.block_size) {
            log::warn!("superblock not recognized, formatting");
            return self.format();
        }

        self.table = partition::mount(&mut self.device, self.block_size);
        if self.table.is_blank() {
            log::error!("partition table and every backup slot are blank, formatting");
            return self.format();
        }
        self.chain = ChainTable::reconstruct(&mut self.device, self.num_blocks, self.block_size);
        self.files = [FileRecord::EMPTY; NUM_FILES];

        let block_size = self.block_size;
        let mut header_buf = [0u8; BLOCK_HEADER_LEN as usize];

        for block in PROTECTED_BLOCKS..(self.num_blocks - RESERVED_TAIL_BLOCKS) {
            if self.table.get(block).is_free() {
                continue;
            }
            self.device.read(block as u32 * block_size, &mut header_buf);
            let header = BlockHeader::decode(&header_buf);
            if !header.is_valid() {
                log::warn!("block {block} has an invalid header, leaving it orphaned");
                continue;
            }
            if header.predecessor != chain::NONE {
                continue;
            }

            let mut field = [0u8; FILENAME_FIELD_LEN];
            self.device
                .read(block as u32 * block_size + BLOCK_HEADER_LEN, &mut field);
            let filename = directory::decode_field(&field);
            let file_type = self.table.get(block).file_type;

            self.files[header.file_id as usize] = FileRecord {
                filename,
                file_type,
                hash: directory::hash_filename(&filename),
                first_block: block,
                last_block: block,
                length: 0,
                used_blocks: 0,
            };
        }

        let region_size = self.region_size();
        for file_id in 0..NUM_FILES {
            if self.files[file_id].is_empty() {
                continue;
            }
            let mut current = self.files[file_id].first_block;
            let mut length = 0u32;
            let mut used_blocks = 0u16;
            let mut hops = 0usize;
            let mut last_block = current;
            loop {
                self.device.read(current as u32 * block_size, &mut header_buf);
                let header = BlockHeader::decode(&header_buf);
                length += header.used_len(region_size);
                used_blocks += 1;
                last_block = current;
                hops += 1;
                if hops > NUM_BLOCKS {
                    log::error!(
                        "chain for file {file_id} did not terminate within {NUM_BLOCKS} hops, isolating it"
                    );
                    break;
                }
                let next = self.chain.successor_of(current);
                if next == chain::NONE {
                    break;
                }
                current = next;
            }
            self.files[file_id].last_block = last_block;
            self.files[file_id].length = length;
            self.files[file_id].used_blocks = used_blocks;
        }

        self.mounted = true;
        log::info!("mounted, {} file(s) recovered", self.files.iter().filter(|f| !f.is_empty()).count());
        Ok(())
    }

    /// Write the in-RAM partition table back out to its primary and backup
    /// slots.
    pub fn flush(&mut self) -> Result<(), RocketFsError> {
        if !self.mounted {
            return Err(RocketFsError::NotMounted);
        }
        partition::flush(&mut self.device, self.block_size, &self.table);
        Ok(())
    }

    /// Flush and mark the instance unmounted. A subsequent operation other
    /// than `mount`/`format` returns [`RocketFsError::NotMounted`].
    pub fn unmount(&mut self) -> Result<(), RocketFsError> {
        self.flush()?;
        self.mounted = false;
        Ok(())
    }

    /// Create a new file named `name` of the given type, allocating its
    /// head block.
    pub fn newfile(&mut self, name: &str, file_type: FileType) -> Result<FileHandle, RocketFsError> {
        if !self.mounted {
            return Err(RocketFsError::NotMounted);
        }
        let filename = directory::copy_name(name);
        let slot = directory::find_slot_for_new(&self.files, &filename).map_err(|err| match err {
            directory::NewFileError::DuplicateName => RocketFsError::DuplicateName,
            directory::NewFileError::DirectoryFull => RocketFsError::DirectoryFull,
        })?;

        let outcome = chain::grow(
            &mut self.device,
            self.block_size,
            &mut self.table,
            &mut self.chain,
            chain::NONE,
            slot as u8,
            file_type,
        )?;
        if let Some(eviction) = outcome.eviction {
            self.apply_eviction(eviction);
        }

        let field = directory::encode_field(&filename);
        self.device
            .write(outcome.block as u32 * self.block_size + BLOCK_HEADER_LEN, &field);

        self.files[slot] = FileRecord {
            filename,
            file_type,
            hash: directory::hash_filename(&filename),
            first_block: outcome.block,
            last_block: outcome.block,
            length: 0,
            used_blocks: 1,
        };
        log::info!("created file '{name}' at slot {slot}, head block {}", outcome.block);
        Ok(FileHandle(slot as u8))
    }

    /// Look up a file by name.
    pub fn getfile(&self, name: &str) -> Result<FileHandle, RocketFsError> {
        if !self.mounted {
            return Err(RocketFsError::NotMounted);
        }
        let filename = directory::copy_name(name);
        directory::find(&self.files, &filename)
            .map(|slot| FileHandle(slot as u8))
            .ok_or(RocketFsError::NoSuchFile)
    }

    /// Free every block in `handle`'s chain and clear its directory slot.
    pub fn delfile(&mut self, handle: FileHandle) -> Result<(), RocketFsError> {
        if !self.mounted {
            return Err(RocketFsError::NotMounted);
        }
        let slot = handle.0 as usize;
        if self.files[slot].is_empty() {
            return Err(RocketFsError::NoSuchFile);
        }

        let mut current = self.files[slot].first_block;
        for _ in 0..NUM_BLOCKS {
            let next = self.chain.successor_of(current);
            allocator::free(&mut self.table, current);
            if next == chain::NONE {
                break;
            }
            current = next;
        }
        self.files[slot] = FileRecord::EMPTY;
        log::info!("deleted file at slot {slot}");
        Ok(())
    }

    /// Open a cursor over `handle`. Borrows this instance exclusively for
    /// the stream's lifetime: the borrow checker is the enforcement
    /// mechanism for "at most one open stream", not a runtime flag.
    pub fn open_stream(&mut self, handle: FileHandle, mode: StreamMode) -> Result<Stream<'_, D>, RocketFsError> {
        if !self.mounted {
            return Err(RocketFsError::NotMounted);
        }
        let record = self.files[handle.0 as usize];
        if record.is_empty() {
            return Err(RocketFsError::NoSuchFile);
        }
        if record.file_type != FileType::Raw {
            return Err(RocketFsError::UnknownFileType);
        }
        Stream::open(self, handle.0, mode)
    }

    pub fn length_of(&self, handle: FileHandle) -> u32 {
        self.files[handle.0 as usize].length
    }

    /// Number of blocks actually allocated to `handle`'s chain. Exposed for
    /// tests that need to tell "wrote more bytes" apart from "actually grew
    /// the chain and registered ownership in the partition table".
    #[cfg(test)]
    pub(crate) fn used_blocks_of(&self, handle: FileHandle) -> u16 {
        self.files[handle.0 as usize].used_blocks
    }

    #[cfg(test)]
    pub(crate) fn block_is_owned(&self, block: u16) -> bool {
        !self.table.get(block).is_free()
    }

    fn apply_eviction(&mut self, eviction: chain::Eviction) {
        let block_size = self.block_size;
        let record = &mut self.files[eviction.file_id as usize];
        record.used_blocks = record.used_blocks.saturating_sub(1);
        record.length = record.length.saturating_sub(block_size);
        log::warn!(
            "reclaimed oldest block from file slot {}, used_blocks now {}",
            eviction.file_id,
            record.used_blocks
        );
        match eviction.new_head {
            Some(new_head) => record.first_block = new_head,
            None => *record = FileRecord::EMPTY,
        }
    }

    pub(crate) fn block_size(&self) -> u32 {
        self.block_size
    }

    pub(crate) fn used_len_of(&mut self, block: u16) -> u32 {
        let block_size = self.block_size;
        let region_size = self.region_size();
        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        self.device.read(block as u32 * block_size, &mut buf);
        BlockHeader::decode(&buf).used_len(region_size)
    }

    pub(crate) fn first_block_of(&self, file_id: u8) -> u16 {
        self.files[file_id as usize].first_block
    }

    pub(crate) fn last_block_of(&self, file_id: u8) -> u16 {
        self.files[file_id as usize].last_block
    }

    /// Map a logical cursor forward by up to `buf.len()` bytes and copy the
    /// readable prefix into `buf`. Returns `0` at end-of-chain.
    ///
    /// `addr` lands exactly on a multiple of `block_size` (`raw_off == 0`)
    /// only once a block has been completely consumed; that case, not
    /// `addr / block_size`, is what identifies "follow the chain", since the
    /// arithmetically-next block id is not necessarily the real successor.
    pub(crate) fn access_read(&mut self, addr: &mut u32, buf: &mut [u8]) -> u32 {
        let block_size = self.block_size;
        let raw_off = *addr % block_size;
        let (mut block, mut off);
        if raw_off == 0 {
            let filled = (*addr / block_size) as u16 - 1;
            let successor = self.chain.successor_of(filled);
            if successor == chain::NONE {
                return 0;
            }
            block = successor;
            off = BLOCK_HEADER_LEN;
        } else {
            block = (*addr / block_size) as u16;
            off = raw_off;
        }

        let remaining = block_size - off;
        let grant = (buf.len() as u32).min(remaining) as usize;
        self.device.read(block as u32 * block_size + off, &mut buf[..grant]);
        *addr = block as u32 * block_size + off + grant as u32;
        grant as u32
    }

    /// Map a logical cursor forward by up to `data.len()` bytes, program
    /// them, and mark their regions used. Always writes at least one byte
    /// unless `data` is empty (write never hits EOF: the chain grows
    /// instead, reclaiming the oldest block if the device is full).
    pub(crate) fn access_write(&mut self, file_id: u8, addr: &mut u32, data: &[u8]) -> Result<u32, RocketFsError> {
        if data.is_empty() {
            return Ok(0);
        }
        let block_size = self.block_size;
        let region_size = self.region_size();
        let raw_off = *addr % block_size;
        let (mut block, mut off);
        if raw_off == 0 {
            let filled = (*addr / block_size) as u16 - 1;
            let file_type = self.files[file_id as usize].file_type;
            let outcome = chain::grow(
                &mut self.device,
                block_size,
                &mut self.table,
                &mut self.chain,
                filled,
                file_id,
                file_type,
            )?;
            if let Some(eviction) = outcome.eviction {
                self.apply_eviction(eviction);
            }
            self.files[file_id as usize].used_blocks += 1;
            self.files[file_id as usize].last_block = outcome.block;
            block = outcome.block;
            off = BLOCK_HEADER_LEN;
        } else {
            block = (*addr / block_size) as u16;
            off = raw_off;
        }

        let remaining = block_size - off;
        let grant = (data.len() as u32).min(remaining) as usize;
        self.device
            .write(block as u32 * block_size + off, &data[..grant]);

        let mut header_buf = [0u8; BLOCK_HEADER_LEN as usize];
        self.device.read(block as u32 * block_size, &mut header_buf);
        let mut header = BlockHeader::decode(&header_buf);
        header.mark_written(off - BLOCK_HEADER_LEN, grant as u32, region_size);
        let mut patch = [0xFFu8; BLOCK_HEADER_LEN as usize];
        header.encode(&mut patch);
        self.device.write(block as u32 * block_size, &patch);

        self.files[file_id as usize].length += grant as u32;
        *addr = block as u32 * block_size + off + grant as u32;
        Ok(grant as u32)
    }
}
