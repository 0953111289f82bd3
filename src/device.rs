//! The driver contract RocketFS expects from the host.
//!
//! A `Device` abstracts over a contiguous, byte-addressed NOR flash region.
//! Implementations are expected to panic on an out-of-range access rather
//! than return an error: the geometry is fixed and validated once, at
//! construction, so an out-of-range access is a programming bug in this
//! crate, not a condition the host needs to recover from.

/// Raw flash access, provided by the host.
pub trait Device {
    /// Total addressable size of the device, in bytes.
    fn capacity(&self) -> u32;

    /// Size of one erase/program unit ("block" / "subsector"), in bytes.
    fn block_size(&self) -> u32;

    /// Copy `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&mut self, addr: u32, buf: &mut [u8]);

    /// Program `buf` at `addr`. NOR semantics: bits can only be cleared
    /// (1 -> 0); the caller is responsible for erasing first when a 0 -> 1
    /// transition is needed.
    fn write(&mut self, addr: u32, buf: &[u8]);

    /// Erase the block containing `addr` back to all-ones.
    fn erase_block(&mut self, addr: u32);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Device;

    /// An in-memory stand-in for flash, used by every test in this crate.
    ///
    /// Mirrors NOR semantics closely enough to exercise the allocator and
    /// chain logic: `write` can only clear bits, `erase_block` resets a
    /// whole block to all-ones.
    pub struct MemoryDevice {
        block_size: u32,
        data: std::vec::Vec<u8>,
    }

    impl MemoryDevice {
        pub fn new(num_blocks: usize, block_size: u32) -> MemoryDevice {
            MemoryDevice {
                block_size,
                data: std::vec![0xFFu8; num_blocks * block_size as usize],
            }
        }

        pub fn raw(&self, addr: u32, len: usize) -> &[u8] {
            let addr = addr as usize;
            &self.data[addr..addr + len]
        }
    }

    impl Device for MemoryDevice {
        fn capacity(&self) -> u32 {
            self.data.len() as u32
        }

        fn block_size(&self) -> u32 {
            self.block_size
        }

        fn read(&mut self, addr: u32, buf: &mut [u8]) {
            let addr = addr as usize;
            buf.copy_from_slice(&self.data[addr..addr + buf.len()]);
        }

        fn write(&mut self, addr: u32, buf: &[u8]) {
            let addr = addr as usize;
            for (dst, &src) in self.data[addr..addr + buf.len()].iter_mut().zip(buf) {
                *dst &= src;
            }
        }

        fn erase_block(&mut self, addr: u32) {
            let block_size = self.block_size as usize;
            let start = (addr as usize / block_size) * block_size;
            for byte in &mut self.data[start..start + block_size] {
                *byte = 0xFF;
            }
        }
    }

    #[test]
    fn write_only_clears_bits() {
        let mut dev = MemoryDevice::new(4, 64);
        dev.write(0, &[0b1010_1010]);
        dev.write(0, &[0b1111_0000]);
        assert_eq!(dev.raw(0, 1)[0], 0b1010_0000);
    }

    #[test]
    fn erase_resets_whole_block() {
        let mut dev = MemoryDevice::new(4, 64);
        dev.write(0, &[0x00; 64]);
        dev.erase_block(10);
        assert_eq!(dev.raw(0, 64), &[0xFFu8; 64][..]);
    }
}
