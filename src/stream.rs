//! Stateful cursor over a file, using the access mapper in [`crate::fs`] to
//! translate logical offsets into physical block accesses.
//!
//! A `Stream` borrows its [`RocketFs`](crate::fs::RocketFs) exclusively for
//! its lifetime. That borrow *is* the "at most one open stream" policy: two
//! streams over the same filesystem simply cannot coexist, so there is
//! nothing to check at runtime and nothing that can be forgotten.

use crate::device::Device;
use crate::fs::RocketFs;
use crate::{RocketFsError, BLOCK_HEADER_LEN};

/// How a stream's cursor is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Start at the head block's payload base. NOR can only clear bits, so
    /// this does not erase existing data — it only lets writes clear bits
    /// that a prior write left set.
    Overwrite,
    /// Start past the last byte already written, so writes extend the
    /// file instead of retreading it.
    Append,
}

/// A cursor bound to one file.
pub struct Stream<'a, D: Device> {
    fs: &'a mut RocketFs<D>,
    file_id: u8,
    addr: u32,
    eof: bool,
}

impl<'a, D: Device> Stream<'a, D> {
    pub(crate) fn open(fs: &'a mut RocketFs<D>, file_id: u8, mode: StreamMode) -> Result<Stream<'a, D>, RocketFsError> {
        let block_size = fs.block_size();
        let addr = match mode {
            StreamMode::Overwrite => fs.first_block_of(file_id) as u32 * block_size + BLOCK_HEADER_LEN,
            StreamMode::Append => {
                let last = fs.last_block_of(file_id);
                last as u32 * block_size + BLOCK_HEADER_LEN + fs.used_len_of(last)
            }
        };
        Ok(Stream { fs, file_id, addr, eof: false })
    }

    /// Has the most recent read run past the end of the file's data?
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Read up to `buf.len()` bytes, looping across block boundaries.
    /// Returns the number of bytes actually read, which is less than
    /// `buf.len()` exactly when [`eof`](Self::eof) becomes true.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> u32 {
        let mut total = 0usize;
        while total < buf.len() {
            let got = self.fs.access_read(&mut self.addr, &mut buf[total..]);
            if got == 0 {
                self.eof = true;
                break;
            }
            total += got as usize;
        }
        total as u32
    }

    /// Write `data`, looping across block boundaries and growing the chain
    /// (possibly reclaiming the oldest block elsewhere) as needed. Writes
    /// never hit end-of-file.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<u32, RocketFsError> {
        let mut total = 0usize;
        while total < data.len() {
            let written = self.fs.access_write(self.file_id, &mut self.addr, &data[total..])?;
            total += written as usize;
        }
        Ok(total as u32)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        (self.read_bytes(&mut buf) == 1).then_some(buf[0])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), RocketFsError> {
        self.write_bytes(&[value]).map(|_| ())
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let mut buf = [0u8; 2];
        (self.read_bytes(&mut buf) == 2).then(|| crate::codec::read_u16(&buf))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), RocketFsError> {
        let mut buf = [0u8; 2];
        crate::codec::write_u16(&mut buf, value);
        self.write_bytes(&buf).map(|_| ())
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let mut buf = [0u8; 4];
        (self.read_bytes(&mut buf) == 4).then(|| crate::codec::read_u32(&buf))
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), RocketFsError> {
        let mut buf = [0u8; 4];
        crate::codec::write_u32(&mut buf, value);
        self.write_bytes(&buf).map(|_| ())
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        let mut buf = [0u8; 8];
        (self.read_bytes(&mut buf) == 8).then(|| crate::codec::read_u64(&buf))
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), RocketFsError> {
        let mut buf = [0u8; 8];
        crate::codec::write_u64(&mut buf, value);
        self.write_bytes(&buf).map(|_| ())
    }

    /// Flush the partition table (persisting the age/type bytes of any
    /// block allocated during this stream's lifetime) and release the
    /// borrow on the filesystem.
    pub fn close(self) -> Result<(), RocketFsError> {
        self.fs.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MemoryDevice;
    use crate::directory::FileType;
    use crate::fs::RocketFs;
    use crate::NUM_BLOCKS;

    fn mounted_fs() -> RocketFs<MemoryDevice> {
        let device = MemoryDevice::new(NUM_BLOCKS, NUM_BLOCKS as u32);
        let mut fs = RocketFs::new(device).unwrap();
        fs.format().unwrap();
        fs
    }

    #[test]
    fn append_write_then_read_round_trips() {
        let mut fs = mounted_fs();
        let handle = fs.newfile("beacon", FileType::Raw).unwrap();

        {
            let mut stream = fs.open_stream(handle, StreamMode::Append).unwrap();
            stream.write_bytes(b"hello").unwrap();
            stream.close().unwrap();
        }

        let mut stream = fs.open_stream(handle, StreamMode::Overwrite).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(stream.read_bytes(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert!(!stream.eof());
    }

    #[test]
    fn read_past_end_sets_eof() {
        let mut fs = mounted_fs();
        let handle = fs.newfile("beacon", FileType::Raw).unwrap();
        {
            let mut stream = fs.open_stream(handle, StreamMode::Append).unwrap();
            stream.write_bytes(b"hi").unwrap();
            stream.close().unwrap();
        }

        let mut stream = fs.open_stream(handle, StreamMode::Overwrite).unwrap();
        let mut buf = [0u8; 16];
        let read = stream.read_bytes(&mut buf);
        assert!(read < 16);
        assert!(stream.eof());
    }

    #[test]
    fn typed_word_round_trips() {
        let mut fs = mounted_fs();
        let handle = fs.newfile("values", FileType::Raw).unwrap();
        {
            let mut stream = fs.open_stream(handle, StreamMode::Append).unwrap();
            stream.write_u64(0x0123_4567_89AB_CDEF).unwrap();
            stream.close().unwrap();
        }

        let mut stream = fs.open_stream(handle, StreamMode::Overwrite).unwrap();
        assert_eq!(stream.read_u64(), Some(0x0123_4567_89AB_CDEF));
    }

    #[test]
    fn append_resumes_after_existing_data() {
        let mut fs = mounted_fs();
        let handle = fs.newfile("log", FileType::Raw).unwrap();
        {
            let mut stream = fs.open_stream(handle, StreamMode::Append).unwrap();
            stream.write_bytes(b"abc").unwrap();
            stream.close().unwrap();
        }
        {
            let mut stream = fs.open_stream(handle, StreamMode::Append).unwrap();
            stream.write_bytes(b"def").unwrap();
            stream.close().unwrap();
        }

        let mut stream = fs.open_stream(handle, StreamMode::Overwrite).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(stream.read_bytes(&mut buf), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn write_spanning_a_block_boundary_grows_the_chain() {
        let device = MemoryDevice::new(NUM_BLOCKS, NUM_BLOCKS as u32);
        let mut fs = RocketFs::new(device).unwrap();
        fs.format().unwrap();
        let handle = fs.newfile("chunked", FileType::Raw).unwrap();

        let block_size = NUM_BLOCKS as u32;
        let payload = vec![0xABu8; (block_size * 2) as usize];
        {
            let mut stream = fs.open_stream(handle, StreamMode::Append).unwrap();
            stream.write_bytes(&payload).unwrap();
            stream.close().unwrap();
        }

        assert!(fs.length_of(handle) > block_size - BLOCK_HEADER_LEN);
        // A write spanning block boundaries must actually grow the chain
        // and register ownership of every block it lands in, not just walk
        // past the end of the first allocated block while leaving the rest
        // of the partition table free.
        assert!(fs.used_blocks_of(handle) >= 3);
        let first = fs.first_block_of(handle.0);
        let last = fs.last_block_of(handle.0);
        assert!(fs.block_is_owned(first));
        assert!(fs.block_is_owned(last));
        assert_ne!(first, last);
    }
}
