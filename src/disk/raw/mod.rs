use crate::disk::{transfer_offset, BlockDevice};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Block device on top of any seekable byte stream, e.g. a disk image file
/// or a raw device node.
pub struct RawDisk<B>
where
    B: Read + Seek + Write,
{
    backend: B,
    block_size: usize,
    num_blocks: u64,
}

impl<B> RawDisk<B>
where
    B: Read + Seek + Write,
{
    pub fn open(backend: B, block_size: usize, num_blocks: u64) -> Self {
        Self {
            backend,
            block_size,
            num_blocks,
        }
    }

    /// Derives the block count from the stream length. A trailing partial
    /// block is not addressable.
    pub fn from_stream(mut backend: B, block_size: usize) -> io::Result<Self> {
        let len = backend.seek(SeekFrom::End(0))?;
        Ok(Self::open(backend, block_size, len / block_size as u64))
    }

    pub fn into_inner(self) -> B {
        self.backend
    }
}

impl<B> BlockDevice for RawDisk<B>
where
    B: Read + Seek + Write,
{
    fn block_size(&self) -> io::Result<usize> {
        Ok(self.block_size)
    }

    fn block_count(&self) -> io::Result<u64> {
        Ok(self.num_blocks)
    }

    fn read_blocks(&mut self, ba: u64, count: usize, buf: &mut [u8]) -> io::Result<()> {
        let offset = transfer_offset(self.block_size, self.num_blocks, ba, count, buf.len())?;
        self.backend.seek(SeekFrom::Start(offset))?;
        self.backend.read_exact(buf)
    }

    fn write_blocks(&mut self, ba: u64, count: usize, buf: &[u8]) -> io::Result<()> {
        let offset = transfer_offset(self.block_size, self.num_blocks, ba, count, buf.len())?;
        self.backend.seek(SeekFrom::Start(offset))?;
        self.backend.write_all(buf)?;
        self.backend.flush()
    }
}
