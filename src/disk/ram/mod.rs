use crate::disk::{transfer_offset, BlockDevice};
use std::io;

/// Device backed by a vector in memory.
pub struct RamDisk {
    buffer: Vec<u8>,
    block_size: usize,
}

impl RamDisk {
    pub fn new_zeroed(block_size: usize, num_blocks: u64) -> Self {
        let size_in_bytes = block_size * num_blocks as usize;

        Self {
            buffer: vec![0u8; size_in_bytes],
            block_size,
        }
    }

    pub fn from_vec(vector: Vec<u8>, block_size: usize) -> Self {
        assert_eq!(vector.len() % block_size, 0);

        Self {
            buffer: vector,
            block_size,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Raw access that bypasses block granularity, useful for planting or
    /// damaging on-disk structures.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    fn num_blocks(&self) -> u64 {
        (self.buffer.len() / self.block_size) as u64
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> io::Result<usize> {
        Ok(self.block_size)
    }

    fn block_count(&self) -> io::Result<u64> {
        Ok(self.num_blocks())
    }

    fn read_blocks(&mut self, ba: u64, count: usize, buf: &mut [u8]) -> io::Result<()> {
        let offset = transfer_offset(self.block_size, self.num_blocks(), ba, count, buf.len())?
            as usize;
        buf.copy_from_slice(&self.buffer[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_blocks(&mut self, ba: u64, count: usize, buf: &[u8]) -> io::Result<()> {
        let offset = transfer_offset(self.block_size, self.num_blocks(), ba, count, buf.len())?
            as usize;
        self.buffer[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}
