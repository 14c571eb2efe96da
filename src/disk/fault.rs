use crate::disk::BlockDevice;
use std::io;

/// Test wrapper that records writes and fails on demand.
pub struct FaultyDisk<D> {
    pub inner: D,
    /// Number of writes that still succeed before every further write fails.
    pub writes_left: Option<usize>,
    pub fail_geometry: bool,
    /// Reported instead of the real block count. Transfers past the end of
    /// `inner` still fail.
    pub fake_block_count: Option<u64>,
    pub writes: Vec<u64>,
}

impl<D> FaultyDisk<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            writes_left: None,
            fail_geometry: false,
            fake_block_count: None,
            writes: Vec::new(),
        }
    }
}

impl<D: BlockDevice> BlockDevice for FaultyDisk<D> {
    fn block_size(&self) -> io::Result<usize> {
        if self.fail_geometry {
            return Err(io::Error::new(io::ErrorKind::Other, "injected geometry failure"));
        }
        self.inner.block_size()
    }

    fn block_count(&self) -> io::Result<u64> {
        if self.fail_geometry {
            return Err(io::Error::new(io::ErrorKind::Other, "injected geometry failure"));
        }
        match self.fake_block_count {
            Some(n) => Ok(n),
            None => self.inner.block_count(),
        }
    }

    fn read_blocks(&mut self, ba: u64, count: usize, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_blocks(ba, count, buf)
    }

    fn write_blocks(&mut self, ba: u64, count: usize, buf: &[u8]) -> io::Result<()> {
        match self.writes_left {
            Some(0) => {
                return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"))
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        self.inner.write_blocks(ba, count, buf)?;
        self.writes.push(ba);
        Ok(())
    }
}
