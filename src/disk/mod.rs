#[cfg(test)]
pub(crate) mod fault;
pub mod ram;
pub mod raw;

pub use ram::RamDisk;
pub use raw::RawDisk;

use std::io;

/// Block-granular access to a storage device.
///
/// Addresses and counts are expressed in device blocks. A transfer either
/// moves all `count * block_size` bytes or fails, there are no short reads
/// or writes. Implementations do no caching on behalf of the label code.
pub trait BlockDevice {
    fn block_size(&self) -> io::Result<usize>;
    fn block_count(&self) -> io::Result<u64>;
    fn read_blocks(&mut self, ba: u64, count: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_blocks(&mut self, ba: u64, count: usize, buf: &[u8]) -> io::Result<()>;
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice + ?Sized,
{
    fn block_size(&self) -> io::Result<usize> {
        (**self).block_size()
    }
    fn block_count(&self) -> io::Result<u64> {
        (**self).block_count()
    }
    fn read_blocks(&mut self, ba: u64, count: usize, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_blocks(ba, count, buf)
    }
    fn write_blocks(&mut self, ba: u64, count: usize, buf: &[u8]) -> io::Result<()> {
        (**self).write_blocks(ba, count, buf)
    }
}

impl<T> BlockDevice for Box<T>
where
    T: BlockDevice + ?Sized,
{
    fn block_size(&self) -> io::Result<usize> {
        (**self).block_size()
    }
    fn block_count(&self) -> io::Result<u64> {
        (**self).block_count()
    }
    fn read_blocks(&mut self, ba: u64, count: usize, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_blocks(ba, count, buf)
    }
    fn write_blocks(&mut self, ba: u64, count: usize, buf: &[u8]) -> io::Result<()> {
        (**self).write_blocks(ba, count, buf)
    }
}

/// Validates a transfer against the device geometry and returns its byte
/// offset.
pub(crate) fn transfer_offset(
    block_size: usize,
    num_blocks: u64,
    ba: u64,
    count: usize,
    buf_len: usize,
) -> io::Result<u64> {
    if count.checked_mul(block_size) != Some(buf_len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "buffer of {} bytes does not hold {} blocks of {} bytes",
                buf_len, count, block_size
            ),
        ));
    }

    match ba.checked_add(count as u64) {
        Some(end) if end <= num_blocks => Ok(ba * block_size as u64),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "blocks {}+{} are beyond the end of the device ({} blocks)",
                ba, count, num_blocks
            ),
        )),
    }
}

#[cfg(test)]
#[test]
fn test_transfer_offset() {
    crate::tests_init();

    assert_eq!(transfer_offset(512, 8, 0, 1, 512).unwrap(), 0);
    assert_eq!(transfer_offset(512, 8, 7, 1, 512).unwrap(), 3584);
    assert_eq!(transfer_offset(4096, 8, 2, 3, 12288).unwrap(), 8192);

    let e = transfer_offset(512, 8, 8, 1, 512).unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
    let e = transfer_offset(512, 8, 6, 3, 1536).unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
    let e = transfer_offset(512, 8, 0, 2, 512).unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
}
