/// Number of `block_size` blocks needed to hold `bytes` bytes.
/// Block sizes are not required to be powers of two.
#[inline]
pub fn blocks_for_bytes(bytes: u64, block_size: u64) -> u64 {
    debug_assert!(block_size != 0);
    bytes / block_size + if bytes % block_size != 0 { 1 } else { 0 }
}

/// Labels only deal with devices whose blocks are whole multiples of the
/// classic 512-byte sector.
#[inline]
pub fn is_valid_block_size(block_size: usize) -> bool {
    block_size >= 512 && block_size % 512 == 0
}

#[cfg(test)]
#[test]
fn test_blocks_for_bytes() {
    crate::tests_init();

    assert_eq!(blocks_for_bytes(0, 512), 0);
    assert_eq!(blocks_for_bytes(1, 512), 1);
    assert_eq!(blocks_for_bytes(16384, 512), 32);
    assert_eq!(blocks_for_bytes(16384, 4096), 4);
    assert_eq!(blocks_for_bytes(17408, 1536), 12);
}

#[cfg(test)]
#[test]
fn test_is_valid_block_size() {
    crate::tests_init();

    assert!(is_valid_block_size(512));
    assert!(is_valid_block_size(4096));
    assert!(is_valid_block_size(1536));
    assert!(!is_valid_block_size(256));
    assert!(!is_valid_block_size(520));
}
