//! Shared inputs for the triegc benchmarks

use rand::Rng;
use triegc::{address_key, ScanRange, ADDRESS_BYTES, ALLOC_ALIGN};

/// Random keys with the alignment of tracked allocations
pub fn random_keys(rng: &mut impl Rng, count: usize) -> Vec<[u8; ADDRESS_BYTES]> {
    (0..count)
        .map(|_| address_key(rng.random::<u64>() as usize & !(ALLOC_ALIGN - 1)))
        .collect()
}

/// Root buffer holding every address in `addresses`, back to back
pub fn root_buffer(addresses: &[usize]) -> Vec<u8> {
    addresses
        .iter()
        .flat_map(|address| address.to_ne_bytes())
        .collect()
}

/// Scan range covering exactly the bytes of `buffer`
pub fn range_over(buffer: &[u8]) -> ScanRange {
    let start = buffer.as_ptr() as usize;
    ScanRange::between(start - 1, start + buffer.len())
}
