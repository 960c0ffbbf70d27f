//! Evenly spaced sample offsets for large-file hashing.

/// Offsets of the `sample_count` blocks hashed for a file of `length` bytes.
///
/// `offset(i) = floor(i * (length - block) / (k - 1))`, computed in exact
/// integer arithmetic so the same inputs always give the same offsets on every
/// platform. The first block starts at 0 and the last one ends exactly at EOF.
/// When the file is no larger than one block every sample collapses to offset
/// 0; a single sample is always at offset 0.
pub fn sample_offsets(length: u64, sample_count: usize, block_size: usize) -> Vec<u64> {
    let block = block_size as u64;
    if length <= block || sample_count <= 1 {
        return vec![0; sample_count];
    }

    let span = u128::from(length - block);
    let steps = (sample_count - 1) as u128;
    (0..sample_count)
        .map(|i| u64::try_from(i as u128 * span / steps).unwrap_or(u64::MAX))
        .collect()
}
