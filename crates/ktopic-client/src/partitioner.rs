//! Partition selection
//!
//! Each delivery worker asks the broker for the partition count before every
//! send and draws a partition uniformly at random. Workers do not coordinate;
//! the spread is statistical.

use rand::Rng;

/// Partition used when the broker reports no partitions or the count query fails
pub const FALLBACK_PARTITION: u32 = 0;

/// Pick a partition in `[0, count)`, or [`FALLBACK_PARTITION`] when `count` is 0
pub fn select_partition(count: u32) -> u32 {
    if count == 0 {
        return FALLBACK_PARTITION;
    }
    rand::thread_rng().gen_range(0..count)
}
