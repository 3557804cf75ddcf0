//! Deterministic key-to-partition routing.
//!
//! Routing hashes the key with CRC-32 (IEEE) and reduces modulo the
//! partition count, so a given key always lands on the same partition for a
//! fixed partition count. This matches what the broker's own consistent
//! partitioner does for keyed messages, letting a client pin the partition
//! explicitly when it needs to know the destination up front.

use oxbow_core::PartitionId;

use crate::error::{ClientError, ClientResult};

/// Stateless CRC-32 key router.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionRouter;

impl PartitionRouter {
    /// Creates a router.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Maps a key onto a partition in `[0, partition_count)`.
    ///
    /// # Errors
    /// Returns `PartitionAssignment` when `partition_count` is not positive;
    /// a topic with no known partitions cannot route anything.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // count > 0 checked.
    pub fn route(self, key: &[u8], partition_count: i32) -> ClientResult<PartitionId> {
        if partition_count <= 0 {
            return Err(ClientError::PartitionAssignment {
                message: format!("partition count must be positive, got {partition_count}"),
            });
        }
        let hash = crc32fast::hash(key);
        Ok(PartitionId::new((hash % partition_count as u32) as i32))
    }
}
