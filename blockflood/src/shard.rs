//! Shard assignment across cooperating instances.
//!
//! All instances upload blocks of the same blob. Each one owns a contiguous range of block indices,
//! and the ranges of all instances partition `[0, total_blocks)`. The last instance also takes the
//! remainder when the blocks do not divide evenly.

use std::ops::Range;

use thiserror::Error;

/// The largest block list the store accepts in a single commit.
pub const MAX_BLOCKS: u32 = 50_000;

/// Invalid combinations of run arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// More blocks than a single commit can reference.
    #[error("total blocks {0} exceeds the limit of {MAX_BLOCKS}")]
    TooManyBlocks(u32),
    /// Nothing to upload.
    #[error("total blocks must be at least 1")]
    NoBlocks,
    /// At least one instance has to run.
    #[error("total instances must be at least 1")]
    NoInstances,
    /// The instance index does not address one of the instances.
    #[error("instance id {instance_id} is out of range for {total_instances} instances")]
    InstanceOutOfRange {
        /// The 0-based index of this instance.
        instance_id: u32,
        /// The number of cooperating instances.
        total_instances: u32,
    },
    /// Some instance would be left without blocks.
    #[error("total blocks {total_blocks} is less than total instances {total_instances}")]
    FewerBlocksThanInstances {
        /// The number of blocks of the blob.
        total_blocks: u32,
        /// The number of cooperating instances.
        total_instances: u32,
    },
}

/// The contiguous range of block indices owned by one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shard {
    /// The first block index of the shard.
    pub start: u32,
    /// The number of blocks in the shard.
    pub count: u32,
}

impl Shard {
    /// Computes the shard of `instance_id` without validating the arguments.
    ///
    /// Callers must ensure `0 < total_instances <= total_blocks` and
    /// `instance_id < total_instances`, as [`RunPlan::new`] does.
    fn assign(total_blocks: u32, instance_id: u32, total_instances: u32) -> Self {
        let per_instance = total_blocks / total_instances;
        let start = instance_id * per_instance;
        let mut count = per_instance;
        if instance_id == total_instances - 1 {
            count += total_blocks % total_instances;
        }
        Self { start, count }
    }

    /// The block indices of this shard.
    pub fn indices(&self) -> Range<u32> {
        self.start..self.start + self.count
    }
}

/// A validated description of what this instance does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPlan {
    total_blocks: u32,
    instance_id: u32,
    total_instances: u32,
    shard: Shard,
}

impl RunPlan {
    /// Validates the run arguments and derives this instance's shard.
    pub fn new(total_blocks: u32, instance_id: u32, total_instances: u32) -> Result<Self, PlanError> {
        if total_blocks > MAX_BLOCKS {
            return Err(PlanError::TooManyBlocks(total_blocks));
        }
        if total_blocks == 0 {
            return Err(PlanError::NoBlocks);
        }
        if total_instances == 0 {
            return Err(PlanError::NoInstances);
        }
        if instance_id >= total_instances {
            return Err(PlanError::InstanceOutOfRange {
                instance_id,
                total_instances,
            });
        }
        if total_blocks < total_instances {
            return Err(PlanError::FewerBlocksThanInstances {
                total_blocks,
                total_instances,
            });
        }

        Ok(Self {
            total_blocks,
            instance_id,
            total_instances,
            shard: Shard::assign(total_blocks, instance_id, total_instances),
        })
    }

    /// The number of blocks of the whole blob, across all instances.
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// The 0-based index of this instance.
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// The number of cooperating instances.
    pub fn total_instances(&self) -> u32 {
        self.total_instances
    }

    /// The blocks uploaded by this instance.
    pub fn shard(&self) -> Shard {
        self.shard
    }

    /// Whether this instance commits the blob and cleans up afterwards.
    pub fn is_coordinator(&self) -> bool {
        self.instance_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shards(total_blocks: u32, total_instances: u32) -> Vec<Shard> {
        (0..total_instances)
            .map(|id| RunPlan::new(total_blocks, id, total_instances).unwrap().shard())
            .collect()
    }

    #[test]
    fn shards_partition_all_blocks() {
        for total_instances in 1..=17 {
            for total_blocks in total_instances..=300 {
                let mut next = 0;
                for shard in shards(total_blocks, total_instances) {
                    // Contiguous and in instance order means no gaps and no overlaps.
                    assert_eq!(shard.start, next, "{total_blocks}/{total_instances}");
                    assert!(shard.count > 0);
                    next = shard.indices().end;
                }
                assert_eq!(next, total_blocks, "{total_blocks}/{total_instances}");
            }
        }
    }

    #[test]
    fn remainder_goes_to_last_instance() {
        let shards = shards(10, 3);
        assert_eq!(shards[0], Shard { start: 0, count: 3 });
        assert_eq!(shards[1], Shard { start: 3, count: 3 });
        assert_eq!(shards[2], Shard { start: 6, count: 4 });
    }

    #[test]
    fn maximum_blocks_split_across_many_instances() {
        let shards = shards(MAX_BLOCKS, 7);
        let total: u32 = shards.iter().map(|s| s.count).sum();
        assert_eq!(total, MAX_BLOCKS);
        assert_eq!(shards.last().unwrap().indices().end, MAX_BLOCKS);
    }

    #[test]
    fn two_instances() {
        let first = RunPlan::new(1024, 0, 2).unwrap();
        assert!(first.is_coordinator());
        assert_eq!(first.shard().indices(), 0..512);

        let second = RunPlan::new(1024, 1, 2).unwrap();
        assert!(!second.is_coordinator());
        assert_eq!(second.shard().indices(), 512..1024);
    }

    #[test]
    fn rejects_invalid_plans() {
        assert_eq!(
            RunPlan::new(10, 0, 20),
            Err(PlanError::FewerBlocksThanInstances {
                total_blocks: 10,
                total_instances: 20
            })
        );
        assert_eq!(
            RunPlan::new(MAX_BLOCKS + 1, 0, 1),
            Err(PlanError::TooManyBlocks(MAX_BLOCKS + 1))
        );
        assert_eq!(RunPlan::new(0, 0, 1), Err(PlanError::NoBlocks));
        assert_eq!(RunPlan::new(10, 0, 0), Err(PlanError::NoInstances));
        assert_eq!(
            RunPlan::new(10, 2, 2),
            Err(PlanError::InstanceOutOfRange {
                instance_id: 2,
                total_instances: 2
            })
        );
    }
}
