//! Migration Batch Executor
//!
//! `TigerStyle`: Every block that goes in comes out migrated or released.
//!
//! One call to the migration primitive per batch. Whatever the primitive
//! does not move is handed back to the pool before the report is returned,
//! so no pin outlives the call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tiermig_core::{AllocatorBlockPool, BlockHandle, MigrationError, MigrationPrimitive, Tier};
use tracing::debug;

use crate::validator::{ReleasedBlock, ValidatedBlock};

/// An ordered set of pinned blocks to migrate together.
#[derive(Debug, Default)]
pub struct MigrationBatch {
    blocks: Vec<ValidatedBlock>,
}

impl MigrationBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` blocks.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(capacity),
        }
    }

    /// Append a block.
    pub fn push(&mut self, block: ValidatedBlock) {
        self.blocks.push(block);
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Handles in batch order.
    #[must_use]
    pub fn handles(&self) -> Vec<BlockHandle> {
        self.blocks.iter().map(ValidatedBlock::handle).collect()
    }

    /// Keep the first `len` blocks and return the rest.
    #[must_use]
    pub fn split_off(&mut self, len: usize) -> MigrationBatch {
        let at = len.min(self.blocks.len());
        MigrationBatch {
            blocks: self.blocks.split_off(at),
        }
    }

    /// Release every block to `pool`.
    pub fn release_all(self, pool: &dyn AllocatorBlockPool) -> Vec<ReleasedBlock> {
        self.blocks
            .into_iter()
            .map(|block| block.release(pool))
            .collect()
    }
}

impl FromIterator<ValidatedBlock> for MigrationBatch {
    fn from_iter<I: IntoIterator<Item = ValidatedBlock>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Blocks now on the destination tier
    pub succeeded: usize,
    /// Blocks returned to the pool
    pub remaining: Vec<ReleasedBlock>,
    /// Set when the primitive failed the whole batch
    pub failed: Option<MigrationError>,
}

impl BatchReport {
    /// Blocks the report accounts for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.remaining.len()
    }
}

/// Runs batches through a [`MigrationPrimitive`].
#[derive(Clone)]
pub struct MigrationBatchExecutor {
    pool: Arc<dyn AllocatorBlockPool>,
    migrator: Arc<dyn MigrationPrimitive>,
    destination: Tier,
}

impl fmt::Debug for MigrationBatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationBatchExecutor")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl MigrationBatchExecutor {
    /// Create an executor that promotes to the fast tier.
    #[must_use]
    pub fn new(pool: Arc<dyn AllocatorBlockPool>, migrator: Arc<dyn MigrationPrimitive>) -> Self {
        Self {
            pool,
            migrator,
            destination: Tier::Fast,
        }
    }

    /// Migrate to another tier instead.
    #[must_use]
    pub fn with_destination(mut self, destination: Tier) -> Self {
        self.destination = destination;
        self
    }

    /// Destination tier.
    #[must_use]
    pub fn destination(&self) -> Tier {
        self.destination
    }

    /// Migrate `batch` and release whatever did not move.
    ///
    /// # Panics
    /// Panics if the primitive reports a handle that was not in the batch,
    /// or if its counts do not add up to the batch size.
    pub async fn execute(&self, batch: MigrationBatch) -> BatchReport {
        if batch.is_empty() {
            return BatchReport::default();
        }

        let batch_len = batch.len();
        let handles = batch.handles();
        let mut pinned: HashMap<BlockHandle, ValidatedBlock> = batch
            .blocks
            .into_iter()
            .map(|block| (block.handle(), block))
            .collect();
        assert_eq!(pinned.len(), batch_len, "batch holds duplicate handles");

        let (succeeded, remaining, failed) =
            match self.migrator.migrate(&handles, self.destination).await {
                Ok(outcome) => (outcome.succeeded, outcome.remaining, None),
                Err(err) => (0, handles, Some(err)),
            };

        let pool = self.pool.as_ref();
        let remaining: Vec<ReleasedBlock> = remaining
            .into_iter()
            .filter_map(|handle| {
                let block = pinned.remove(&handle);
                assert!(block.is_some(), "{} returned but not in batch", handle);
                block.map(|b| b.release(pool))
            })
            .collect();

        // Postconditions
        assert_eq!(
            succeeded + remaining.len(),
            batch_len,
            "blocks leaked: {} succeeded, {} remaining of {}",
            succeeded,
            remaining.len(),
            batch_len
        );
        assert_eq!(pinned.len(), succeeded, "migrated blocks unaccounted for");

        debug!(
            batch = batch_len,
            succeeded,
            remaining = remaining.len(),
            "batch migrated"
        );

        BatchReport {
            succeeded,
            remaining,
            failed,
        }
    }
}
