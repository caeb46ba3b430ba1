//! SimBlockPool - Simulated Allocator and Migration Backend
//!
//! `TigerStyle`: Every pin is tracked, so a leak is a visible count, not a hang.
//!
//! Blocks are compound units keyed by head frame. The pool implements both
//! [`AllocatorBlockPool`] and [`MigrationPrimitive`], because migration in
//! the simulation is just moving a block between tier lists.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiermig_core::dst::{op, DeterministicRng, FaultInjector, FaultType};
use tiermig_core::{
    AcquireError, AllocatorBlockPool, BlockHandle, Clock, MigrateOutcome, MigrationError,
    MigrationPrimitive, Tier, HOTNESS_PAGE_SHIFT,
};

/// Largest compound unit the random population generates, in frames.
const SIM_COMPOUND_FRAMES_MAX: u64 = 8;

/// Allocator-side state of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
    /// Head frame
    pub head: BlockHandle,
    /// Frames in the compound unit
    pub nr_frames: u64,
    /// Tier the block lives on
    pub tier: Tier,
    /// Isolated from its reclaim list
    pub pinned: bool,
    /// On a reclaim list at all
    pub movable: bool,
    /// May be evicted or moved
    pub evictable: bool,
}

#[derive(Debug, Clone)]
struct MigrateLatency {
    clock: Arc<dyn Clock>,
    latency_us: u64,
}

/// Simulated block pool for DST.
#[derive(Debug)]
pub struct SimBlockPool {
    blocks: Mutex<BTreeMap<u64, BlockView>>,
    faults: Arc<FaultInjector>,
    fast_capacity_frames: Option<u64>,
    latency: Option<MigrateLatency>,
    // Statistics
    acquire_count: AtomicU64,
    release_count: AtomicU64,
    migrate_calls: AtomicU64,
    migrated_blocks: AtomicU64,
}

impl Default for SimBlockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBlockPool {
    /// Create an empty pool with no faults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            faults: Arc::new(FaultInjector::disabled()),
            fast_capacity_frames: None,
            latency: None,
            acquire_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            migrate_calls: AtomicU64::new(0),
            migrated_blocks: AtomicU64::new(0),
        }
    }

    /// Share a fault injector with the rest of the simulation.
    #[must_use]
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    /// Add a movable, evictable block.
    ///
    /// # Panics
    /// Panics if the block overlaps an existing one.
    #[must_use]
    pub fn with_block(self, head: u64, nr_frames: u64, tier: Tier) -> Self {
        self.insert_block(head, nr_frames, tier);
        self
    }

    /// Populate `count` slow-tier blocks of random compound size, packed from frame 0.
    ///
    /// Returns the pool and the head frame of every block.
    #[must_use]
    pub fn with_random_blocks(self, rng: &mut DeterministicRng, count: usize) -> (Self, Vec<u64>) {
        let mut heads = Vec::with_capacity(count);
        let mut next = 0;
        for _ in 0..count {
            let nr_frames = rng.next_u64_in(1, SIM_COMPOUND_FRAMES_MAX);
            self.insert_block(next, nr_frames, Tier::Slow);
            heads.push(next);
            next += nr_frames;
        }
        (self, heads)
    }

    /// Cap the fast tier at `frames`.
    #[must_use]
    pub fn with_fast_capacity(mut self, frames: u64) -> Self {
        self.fast_capacity_frames = Some(frames);
        self
    }

    /// Make every migrate call sleep `latency_us` on `clock`.
    #[must_use]
    pub fn with_migrate_latency(mut self, clock: Arc<dyn Clock>, latency_us: u64) -> Self {
        self.latency = Some(MigrateLatency { clock, latency_us });
        self
    }

    fn insert_block(&self, head: u64, nr_frames: u64, tier: Tier) {
        // Preconditions
        assert!(nr_frames > 0, "block must span at least one frame");

        let mut blocks = self.blocks.lock();
        let overlaps_prev = blocks
            .range(..=head)
            .next_back()
            .is_some_and(|(_, b)| b.head.frame() + b.nr_frames > head);
        let overlaps_next = blocks
            .range(head..)
            .next()
            .is_some_and(|(&h, _)| h < head + nr_frames);
        assert!(!overlaps_prev && !overlaps_next, "block {:#x} overlaps", head);

        blocks.insert(
            head,
            BlockView {
                head: BlockHandle::new(head),
                nr_frames,
                tier,
                pinned: false,
                movable: true,
                evictable: true,
            },
        );
    }

    fn update(&self, handle: BlockHandle, f: impl FnOnce(&mut BlockView)) {
        if let Some(block) = self.blocks.lock().get_mut(&handle.frame()) {
            f(block);
        }
    }

    /// Take the block off every reclaim list.
    pub fn mark_unmovable(&self, handle: BlockHandle) {
        self.update(handle, |b| b.movable = false);
    }

    /// Flag the block unevictable.
    pub fn mark_unevictable(&self, handle: BlockHandle) {
        self.update(handle, |b| b.evictable = false);
    }

    /// Pin the block on behalf of some other user.
    pub fn pin_externally(&self, handle: BlockHandle) {
        self.update(handle, |b| b.pinned = true);
    }

    /// Free the block; its addresses stop resolving.
    pub fn free_block(&self, handle: BlockHandle) {
        self.blocks.lock().remove(&handle.frame());
    }

    /// Current state of a block.
    #[must_use]
    pub fn block_view(&self, handle: BlockHandle) -> Option<BlockView> {
        self.blocks.lock().get(&handle.frame()).copied()
    }

    /// Whether a block is currently pinned.
    #[must_use]
    pub fn is_pinned(&self, handle: BlockHandle) -> bool {
        self.block_view(handle).is_some_and(|b| b.pinned)
    }

    /// Blocks currently pinned.
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        self.blocks.lock().values().filter(|b| b.pinned).count()
    }

    /// Blocks on `tier`.
    #[must_use]
    pub fn blocks_in(&self, tier: Tier) -> usize {
        self.blocks.lock().values().filter(|b| b.tier == tier).count()
    }

    /// Frames on `tier`.
    #[must_use]
    pub fn frames_in(&self, tier: Tier) -> u64 {
        self.blocks
            .lock()
            .values()
            .filter(|b| b.tier == tier)
            .map(|b| b.nr_frames)
            .sum()
    }

    /// Successful acquisitions.
    #[must_use]
    pub fn acquire_count(&self) -> u64 {
        self.acquire_count.load(Ordering::Relaxed)
    }

    /// Releases.
    #[must_use]
    pub fn release_count(&self) -> u64 {
        self.release_count.load(Ordering::Relaxed)
    }

    /// Calls to `migrate`.
    #[must_use]
    pub fn migrate_calls(&self) -> u64 {
        self.migrate_calls.load(Ordering::Relaxed)
    }

    /// Blocks moved by `migrate`.
    #[must_use]
    pub fn migrated_blocks(&self) -> u64 {
        self.migrated_blocks.load(Ordering::Relaxed)
    }

    fn partial_failures(&self, batch_len: usize) -> (usize, usize) {
        let failed = self.faults.next_usize(1, batch_len);
        let start = self.faults.next_usize(0, batch_len - 1);
        (start, failed)
    }
}

impl AllocatorBlockPool for SimBlockPool {
    fn resolve(&self, physical_address: u64) -> Option<BlockHandle> {
        if self.faults.should_inject(op::RESOLVE).is_some() {
            return None;
        }

        let frame = physical_address >> HOTNESS_PAGE_SHIFT;
        let blocks = self.blocks.lock();
        let (_, block) = blocks.range(..=frame).next_back()?;
        (frame < block.head.frame() + block.nr_frames).then_some(block.head)
    }

    fn acquire_exclusive(&self, handle: BlockHandle) -> Result<(), AcquireError> {
        if self.faults.should_inject(op::ACQUIRE_EXCLUSIVE) == Some(FaultType::SpuriousPin) {
            return Err(AcquireError::AlreadyPinned);
        }

        let mut blocks = self.blocks.lock();
        let block = blocks
            .get_mut(&handle.frame())
            .ok_or(AcquireError::NotMovable)?;
        if block.pinned {
            return Err(AcquireError::AlreadyPinned);
        }
        if !block.movable {
            return Err(AcquireError::NotMovable);
        }
        block.pinned = true;
        self.acquire_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_evictable(&self, handle: BlockHandle) -> bool {
        self.block_view(handle).is_some_and(|b| b.evictable)
    }

    fn release(&self, handle: BlockHandle) {
        let mut blocks = self.blocks.lock();
        let block = blocks.get_mut(&handle.frame());
        // Invariant: only pinned blocks are released, and only once
        assert!(
            block.as_ref().is_some_and(|b| b.pinned),
            "release of unpinned {}",
            handle
        );
        if let Some(block) = block {
            block.pinned = false;
        }
        self.release_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl MigrationPrimitive for SimBlockPool {
    async fn migrate(
        &self,
        batch: &[BlockHandle],
        destination: Tier,
    ) -> Result<MigrateOutcome, MigrationError> {
        self.migrate_calls.fetch_add(1, Ordering::Relaxed);
        if batch.is_empty() {
            return Ok(MigrateOutcome::default());
        }

        if let Some(latency) = &self.latency {
            latency.clock.sleep_us(latency.latency_us).await;
        }

        let failed_range = match self.faults.should_inject(op::MIGRATE) {
            Some(FaultType::MigrationTotalFail) => {
                return Err(MigrationError::simulated_fault(
                    FaultType::MigrationTotalFail.as_str(),
                ));
            }
            Some(FaultType::MigrationPartialFail) => Some(self.partial_failures(batch.len())),
            _ => None,
        };

        let mut blocks = self.blocks.lock();
        let mut fast_used: u64 = blocks
            .values()
            .filter(|b| b.tier == Tier::Fast)
            .map(|b| b.nr_frames)
            .sum();

        let mut outcome = MigrateOutcome::default();
        for (index, &handle) in batch.iter().enumerate() {
            let injected = failed_range.is_some_and(|(start, failed)| {
                (index + batch.len() - start) % batch.len() < failed
            });

            let Some(block) = blocks.get_mut(&handle.frame()) else {
                outcome.remaining.push(handle);
                continue;
            };
            assert!(block.pinned, "migrate of unpinned {}", handle);

            let fits = destination != Tier::Fast
                || block.tier == Tier::Fast
                || self
                    .fast_capacity_frames
                    .map_or(true, |cap| fast_used + block.nr_frames <= cap);
            if injected || !fits {
                outcome.remaining.push(handle);
                continue;
            }

            if block.tier != destination && destination == Tier::Fast {
                fast_used += block.nr_frames;
            }
            block.tier = destination;
            // The move consumes the isolation
            block.pinned = false;
            outcome.succeeded += 1;
        }

        if outcome.succeeded == 0 && failed_range.is_none() {
            return Err(MigrationError::OutOfCapacity { tier: destination });
        }

        self.migrated_blocks
            .fetch_add(outcome.succeeded as u64, Ordering::Relaxed);

        // Postcondition
        assert_eq!(outcome.succeeded + outcome.remaining.len(), batch.len());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiermig_core::dst::{FaultConfig, FaultInjectorBuilder};
    use tiermig_core::HotCandidate;

    fn pinned_pool() -> SimBlockPool {
        let pool = SimBlockPool::new()
            .with_block(0, 1, Tier::Slow)
            .with_block(1, 2, Tier::Slow)
            .with_block(3, 4, Tier::Slow);
        for head in [0, 1, 3] {
            pool.acquire_exclusive(BlockHandle::new(head)).unwrap();
        }
        pool
    }

    fn handles() -> Vec<BlockHandle> {
        [0, 1, 3].into_iter().map(BlockHandle::new).collect()
    }

    #[test]
    fn test_resolve_coalesces_to_head() {
        let pool = SimBlockPool::new().with_block(16, 4, Tier::Slow);

        let addr = |frame: u64| HotCandidate::from_frame(frame).physical_address;
        assert_eq!(pool.resolve(addr(16)), Some(BlockHandle::new(16)));
        assert_eq!(pool.resolve(addr(19)), Some(BlockHandle::new(16)));
        assert_eq!(pool.resolve(addr(19) + 100), Some(BlockHandle::new(16)));
        assert_eq!(pool.resolve(addr(20)), None);
        assert_eq!(pool.resolve(addr(15)), None);
    }

    #[test]
    fn test_acquire_release_cycle() {
        let pool = SimBlockPool::new().with_block(0, 1, Tier::Slow);
        let handle = BlockHandle::new(0);

        pool.acquire_exclusive(handle).unwrap();
        assert_eq!(pool.acquire_exclusive(handle), Err(AcquireError::AlreadyPinned));
        pool.release(handle);
        assert!(!pool.is_pinned(handle));
        assert_eq!((pool.acquire_count(), pool.release_count()), (1, 1));
    }

    #[test]
    #[should_panic(expected = "release of unpinned")]
    fn test_double_release_panics() {
        let pool = SimBlockPool::new().with_block(0, 1, Tier::Slow);
        pool.release(BlockHandle::new(0));
    }

    #[test]
    fn test_random_population_is_packed() {
        let mut rng = DeterministicRng::new(5);
        let (pool, heads) = SimBlockPool::new().with_random_blocks(&mut rng, 32);

        assert_eq!(heads.len(), 32);
        assert_eq!(pool.blocks_in(Tier::Slow), 32);
        for pair in heads.windows(2) {
            let view = pool.block_view(BlockHandle::new(pair[0])).unwrap();
            assert_eq!(pair[0] + view.nr_frames, pair[1]);
        }
    }

    #[tokio::test]
    async fn test_migrate_moves_and_unpins() {
        let pool = pinned_pool();

        let outcome = pool.migrate(&handles(), Tier::Fast).await.unwrap();

        assert_eq!(outcome, MigrateOutcome::all(3));
        assert_eq!(pool.blocks_in(Tier::Fast), 3);
        assert_eq!(pool.pinned_count(), 0);
        assert_eq!(pool.migrated_blocks(), 3);
    }

    #[tokio::test]
    async fn test_fast_capacity_leaves_remaining_pinned() {
        let pool = pinned_pool().with_fast_capacity(3);

        let outcome = pool.migrate(&handles(), Tier::Fast).await.unwrap();

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.remaining, vec![BlockHandle::new(3)]);
        assert!(pool.is_pinned(BlockHandle::new(3)));
        assert_eq!(pool.frames_in(Tier::Fast), 3);
    }

    #[tokio::test]
    async fn test_no_capacity_is_error() {
        let pool = pinned_pool().with_fast_capacity(0);
        let err = pool.migrate(&handles(), Tier::Fast).await.unwrap_err();
        assert_eq!(err, MigrationError::OutOfCapacity { tier: Tier::Fast });
        assert_eq!(pool.pinned_count(), 3);
    }

    #[tokio::test]
    async fn test_partial_fault() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(11))
            .with_fault(FaultConfig::new(FaultType::MigrationPartialFail, 1.0))
            .build();
        let pool = pinned_pool().with_faults(Arc::new(faults));

        let outcome = pool.migrate(&handles(), Tier::Fast).await.unwrap();

        assert!(!outcome.remaining.is_empty());
        assert_eq!(outcome.succeeded + outcome.remaining.len(), 3);
        assert_eq!(pool.pinned_count(), outcome.remaining.len());
    }

    #[tokio::test]
    async fn test_total_fault_moves_nothing() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(11))
            .with_fault(FaultConfig::new(FaultType::MigrationTotalFail, 1.0))
            .build();
        let pool = pinned_pool().with_faults(Arc::new(faults));

        assert!(pool.migrate(&handles(), Tier::Fast).await.is_err());
        assert_eq!(pool.blocks_in(Tier::Fast), 0);
        assert_eq!(pool.pinned_count(), 3);
    }
}
