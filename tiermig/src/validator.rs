//! Candidate Validation
//!
//! `TigerStyle`: A rejected candidate leaves no trace but one counter.
//!
//! A hot address is only a hint. By the time the engine looks at it the
//! block may have been freed, merged into a larger unit, isolated by
//! reclaim or made unevictable. Validation resolves the address, takes the
//! block off its reclaim list and checks evictability, in that order, and
//! undoes its own acquisition on every failure path.

use std::fmt;
use std::sync::Arc;
use tiermig_core::{AcquireError, AllocatorBlockPool, BlockHandle, HotCandidate};

/// Why a candidate was not eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The pool could not resolve the address
    AddressNotBacked,
    /// The block is not on a reclaim list
    BlockNotMovable,
    /// The block is isolated or pinned elsewhere
    AlreadyPinned,
    /// The block cannot be evicted
    BlockUnevictable,
}

impl RejectReason {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressNotBacked => "address_not_backed",
            Self::BlockNotMovable => "block_not_movable",
            Self::AlreadyPinned => "already_pinned",
            Self::BlockUnevictable => "block_unevictable",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AcquireError> for RejectReason {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::AlreadyPinned => Self::AlreadyPinned,
            AcquireError::NotMovable => Self::BlockNotMovable,
            AcquireError::Unevictable => Self::BlockUnevictable,
        }
    }
}

/// A block pinned for migration.
///
/// Only [`CandidateValidator::validate`] creates one. It is neither `Clone`
/// nor `Copy`: the pin it stands for is released exactly once, by
/// [`ValidatedBlock::release`] or by a successful migration.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidatedBlock {
    physical_address: u64,
    handle: BlockHandle,
}

impl ValidatedBlock {
    /// Address the candidate was reported at.
    #[must_use]
    pub fn physical_address(&self) -> u64 {
        self.physical_address
    }

    /// Canonical block handle.
    #[must_use]
    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    /// Return the block to its reclaim list.
    pub fn release(self, pool: &dyn AllocatorBlockPool) -> ReleasedBlock {
        pool.release(self.handle);
        ReleasedBlock {
            physical_address: self.physical_address,
            handle: self.handle,
        }
    }
}

/// A block handed back to the pool after a failed or deferred migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasedBlock {
    /// Address the candidate was reported at
    pub physical_address: u64,
    /// Canonical block handle
    pub handle: BlockHandle,
}

/// Checks candidates against the allocator's current state.
#[derive(Clone)]
pub struct CandidateValidator {
    pool: Arc<dyn AllocatorBlockPool>,
}

impl fmt::Debug for CandidateValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateValidator").finish_non_exhaustive()
    }
}

impl CandidateValidator {
    /// Create a validator over a pool.
    #[must_use]
    pub fn new(pool: Arc<dyn AllocatorBlockPool>) -> Self {
        Self { pool }
    }

    /// The pool blocks are validated against.
    #[must_use]
    pub fn pool(&self) -> &dyn AllocatorBlockPool {
        self.pool.as_ref()
    }

    /// Validate one candidate. Never blocks.
    ///
    /// # Errors
    /// Returns why the candidate is not eligible. No pin is held on error.
    pub fn validate(&self, candidate: HotCandidate) -> Result<ValidatedBlock, RejectReason> {
        let handle = self
            .pool
            .resolve(candidate.physical_address)
            .ok_or(RejectReason::AddressNotBacked)?;

        self.pool.acquire_exclusive(handle)?;

        if !self.pool.is_evictable(handle) {
            self.pool.release(handle);
            return Err(RejectReason::BlockUnevictable);
        }

        Ok(ValidatedBlock {
            physical_address: candidate.physical_address,
            handle,
        })
    }
}
