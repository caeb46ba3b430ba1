//! Allocator and Migration Contracts
//!
//! `TigerStyle`: Blocks are opaque handles. Only the pool knows what backs them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// BlockHandle
// =============================================================================

/// Canonical identifier of an allocator block (its compound-head frame number).
///
/// Two addresses inside the same compound unit resolve to the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHandle(u64);

impl BlockHandle {
    /// Wrap a canonical frame number.
    #[must_use]
    pub const fn new(frame: u64) -> Self {
        Self(frame)
    }

    /// The canonical frame number.
    #[must_use]
    pub const fn frame(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block:{:#x}", self.0)
    }
}

// =============================================================================
// Tier
// =============================================================================

/// Memory tier a block lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Local DRAM
    Fast,
    /// Expander or remote memory
    Slow,
}

impl Tier {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// AllocatorBlockPool
// =============================================================================

/// Why a block could not be acquired exclusively.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// Isolated or pinned by someone else
    #[error("block already pinned")]
    AlreadyPinned,

    /// Not on any reclaim list
    #[error("block not movable")]
    NotMovable,

    /// Detected as unevictable before isolation; no pin was taken
    #[error("block unevictable")]
    Unevictable,
}

/// The allocator's view of blocks, as far as migration needs it.
///
/// Every method is non-blocking. A successful `acquire_exclusive` must be
/// paired with exactly one `release` or one successful migration.
pub trait AllocatorBlockPool: Send + Sync {
    /// Resolve a physical address to its canonical block, if the address is backed.
    fn resolve(&self, physical_address: u64) -> Option<BlockHandle>;

    /// Take the block off its reclaim list exclusively.
    ///
    /// # Errors
    /// Returns why the block could not be taken. No pin is held on error.
    fn acquire_exclusive(&self, handle: BlockHandle) -> Result<(), AcquireError>;

    /// Whether the block may be evicted or moved.
    fn is_evictable(&self, handle: BlockHandle) -> bool;

    /// Return an acquired block to its reclaim list.
    fn release(&self, handle: BlockHandle);
}

// =============================================================================
// MigrationPrimitive
// =============================================================================

/// Result of one batch migration call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOutcome {
    /// Blocks moved to the destination tier
    pub succeeded: usize,
    /// Blocks not moved; still held by the caller
    pub remaining: Vec<BlockHandle>,
}

impl MigrateOutcome {
    /// Every block in the batch moved.
    #[must_use]
    pub fn all(succeeded: usize) -> Self {
        Self {
            succeeded,
            remaining: Vec::new(),
        }
    }
}

/// Batch migration failed as a whole; nothing moved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    /// Destination tier has no room
    #[error("destination {tier} out of capacity")]
    OutOfCapacity {
        /// Destination tier
        tier: Tier,
    },

    /// Backend rejected the request
    #[error("migration backend error: {message}")]
    Backend {
        /// Failure description
        message: String,
    },

    /// Simulated fault (for DST)
    #[error("simulated fault: {fault_type}")]
    SimulatedFault {
        /// Type of simulated fault
        fault_type: String,
    },
}

impl MigrationError {
    /// Create a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create a simulated fault error.
    #[must_use]
    pub fn simulated_fault(fault_type: impl Into<String>) -> Self {
        Self::SimulatedFault {
            fault_type: fault_type.into(),
        }
    }

    /// Check if a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::OutOfCapacity { .. } | Self::SimulatedFault { .. })
    }
}

/// Moves pinned blocks between tiers.
///
/// Asynchronous so a backend may await copy completion. It must not hold the
/// caller indefinitely: whatever it does not finish goes back in `remaining`.
#[async_trait]
pub trait MigrationPrimitive: Send + Sync {
    /// Move `batch` to `destination`.
    ///
    /// # Errors
    /// Returns an error when nothing moved; the caller still holds every block.
    async fn migrate(
        &self,
        batch: &[BlockHandle],
        destination: Tier,
    ) -> Result<MigrateOutcome, MigrationError>;
}
