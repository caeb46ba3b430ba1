//! Engine Errors
//!
//! `TigerStyle`: Explicit error types with context.
//!
//! Only lifecycle operations fail. Data-path problems never surface here;
//! they are absorbed and counted in [`crate::stats::EngineStats`].

use thiserror::Error;

use crate::config::ConfigError;

/// Errors from engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The background worker could not be started
    #[error("failed to spawn migration worker: {reason}")]
    WorkerSpawn {
        /// Why spawning failed
        reason: String,
    },

    /// `start` was called on an engine that already has a worker
    #[error("migration worker already started")]
    AlreadyStarted,

    /// The worker died on an invariant violation
    #[error("migration worker panicked: {reason}")]
    WorkerPanicked {
        /// Panic payload, when it was a string
        reason: String,
    },

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Create a worker spawn error.
    #[must_use]
    pub fn worker_spawn(reason: impl Into<String>) -> Self {
        Self::WorkerSpawn {
            reason: reason.into(),
        }
    }

    /// Create a worker panicked error.
    #[must_use]
    pub fn worker_panicked(reason: impl Into<String>) -> Self {
        Self::WorkerPanicked {
            reason: reason.into(),
        }
    }
}

/// Result type for engine lifecycle operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
