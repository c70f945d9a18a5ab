//! Simulator error types.

use thiserror::Error;

/// Errors starting or driving a simulated host.
#[derive(Debug, Error)]
pub enum SimError {
    /// A tick or worker thread could not be spawned.
    #[error("failed to spawn simulator thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The region index does not exist.
    #[error("no region {index} (server has {count})")]
    NoSuchRegion { index: usize, count: usize },

    /// The entity was never spawned.
    #[error("unknown entity {0}")]
    UnknownEntity(u64),
}

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;
