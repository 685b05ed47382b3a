//! Errors raised inside the navigation core.
//!
//! None of these reach gameplay code through the path API, every failure there
//! is folded into a `None` path. They surface from chunk management calls and
//! are logged by the scheduler when a worker misbehaves.
use thiserror::Error;

use crate::{chunk::ChunkId, unit::UnitId};

#[derive(Debug, Error)]
pub enum NavError {
    /// The OS refused to start a worker thread.
    #[error("failed to spawn execution unit {unit}: {source}")]
    UnitSpawn {
        unit: UnitId,
        #[source]
        source: std::io::Error,
    },
    /// A worker's message channel is closed.
    #[error("execution unit {0} is disconnected")]
    UnitDisconnected(UnitId),
    /// A grid buffer does not match the configured chunk side.
    #[error("grid buffer has {actual} cells, expected {expected}")]
    GridSize { expected: usize, actual: usize },
    #[error("chunk {0:?} is not loaded")]
    ChunkNotLoaded(ChunkId),
    #[error("cell index {index} out of range for grid of {len} cells")]
    CellOutOfRange { index: usize, len: usize },
    /// Every unit of the pool failed to start, or the pool size is zero.
    #[error("execution unit pool is empty")]
    EmptyPool,
    #[error("failed to spawn the scheduler thread: {0}")]
    CoordinatorSpawn(#[source] std::io::Error),
    /// The coordinator thread has shut down.
    #[error("pathfinding scheduler is closed")]
    SchedulerClosed,
}
