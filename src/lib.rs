//! Chunked walkability grids with a Jump Point Search solver running on a
//! fault-tolerant pool of worker threads.
//!
//! [`manager::NavigationManager`] is the entry point: it owns the chunk grids,
//! pushes every change to the workers and hands out [`scheduler::PathTicket`]s
//! for path requests. [`plugin::JumpNavPlugin`] wires it into a Bevy `App`.
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

pub mod cell;
pub mod chunk;
mod dir;
pub mod error;
pub mod external;
pub mod grid;
mod heap;
pub mod jps;
pub mod los;
mod macros;
pub mod manager;
mod node;
pub mod path;
pub mod plugin;
pub mod scheduler;
pub mod settings;
pub mod unit;

pub mod prelude {
    pub use crate::cell::{NavCell, Walkability};
    pub use crate::chunk::{CellUpdate, ChunkId, ChunkNavigationMap, ObjectId, ObjectMeta};
    pub use crate::error::NavError;
    pub use crate::external::{SpatialQuery, TerrainHeight};
    pub use crate::grid::{ChunkStore, NavGrid};
    pub use crate::jps::{JumpPointSearch, PathOptions};
    pub use crate::manager::{NavigationManager, ObjectHit};
    pub use crate::path::Path;
    pub use crate::plugin::{JumpNavPlugin, PathFailed, PathRequest, PathingSet, PendingPath};
    pub use crate::scheduler::{PathPoll, PathTicket, PathfindingScheduler, SchedulerStatus};
    pub use crate::settings::{NavSettings, NavSettingsBuilder};
}

pub(crate) use rustc_hash::{FxHashMap, FxHashSet};

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
