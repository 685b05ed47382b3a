//! Settings for chunk layout, the solver, the worker pool and terrain scans.
use std::time::Duration;

/// How the world is divided into chunk grids.
#[derive(Copy, Clone, Debug)]
pub struct ChunkSettings {
    /// Number of cells along each side of a chunk grid.
    /// Needs to be at least 3.
    pub cells_per_side: u32,
    /// World units covered by one cell.
    pub cell_size: f32,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        ChunkSettings {
            cells_per_side: 64,
            cell_size: 1.0,
        }
    }
}

impl ChunkSettings {
    /// Number of cells in one chunk grid.
    pub fn cell_count(&self) -> usize {
        (self.cells_per_side * self.cells_per_side) as usize
    }

    /// World units covered by one chunk along each axis.
    pub fn chunk_world_size(&self) -> f32 {
        self.cells_per_side as f32 * self.cell_size
    }
}

/// Limits applied to every Jump Point Search.
#[derive(Copy, Clone, Debug)]
pub struct SearchSettings {
    /// Open list pops before the search gives up and considers a partial path.
    pub max_iterations: usize,
    /// Cells a single jump may travel before it is abandoned.
    pub max_jump_distance: u32,
    /// Ring radius, in cells, searched when an endpoint snaps onto a blocked cell.
    pub snap_radius: i32,
    /// Heuristic improvement, in cells, a partial path must make over the start.
    pub partial_min_progress: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            max_iterations: 5_000,
            max_jump_distance: 200,
            snap_radius: 5,
            partial_min_progress: 12.0,
        }
    }
}

/// Worker pool sizing and fault recovery timings.
#[derive(Copy, Clone, Debug)]
pub struct SchedulerSettings {
    pub pool_size: usize,
    /// How long an execution unit may hold a request before it resolves as `None`.
    /// Longer than any search the unit can run internally.
    pub dispatch_timeout: Duration,
    /// Delay between a unit fault and its reinitialization.
    pub restart_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            pool_size: 3,
            dispatch_timeout: Duration::from_millis(12_000),
            restart_backoff: Duration::from_millis(1_000),
        }
    }
}

/// Thresholds used when classifying cells from terrain height.
#[derive(Copy, Clone, Debug)]
pub struct TerrainSettings {
    /// Heights below this are water.
    pub water_level: f32,
    /// Largest rise per world unit to a neighbouring cell that is still walkable.
    pub max_walkable_slope: f32,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        TerrainSettings {
            water_level: 0.0,
            max_walkable_slope: 1.0,
        }
    }
}

/// Throttling for repeated area scans.
#[derive(Copy, Clone, Debug)]
pub struct ScanSettings {
    /// Side of the world-space bucket used to key recent scans.
    pub bucket_size: f32,
    /// A bucket scanned more recently than this is skipped.
    pub throttle: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            bucket_size: 2.0,
            throttle: Duration::from_secs(2),
        }
    }
}

/// All navigation settings. Build with [`NavSettingsBuilder`].
#[derive(Copy, Clone, Debug, Default)]
pub struct NavSettings {
    pub chunk: ChunkSettings,
    pub search: SearchSettings,
    pub scheduler: SchedulerSettings,
    pub terrain: TerrainSettings,
    pub scan: ScanSettings,
}

/// Builder for [`NavSettings`].
///
/// Example usage:
/// ```
/// use bevy_jumpnav::prelude::*;
/// use std::time::Duration;
///
/// let settings = NavSettingsBuilder::new(32, 0.5)
///     .pool_size(4)
///     .max_iterations(8_000)
///     .dispatch_timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(settings.chunk.cells_per_side, 32);
/// ```
#[derive(Clone, Debug, Default)]
pub struct NavSettingsBuilder {
    settings: NavSettings,
}

impl NavSettingsBuilder {
    /// Chunks of `cells_per_side` x `cells_per_side` cells, each `cell_size` world units wide.
    pub fn new(cells_per_side: u32, cell_size: f32) -> Self {
        if cells_per_side < 3 {
            panic!("Chunk side must be at least 3 cells");
        }

        if !(cell_size > 0.0) {
            panic!("Cell size must be positive");
        }

        let mut builder = NavSettingsBuilder::default();
        builder.settings.chunk = ChunkSettings {
            cells_per_side,
            cell_size,
        };
        builder
    }

    /// Number of execution units in the pool.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        if pool_size == 0 {
            panic!("Pool size must be at least 1");
        }

        self.settings.scheduler.pool_size = pool_size;
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.settings.scheduler.dispatch_timeout = timeout;
        self
    }

    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.settings.scheduler.restart_backoff = backoff;
        self
    }

    /// Default open list pop budget. Individual requests may override it.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        if max_iterations == 0 {
            panic!("Iteration budget must be at least 1");
        }

        self.settings.search.max_iterations = max_iterations;
        self
    }

    pub fn max_jump_distance(mut self, cells: u32) -> Self {
        self.settings.search.max_jump_distance = cells;
        self
    }

    pub fn snap_radius(mut self, cells: i32) -> Self {
        self.settings.search.snap_radius = cells.max(0);
        self
    }

    pub fn partial_min_progress(mut self, cells: f32) -> Self {
        self.settings.search.partial_min_progress = cells;
        self
    }

    pub fn water_level(mut self, height: f32) -> Self {
        self.settings.terrain.water_level = height;
        self
    }

    pub fn max_walkable_slope(mut self, slope: f32) -> Self {
        self.settings.terrain.max_walkable_slope = slope;
        self
    }

    pub fn scan_throttle(mut self, bucket_size: f32, throttle: Duration) -> Self {
        if !(bucket_size > 0.0) {
            panic!("Scan bucket size must be positive");
        }

        self.settings.scan = ScanSettings {
            bucket_size,
            throttle,
        };
        self
    }

    /// Pass in [`SearchSettings`] wholesale.
    pub fn search_settings(mut self, search: SearchSettings) -> Self {
        self = self.max_iterations(search.max_iterations);
        self.settings.search = search;
        self
    }

    /// Pass in [`SchedulerSettings`] wholesale.
    pub fn scheduler_settings(mut self, scheduler: SchedulerSettings) -> Self {
        self = self.pool_size(scheduler.pool_size);
        self.settings.scheduler = scheduler;
        self
    }

    pub fn build(self) -> NavSettings {
        self.settings
    }
}
