//! The `NavigationManager` owns the authoritative chunk grids and keeps every
//! execution unit's copy in step with them.
use std::time::Instant;

use bevy::{
    log,
    math::{Vec2, Vec3},
    prelude::Resource,
};
use ndarray::{Array2, Zip};

use crate::{
    cell::NavCell,
    chunk::{ChunkId, ChunkNavigationMap, ObjectId, ObjectMeta},
    error::NavError,
    external::{SpatialQuery, TerrainHeight},
    grid::{ChunkStore, NavGrid},
    jps::{JumpPointSearch, PathOptions},
    scheduler::{PathTicket, PathfindingScheduler, SchedulerStatus},
    settings::{NavSettings, TerrainSettings},
    FxHashMap, FxHashSet, FxIndexMap,
};

/// An object found by a spatial query.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHit {
    pub id: ObjectId,
    pub meta: ObjectMeta,
    /// Planar distance from the query centre.
    pub distance: f32,
}

/// Water and slope of one cell as read from the terrain.
#[derive(Debug, Clone, Copy, Default)]
struct TerrainSample {
    water: bool,
    slope: f32,
}

impl TerrainSample {
    fn read<T: TerrainHeight + ?Sized>(
        terrain: &T,
        settings: &TerrainSettings,
        pos: Vec2,
        cell_size: f32,
    ) -> Self {
        let height = terrain.height(pos.x, pos.y);
        let rise = [
            Vec2::new(cell_size, 0.0),
            Vec2::new(-cell_size, 0.0),
            Vec2::new(0.0, cell_size),
            Vec2::new(0.0, -cell_size),
        ]
        .into_iter()
        .map(|offset| {
            let p = pos + offset;
            (terrain.height(p.x, p.y) - height).abs()
        })
        .fold(0.0, f32::max);

        TerrainSample {
            water: height < settings.water_level,
            slope: rise / cell_size,
        }
    }

    /// Writes the sample into a cell. Returns true if the flag byte changed.
    fn apply(
        self,
        chunk: &mut ChunkNavigationMap,
        cx: u32,
        cz: u32,
        settings: &TerrainSettings,
    ) -> bool {
        chunk.set_slope(cx, cz, self.slope);

        let mut changed = if self.water {
            chunk.add_cell_flags(cx, cz, NavCell::WATER)
        } else {
            chunk.remove_cell_flags(cx, cz, NavCell::WATER)
        };
        changed |= if self.slope > settings.max_walkable_slope {
            chunk.add_cell_flags(cx, cz, NavCell::STEEP)
        } else {
            chunk.remove_cell_flags(cx, cz, NavCell::STEEP)
        };
        changed
    }
}

/// Authoritative navigation state for the loaded world.
///
/// Every grid change made here is applied locally first, then the cells whose byte
/// actually changed are forwarded to the worker pool. When the pool cannot be
/// started, paths are computed synchronously on the caller's thread instead.
#[derive(Resource)]
pub struct NavigationManager {
    settings: NavSettings,
    chunks: ChunkStore,
    scheduler: Option<PathfindingScheduler>,
    fallback: JumpPointSearch,
    next_local_request: u64,
    scans: FxHashMap<(i32, i32), Instant>,
    object_chunks: FxHashMap<ObjectId, ChunkId>,
}

impl NavigationManager {
    /// Creates a manager backed by a worker pool.
    pub fn new(settings: NavSettings) -> Self {
        let scheduler = match PathfindingScheduler::spawn(&settings) {
            Ok(scheduler) => Some(scheduler),
            Err(err) => {
                log::error!(
                    "Pathfinding pool failed to start, using synchronous fallback: {}",
                    err
                );
                None
            }
        };

        NavigationManager::with_scheduler(settings, scheduler)
    }

    /// Creates a manager that answers every path request synchronously.
    pub fn synchronous(settings: NavSettings) -> Self {
        NavigationManager::with_scheduler(settings, None)
    }

    fn with_scheduler(settings: NavSettings, scheduler: Option<PathfindingScheduler>) -> Self {
        NavigationManager {
            chunks: ChunkStore::new(settings.chunk),
            fallback: JumpPointSearch::new(settings.search),
            scheduler,
            settings,
            next_local_request: 1,
            scans: FxHashMap::default(),
            object_chunks: FxHashMap::default(),
        }
    }

    pub fn settings(&self) -> &NavSettings {
        &self.settings
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&ChunkNavigationMap> {
        self.chunks.get(id)
    }

    pub fn has_worker_pool(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Pool diagnostics. `None` when running synchronously or the pool has stopped.
    pub fn scheduler_status(&self) -> Option<SchedulerStatus> {
        self.scheduler.as_ref()?.status().ok()
    }

    /// Loads a chunk and registers it with the worker pool.
    ///
    /// Without `grid` every cell starts walkable. Loading a chunk that is already
    /// loaded replaces its grid; the version keeps counting up and registered
    /// objects stay.
    pub fn add_chunk(
        &mut self,
        chunk_x: i32,
        chunk_z: i32,
        grid: Option<Vec<u8>>,
    ) -> Result<ChunkId, NavError> {
        let mut chunk = match grid {
            Some(bytes) => {
                ChunkNavigationMap::from_bytes(chunk_x, chunk_z, &self.settings.chunk, bytes, 0)?
            }
            None => ChunkNavigationMap::new(chunk_x, chunk_z, &self.settings.chunk),
        };
        let id = chunk.id();
        if let Some(previous) = self.chunks.remove(id) {
            chunk.set_version(previous.version() + 1);
            for (object, meta) in previous.objects() {
                chunk.insert_object(*object, meta.clone());
            }
            log::debug!("Chunk ({}, {}) reloaded", chunk_x, chunk_z);
        }
        let version = chunk.version();
        let bytes = chunk.to_bytes();
        self.chunks.insert(chunk);
        if let Some(scheduler) = &self.scheduler {
            if let Err(err) = scheduler.register_chunk(id, version, bytes) {
                log::warn!("Could not register chunk ({}, {}): {}", chunk_x, chunk_z, err);
            }
        }

        Ok(id)
    }

    /// Unloads a chunk everywhere. Returns false if it was not loaded.
    pub fn remove_chunk(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.chunks.remove(id) else {
            return false;
        };
        for (object, _) in chunk.objects() {
            self.object_chunks.remove(object);
        }

        if let Some(scheduler) = &self.scheduler {
            if let Err(err) = scheduler.unregister_chunk(id) {
                log::warn!("Could not unregister chunk {:?}: {}", id, err);
            }
        }
        true
    }

    /// Replaces a chunk's whole grid.
    pub fn replace_chunk_grid(&mut self, id: ChunkId, grid: Vec<u8>) -> Result<(), NavError> {
        let chunk = self
            .chunks
            .get_mut(id)
            .ok_or(NavError::ChunkNotLoaded(id))?;
        chunk.replace_grid(grid.clone())?;
        let version = chunk.bump_version();

        if let Some(scheduler) = &self.scheduler {
            if let Err(err) = scheduler.update_chunk(id, version, grid) {
                log::warn!("Could not send grid of chunk {:?}: {}", id, err);
            }
        }
        Ok(())
    }

    /// Flags every cell within `radius` of `center` as water.
    ///
    /// # Returns
    /// The number of cells whose flags changed.
    pub fn mark_water(&mut self, center: Vec2, radius: f32) -> usize {
        self.edit_area(center, radius, |chunk, cx, cz| {
            chunk.add_cell_flags(cx, cz, NavCell::WATER)
        })
    }

    /// Sets or clears the steep flag on every cell within `radius` of `center`.
    pub fn mark_steep_slope(&mut self, center: Vec2, radius: f32, steep: bool) -> usize {
        self.edit_area(center, radius, |chunk, cx, cz| {
            if steep {
                chunk.add_cell_flags(cx, cz, NavCell::STEEP)
            } else {
                chunk.remove_cell_flags(cx, cz, NavCell::STEEP)
            }
        })
    }

    /// Blocks or unblocks cells under a placed or removed structure.
    pub fn set_obstacle(&mut self, center: Vec2, radius: f32, blocked: bool) -> usize {
        self.edit_area(center, radius, |chunk, cx, cz| {
            if blocked {
                chunk.add_cell_flags(cx, cz, NavCell::OBSTACLE)
            } else {
                chunk.remove_cell_flags(cx, cz, NavCell::OBSTACLE)
            }
        })
    }

    pub fn mark_road(&mut self, center: Vec2, radius: f32) -> usize {
        self.edit_area(center, radius, |chunk, cx, cz| {
            chunk.add_cell_flags(cx, cz, NavCell::ROAD)
        })
    }

    /// Re-reads water and steepness for the cells around `center` from the terrain.
    ///
    /// Scans of the same coarse area are skipped for the configured throttle
    /// interval, so this is cheap to call every frame.
    pub fn scan_area_walkability<T: TerrainHeight + ?Sized>(
        &mut self,
        center: Vec2,
        radius: f32,
        terrain: &T,
    ) -> usize {
        self.scan_area_at(center, radius, terrain, Instant::now())
    }

    fn scan_area_at<T: TerrainHeight + ?Sized>(
        &mut self,
        center: Vec2,
        radius: f32,
        terrain: &T,
        now: Instant,
    ) -> usize {
        let scan = self.settings.scan;
        let bucket = (
            (center.x / scan.bucket_size).floor() as i32,
            (center.y / scan.bucket_size).floor() as i32,
        );

        if let Some(last) = self.scans.get(&bucket) {
            if now.saturating_duration_since(*last) < scan.throttle {
                log::trace!("Skipping walkability scan near {:?}", center);
                return 0;
            }
        }
        if self.scans.len() >= 1024 {
            self.scans
                .retain(|_, last| now.saturating_duration_since(*last) < scan.throttle);
        }
        self.scans.insert(bucket, now);

        let terrain_settings = self.settings.terrain;
        let cell_size = self.settings.chunk.cell_size;
        self.edit_area(center, radius, |chunk, cx, cz| {
            let pos = chunk.local_to_world(cx, cz);
            TerrainSample::read(terrain, &terrain_settings, pos, cell_size).apply(
                chunk,
                cx,
                cz,
                &terrain_settings,
            )
        })
    }

    /// Classifies every cell of a chunk from the terrain.
    ///
    /// Heights are sampled in parallel when the `parallel` feature is on.
    pub fn classify_chunk<T: TerrainHeight + ?Sized>(
        &mut self,
        id: ChunkId,
        terrain: &T,
    ) -> Result<usize, NavError> {
        let terrain_settings = self.settings.terrain;
        let cell_size = self.settings.chunk.cell_size;
        let chunk = self.chunks.get(id).ok_or(NavError::ChunkNotLoaded(id))?;

        let side = chunk.cells_per_side() as usize;
        let mut samples = Array2::<TerrainSample>::default((side, side));
        let zip = Zip::indexed(&mut samples);
        let sample = |(cz, cx): (usize, usize), out: &mut TerrainSample| {
            let pos = chunk.local_to_world(cx as u32, cz as u32);
            *out = TerrainSample::read(terrain, &terrain_settings, pos, cell_size);
        };

        #[cfg(feature = "parallel")]
        zip.par_for_each(sample);
        #[cfg(not(feature = "parallel"))]
        zip.for_each(sample);

        let mut snapshots = FxIndexMap::default();
        let Some(chunk) = self.chunks.get_mut(id) else {
            return Err(NavError::ChunkNotLoaded(id));
        };
        snapshots.insert(id, chunk.to_bytes());
        for ((cz, cx), sample) in samples.indexed_iter() {
            sample.apply(chunk, cx as u32, cz as u32, &terrain_settings);
        }

        Ok(self.publish(snapshots))
    }

    /// Applies `edit` to the cell containing `center` and to every loaded cell
    /// whose centre lies within `radius` of it, then publishes the changes.
    fn edit_area<F>(&mut self, center: Vec2, radius: f32, mut edit: F) -> usize
    where
        F: FnMut(&mut ChunkNavigationMap, u32, u32) -> bool,
    {
        if !center.is_finite() {
            return 0;
        }
        let radius = radius.max(0.0);
        let home = self.chunks.world_to_cell(center);
        let (min_x, min_z) = self.chunks.world_to_cell(center - Vec2::splat(radius));
        let (max_x, max_z) = self.chunks.world_to_cell(center + Vec2::splat(radius));

        let mut snapshots: FxIndexMap<ChunkId, Vec<u8>> = FxIndexMap::default();
        for iz in min_z..=max_z {
            for ix in min_x..=max_x {
                if (ix, iz) != home
                    && self.chunks.cell_to_world(ix, iz).distance(center) > radius
                {
                    continue;
                }
                let Some((chunk, cx, cz)) = self.chunks.locate_mut(ix, iz) else {
                    continue;
                };
                snapshots
                    .entry(chunk.id())
                    .or_insert_with(|| chunk.to_bytes());
                edit(chunk, cx, cz);
            }
        }

        self.publish(snapshots)
    }

    /// Diffs edited chunks against their snapshots, bumps versions and forwards
    /// the changed cells. Returns the number of changed cells.
    fn publish(&mut self, snapshots: FxIndexMap<ChunkId, Vec<u8>>) -> usize {
        let mut changed = 0;
        for (id, before) in snapshots {
            let Some(chunk) = self.chunks.get_mut(id) else {
                continue;
            };
            let diff = chunk.diff(&before);
            if diff.is_empty() {
                continue;
            }

            changed += diff.len();
            let version = chunk.bump_version();
            log::trace!("Chunk {:?} v{}: {} cells changed", id, version, diff.len());

            if let Some(scheduler) = &self.scheduler {
                if let Err(err) = scheduler.update_cells(id, version, diff) {
                    log::warn!("Could not send cell changes of chunk {:?}: {}", id, err);
                }
            }
        }
        changed
    }

    /// Records an object in the chunk that contains it, dropping any earlier
    /// record of the same id.
    ///
    /// Returns the chunk, or `None` if that chunk is not loaded.
    pub fn register_object(&mut self, id: ObjectId, meta: ObjectMeta) -> Option<ChunkId> {
        let chunk_id = self.chunks.chunk_id_at(meta.position);
        if let Some(previous) = self.object_chunks.remove(&id) {
            if let Some(chunk) = self.chunks.get_mut(previous) {
                chunk.remove_object(id);
            }
        }

        let Some(chunk) = self.chunks.get_mut(chunk_id) else {
            log::warn!(
                "Object {} at {:?} is outside loaded chunks",
                id,
                meta.position
            );
            return None;
        };
        chunk.insert_object(id, meta);
        self.object_chunks.insert(id, chunk_id);
        Some(chunk_id)
    }

    pub fn unregister_object(&mut self, id: ObjectId) -> Option<ObjectMeta> {
        let chunk_id = self.object_chunks.remove(&id)?;
        self.chunks.get_mut(chunk_id)?.remove_object(id)
    }

    /// Objects around `center`, nearest first.
    ///
    /// Candidates come from the physics broad phase; their metadata is looked up in
    /// the chunk under `center` and its eight neighbours, since an object near a
    /// chunk border may be recorded on the other side. `kind` filters by
    /// [`ObjectMeta::kind`].
    pub fn find_objects_in_radius<Q: SpatialQuery + ?Sized>(
        &self,
        physics: &Q,
        center: Vec3,
        radius: f32,
        kind: Option<&str>,
    ) -> Vec<ObjectHit> {
        let planar = Vec2::new(center.x, center.z);
        let (chunk_x, chunk_z) = self.chunks.chunk_id_at(planar).coords();
        let neighbourhood: Vec<&ChunkNavigationMap> = (-1..=1)
            .flat_map(|dz| (-1..=1).map(move |dx| ChunkId::new(chunk_x + dx, chunk_z + dz)))
            .filter_map(|id| self.chunks.get(id))
            .collect();

        let mut seen = FxHashSet::default();
        let mut hits: Vec<ObjectHit> = physics
            .query_sphere(center, radius)
            .iter()
            .filter_map(|collider| physics.object_id(collider))
            .filter(|id| seen.insert(*id))
            .filter_map(|id| {
                let meta = neighbourhood.iter().find_map(|chunk| chunk.object(id))?;
                Some(ObjectHit {
                    id,
                    distance: meta.position.distance(planar),
                    meta: meta.clone(),
                })
            })
            .filter(|hit| hit.distance <= radius)
            .filter(|hit| kind.is_none_or(|kind| hit.meta.kind == kind))
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    pub fn find_nearest_object<Q: SpatialQuery + ?Sized>(
        &self,
        physics: &Q,
        center: Vec3,
        radius: f32,
        kind: Option<&str>,
    ) -> Option<ObjectHit> {
        self.find_objects_in_radius(physics, center, radius, kind)
            .into_iter()
            .next()
    }

    /// Requests a path between two world positions (`y` holds world Z).
    ///
    /// The ticket resolves to `None` when there is no path or the request failed.
    pub fn find_path(&mut self, start: Vec2, goal: Vec2, options: PathOptions) -> PathTicket {
        if let Some(scheduler) = &self.scheduler {
            return scheduler.find_path(start, goal, options);
        }

        let id = self.next_local_request;
        self.next_local_request += 1;
        let path = self.fallback.find_path(&self.chunks, start, goal, &options);
        PathTicket::ready(id, path)
    }

    pub fn is_walkable(&self, pos: Vec2) -> bool {
        let (ix, iz) = self.chunks.world_to_cell(pos);
        self.chunks.cell(ix, iz).is_walkable()
    }

    /// Movement cost at a world position. Infinite when blocked or unloaded.
    pub fn movement_cost(&self, pos: Vec2) -> f32 {
        self.chunks.movement_cost(pos)
    }
}
