//! This module defines `ChunkNavigationMap`, the walkability grid of one square region of the world.
use bevy::math::Vec2;
use ndarray::Array2;

use crate::{cell::NavCell, error::NavError, settings::ChunkSettings, FxHashMap};

/// Chunk identifier packed from integer chunk coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u64);

impl ChunkId {
    pub fn new(chunk_x: i32, chunk_z: i32) -> Self {
        ChunkId(((chunk_x as u32 as u64) << 32) | chunk_z as u32 as u64)
    }

    pub fn coords(self) -> (i32, i32) {
        ((self.0 >> 32) as u32 as i32, self.0 as u32 as i32)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Identifier of a spawned world object.
pub type ObjectId = u64;

/// Lightweight metadata about a spawned object, used by spatial queries.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectMeta {
    /// Gameplay category, e.g. `"tree"` or `"rock"`.
    pub kind: String,
    pub quality: f32,
    /// World XZ position. `y` holds world Z.
    pub position: Vec2,
}

/// A single changed cell: flat grid index and its new flag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellUpdate {
    pub index: u32,
    pub flags: u8,
}

/// The navigation grid of one chunk.
///
/// Cells sit on a lattice: local cell `(cx, cz)` is centred on
/// `origin + (cx, cz) * cell_size`. Grid bytes are laid out row by row along Z,
/// so the flat index of a cell is `cz * cells_per_side + cx`.
#[derive(Debug, Clone)]
pub struct ChunkNavigationMap {
    id: ChunkId,
    chunk_x: i32,
    chunk_z: i32,
    origin: Vec2,
    cell_size: f32,
    side: u32,
    /// Indexed `[[cz, cx]]`.
    grid: Array2<u8>,
    /// Cached rise per world unit, filled in by terrain classification.
    slopes: Option<Array2<f32>>,
    version: u64,
    objects: FxHashMap<ObjectId, ObjectMeta>,
}

impl ChunkNavigationMap {
    /// Creates a chunk where every cell is walkable.
    pub fn new(chunk_x: i32, chunk_z: i32, settings: &ChunkSettings) -> Self {
        let side = settings.cells_per_side;
        let world = settings.chunk_world_size();

        ChunkNavigationMap {
            id: ChunkId::new(chunk_x, chunk_z),
            chunk_x,
            chunk_z,
            origin: Vec2::new(chunk_x as f32 * world, chunk_z as f32 * world),
            cell_size: settings.cell_size,
            side,
            grid: Array2::from_elem((side as usize, side as usize), NavCell::WALKABLE.bits()),
            slopes: None,
            version: 0,
            objects: FxHashMap::default(),
        }
    }

    /// Creates a chunk from raw grid bytes, as received by an execution unit.
    pub fn from_bytes(
        chunk_x: i32,
        chunk_z: i32,
        settings: &ChunkSettings,
        bytes: Vec<u8>,
        version: u64,
    ) -> Result<Self, NavError> {
        let mut chunk = ChunkNavigationMap::new(chunk_x, chunk_z, settings);
        chunk.replace_grid(bytes)?;
        chunk.version = version;
        Ok(chunk)
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn chunk_x(&self) -> i32 {
        self.chunk_x
    }

    pub fn chunk_z(&self) -> i32 {
        self.chunk_z
    }

    /// World position of local cell `(0, 0)`. `y` holds world Z.
    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn cells_per_side(&self) -> u32 {
        self.side
    }

    pub fn cell_count(&self) -> usize {
        (self.side * self.side) as usize
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Converts a world position to the nearest local cell, clamped into the chunk.
    pub fn world_to_local(&self, x: f32, z: f32) -> (u32, u32) {
        let max = (self.side - 1) as f32;
        let cx = ((x - self.origin.x) / self.cell_size).round().clamp(0.0, max);
        let cz = ((z - self.origin.y) / self.cell_size).round().clamp(0.0, max);
        (cx as u32, cz as u32)
    }

    /// World position of a local cell centre.
    pub fn local_to_world(&self, cx: u32, cz: u32) -> Vec2 {
        self.origin + Vec2::new(cx as f32, cz as f32) * self.cell_size
    }

    pub fn in_bounds(&self, cx: i64, cz: i64) -> bool {
        cx >= 0 && cz >= 0 && cx < self.side as i64 && cz < self.side as i64
    }

    pub fn index(&self, cx: u32, cz: u32) -> usize {
        (cz * self.side + cx) as usize
    }

    /// Flag byte of a cell. Cells outside the chunk read as uninitialized.
    pub fn cell(&self, cx: u32, cz: u32) -> NavCell {
        self.grid
            .get([cz as usize, cx as usize])
            .copied()
            .map(NavCell)
            .unwrap_or_default()
    }

    pub fn cell_at_index(&self, index: usize) -> NavCell {
        let side = self.side as usize;
        self.grid
            .get([index / side, index % side])
            .copied()
            .map(NavCell)
            .unwrap_or_default()
    }

    pub fn is_walkable(&self, cx: u32, cz: u32) -> bool {
        self.cell(cx, cz).is_walkable()
    }

    pub fn is_passable_ignore_slope(&self, cx: u32, cz: u32) -> bool {
        self.cell(cx, cz).is_passable_ignore_slope()
    }

    pub fn is_passable_ignore_obstacles(&self, cx: u32, cz: u32) -> bool {
        self.cell(cx, cz).is_passable_ignore_obstacles()
    }

    /// ORs `flags` into a cell. Returns true if the byte changed.
    pub fn add_cell_flags(&mut self, cx: u32, cz: u32, flags: NavCell) -> bool {
        self.modify_cell(cx, cz, |cell| cell.insert(flags))
    }

    /// Clears `flags` from a cell. Returns true if the byte changed.
    pub fn remove_cell_flags(&mut self, cx: u32, cz: u32, flags: NavCell) -> bool {
        self.modify_cell(cx, cz, |cell| cell.remove(flags))
    }

    fn modify_cell(&mut self, cx: u32, cz: u32, f: impl FnOnce(&mut NavCell)) -> bool {
        let Some(byte) = self.grid.get_mut([cz as usize, cx as usize]) else {
            return false;
        };

        let mut cell = NavCell(*byte);
        f(&mut cell);
        let changed = cell.bits() != *byte;
        *byte = cell.bits();
        changed
    }

    pub(crate) fn set_slope(&mut self, cx: u32, cz: u32, slope: f32) {
        let side = self.side as usize;
        let slopes = self
            .slopes
            .get_or_insert_with(|| Array2::zeros((side, side)));
        if let Some(value) = slopes.get_mut([cz as usize, cx as usize]) {
            *value = slope;
        }
    }

    pub fn slope(&self, cx: u32, cz: u32) -> f32 {
        self.slopes
            .as_ref()
            .and_then(|slopes| slopes.get([cz as usize, cx as usize]).copied())
            .unwrap_or(0.0)
    }

    /// Relative cost of stepping onto a cell. Infinite when the cell is not walkable.
    pub fn movement_cost(&self, cx: u32, cz: u32) -> f32 {
        let cell = self.cell(cx, cz);
        if !cell.is_walkable() {
            return f32::INFINITY;
        }

        let cost = 1.0 + self.slope(cx, cz).max(0.0);
        if cell.contains(NavCell::ROAD) {
            cost * 0.5
        } else {
            cost
        }
    }

    /// Snapshot of the grid bytes in flat index order.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.grid.iter().copied().collect()
    }

    /// Replaces the whole grid.
    pub fn replace_grid(&mut self, bytes: Vec<u8>) -> Result<(), NavError> {
        let side = self.side as usize;
        let expected = side * side;
        if bytes.len() != expected {
            return Err(NavError::GridSize {
                expected,
                actual: bytes.len(),
            });
        }

        self.grid = Array2::from_shape_vec((side, side), bytes).map_err(|_| NavError::GridSize {
            expected,
            actual: expected,
        })?;
        Ok(())
    }

    /// Applies partial updates. Nothing is written unless every index is in range.
    pub fn apply_updates(&mut self, updates: &[CellUpdate]) -> Result<(), NavError> {
        let len = self.cell_count();
        if let Some(bad) = updates.iter().find(|u| u.index as usize >= len) {
            return Err(NavError::CellOutOfRange {
                index: bad.index as usize,
                len,
            });
        }

        let side = self.side as usize;
        for update in updates {
            let index = update.index as usize;
            self.grid[[index / side, index % side]] = update.flags;
        }
        Ok(())
    }

    /// Cells whose byte differs from `before`, a snapshot taken with [`Self::to_bytes`].
    pub fn diff(&self, before: &[u8]) -> Vec<CellUpdate> {
        self.grid
            .iter()
            .zip(before)
            .enumerate()
            .filter(|(_, (now, then))| now != then)
            .map(|(index, (&flags, _))| CellUpdate {
                index: index as u32,
                flags,
            })
            .collect()
    }

    pub fn insert_object(&mut self, id: ObjectId, meta: ObjectMeta) {
        self.objects.insert(id, meta);
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Option<ObjectMeta> {
        self.objects.remove(&id)
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjectMeta> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = (&ObjectId, &ObjectMeta)> {
        self.objects.iter()
    }
}
