//! World-space grid queries across loaded chunks.
use bevy::math::Vec2;

use crate::{
    cell::{NavCell, Walkability},
    chunk::{ChunkId, ChunkNavigationMap},
    settings::ChunkSettings,
    FxHashMap,
};

/// The grid-query capability a solver runs against.
///
/// Cells are addressed by global lattice coordinates: cell `(ix, iz)` is centred
/// on world position `(ix, iz) * cell_size`. Cells nobody has loaded read as
/// uninitialized and are never walkable.
pub trait NavGrid {
    fn cell_size(&self) -> f32;

    fn cell(&self, ix: i32, iz: i32) -> NavCell;

    #[inline]
    fn is_passable(&self, ix: i32, iz: i32, mode: Walkability) -> bool {
        self.cell(ix, iz).passes(mode)
    }

    /// Snaps a world position to the nearest cell.
    #[inline]
    fn world_to_cell(&self, pos: Vec2) -> (i32, i32) {
        let cell_size = self.cell_size();
        (
            (pos.x / cell_size).round() as i32,
            (pos.y / cell_size).round() as i32,
        )
    }

    #[inline]
    fn cell_to_world(&self, ix: i32, iz: i32) -> Vec2 {
        Vec2::new(ix as f32, iz as f32) * self.cell_size()
    }
}

/// A set of chunk grids addressed as one world grid.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    settings: ChunkSettings,
    chunks: FxHashMap<ChunkId, ChunkNavigationMap>,
}

impl ChunkStore {
    pub fn new(settings: ChunkSettings) -> Self {
        ChunkStore {
            settings,
            chunks: FxHashMap::default(),
        }
    }

    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    /// Inserts a chunk, replacing any chunk with the same id.
    pub fn insert(&mut self, chunk: ChunkNavigationMap) -> Option<ChunkNavigationMap> {
        self.chunks.insert(chunk.id(), chunk)
    }

    pub fn remove(&mut self, id: ChunkId) -> Option<ChunkNavigationMap> {
        self.chunks.remove(&id)
    }

    pub fn get(&self, id: ChunkId) -> Option<&ChunkNavigationMap> {
        self.chunks.get(&id)
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut ChunkNavigationMap> {
        self.chunks.get_mut(&id)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkNavigationMap> {
        self.chunks.values()
    }

    /// Chunk coordinates and local cell of a global cell.
    pub fn split_cell(&self, ix: i32, iz: i32) -> ((i32, i32), (u32, u32)) {
        let side = self.settings.cells_per_side as i32;
        (
            (ix.div_euclid(side), iz.div_euclid(side)),
            (ix.rem_euclid(side) as u32, iz.rem_euclid(side) as u32),
        )
    }

    /// Id of the chunk covering a world position, loaded or not.
    pub fn chunk_id_at(&self, pos: Vec2) -> ChunkId {
        let (ix, iz) = self.world_to_cell(pos);
        let ((chunk_x, chunk_z), _) = self.split_cell(ix, iz);
        ChunkId::new(chunk_x, chunk_z)
    }

    /// The loaded chunk holding a global cell, with the cell's local coordinates.
    pub fn locate(&self, ix: i32, iz: i32) -> Option<(&ChunkNavigationMap, u32, u32)> {
        let ((chunk_x, chunk_z), (cx, cz)) = self.split_cell(ix, iz);
        self.chunks
            .get(&ChunkId::new(chunk_x, chunk_z))
            .map(|chunk| (chunk, cx, cz))
    }

    pub fn locate_mut(&mut self, ix: i32, iz: i32) -> Option<(&mut ChunkNavigationMap, u32, u32)> {
        let ((chunk_x, chunk_z), (cx, cz)) = self.split_cell(ix, iz);
        self.chunks
            .get_mut(&ChunkId::new(chunk_x, chunk_z))
            .map(|chunk| (chunk, cx, cz))
    }

    /// Movement cost at a world position. Infinite when blocked or unloaded.
    pub fn movement_cost(&self, pos: Vec2) -> f32 {
        let (ix, iz) = self.world_to_cell(pos);
        self.locate(ix, iz)
            .map(|(chunk, cx, cz)| chunk.movement_cost(cx, cz))
            .unwrap_or(f32::INFINITY)
    }
}

impl NavGrid for ChunkStore {
    fn cell_size(&self) -> f32 {
        self.settings.cell_size
    }

    #[inline]
    fn cell(&self, ix: i32, iz: i32) -> NavCell {
        self.locate(ix, iz)
            .map(|(chunk, cx, cz)| chunk.cell(cx, cz))
            .unwrap_or_default()
    }
}
