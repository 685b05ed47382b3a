//! Jump Point Search over a [`NavGrid`].
//!
//! A* where successors are jump points: from each expanded cell the search runs
//! straight or diagonally until it meets the goal, a wall, or a cell with a
//! forced neighbour. Diagonal moves never cut a corner, both orthogonal cells
//! must be passable. Costs and the heuristic are octile distances in cells.
use bevy::{log, math::Vec2};
use smallvec::SmallVec;
use std::f32::consts::SQRT_2;

use crate::{
    cell::Walkability,
    dir::Dir,
    grid::NavGrid,
    heap::OpenList,
    los::smooth_path,
    macros::timed,
    node::{NodeKey, NodePool},
    path::Path,
    settings::SearchSettings,
    FxHashMap, FxHashSet,
};

/// Per-request knobs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PathOptions {
    /// Overrides [`SearchSettings::max_iterations`] for this request.
    pub max_iterations: Option<usize>,
    /// Allow steep terrain.
    pub ignore_slopes: bool,
    /// Only water blocks. For forced return-home movement.
    pub ignore_obstacles: bool,
}

impl PathOptions {
    pub fn walkability(&self) -> Walkability {
        Walkability::from_flags(self.ignore_slopes, self.ignore_obstacles)
    }
}

/// Counters from the most recent search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub iterations: usize,
    pub nodes_created: usize,
    pub budget_exhausted: bool,
    #[cfg(feature = "stats")]
    pub elapsed: std::time::Duration,
}

type Cell = (i32, i32);
type Successors = SmallVec<[Cell; 8]>;

/// Octile distance in cells. Admissible and consistent for eight-way movement.
#[inline]
pub fn octile(a: Cell, b: Cell) -> f32 {
    let dx = (a.0 - b.0).abs() as f32;
    let dz = (a.1 - b.1).abs() as f32;
    dx + dz + (SQRT_2 - 2.0) * dx.min(dz)
}

/// Closed-set key. Cell coordinates are assumed to stay within ±500,000.
#[inline]
fn cell_key(cell: Cell) -> i64 {
    (cell.0 as i64 + 500_000) * 1_000_000 + (cell.1 as i64 + 500_000)
}

/// A reusable Jump Point Search solver.
///
/// Holds the node pool and scratch collections between searches, so keep one per
/// thread and call [`JumpPointSearch::find_path`] repeatedly.
#[derive(Debug)]
pub struct JumpPointSearch {
    settings: SearchSettings,
    pool: NodePool,
    open: OpenList,
    discovered: FxHashMap<i64, NodeKey>,
    closed: FxHashSet<i64>,
    stats: SearchStats,
}

struct Query {
    goal: Cell,
    mode: Walkability,
}

impl JumpPointSearch {
    pub fn new(settings: SearchSettings) -> Self {
        JumpPointSearch {
            settings,
            pool: NodePool::new(),
            open: OpenList::with_capacity(256),
            discovered: FxHashMap::default(),
            closed: FxHashSet::default(),
            stats: SearchStats::default(),
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn last_stats(&self) -> SearchStats {
        self.stats
    }

    /// Finds a path between two world positions.
    ///
    /// Both endpoints snap to the nearest cell; a blocked endpoint moves to the
    /// closest passable cell within the snap radius or the search fails. When the
    /// iteration budget runs out, a path to the node closest to the goal is
    /// returned if it gained enough ground over the start.
    ///
    /// # Returns
    /// * `Some(Path)` with world waypoints after string-pulling, otherwise `None`.
    pub fn find_path<G: NavGrid + ?Sized>(
        &mut self,
        grid: &G,
        start: Vec2,
        goal: Vec2,
        options: &PathOptions,
    ) -> Option<Path> {
        self.stats = SearchStats::default();
        let path = timed!(self.stats.elapsed, {
            self.search(grid, start, goal, options)
        });

        self.stats.nodes_created = self.pool.live().len();
        log::debug!(
            "JPS {:?} -> {:?}: {} iterations, {} nodes, found: {}",
            start,
            goal,
            self.stats.iterations,
            self.stats.nodes_created,
            path.is_some()
        );

        self.open.clear();
        self.discovered.clear();
        self.closed.clear();
        self.pool.release_all();

        path
    }

    fn search<G: NavGrid + ?Sized>(
        &mut self,
        grid: &G,
        start: Vec2,
        goal: Vec2,
        options: &PathOptions,
    ) -> Option<Path> {
        if !(start.is_finite() && goal.is_finite()) {
            log::warn!("Path endpoints must be finite, got {:?} -> {:?}", start, goal);
            return None;
        }

        let mode = options.walkability();
        let max_iterations = options
            .max_iterations
            .unwrap_or(self.settings.max_iterations);

        let Some(start_cell) = self.snap(grid, grid.world_to_cell(start), mode) else {
            log::warn!("No walkable cell near path start {:?}", start);
            return None;
        };
        let Some(goal_cell) = self.snap(grid, grid.world_to_cell(goal), mode) else {
            log::warn!("No walkable cell near path goal {:?}", goal);
            return None;
        };

        if start_cell == goal_cell {
            let point = grid.cell_to_world(start_cell.0, start_cell.1);
            return Some(Path::new(vec![point], 0.0));
        }

        let query = Query {
            goal: goal_cell,
            mode,
        };

        let start_h = octile(start_cell, goal_cell);
        let start_key = self.pool.acquire(start_cell.0, start_cell.1, start_h);
        self.pool[start_key].g = 0.0;
        self.pool[start_key].f = start_h;
        self.discovered.insert(cell_key(start_cell), start_key);
        self.open.push(&mut self.pool, start_key);

        let mut successors = Successors::new();

        while !self.open.is_empty() {
            if self.stats.iterations >= max_iterations {
                self.stats.budget_exhausted = true;
                return self.partial_path(grid, start_h, mode);
            }

            let current = self.open.pop(&mut self.pool)?;
            self.stats.iterations += 1;

            let cell = (self.pool[current].x, self.pool[current].z);
            self.closed.insert(cell_key(cell));

            if cell == goal_cell {
                let cells = self.trace(current);
                let cost = self.pool[current].g * grid.cell_size();
                return Some(self.finish(grid, &cells, cost, mode, false));
            }

            successors.clear();
            self.successors(grid, current, &query, &mut successors);

            let current_g = self.pool[current].g;
            for &next in successors.iter() {
                let key = cell_key(next);
                if self.closed.contains(&key) {
                    continue;
                }

                let g = current_g + octile(cell, next);
                match self.discovered.get(&key).copied() {
                    None => {
                        let node = self.pool.acquire(next.0, next.1, octile(next, goal_cell));
                        self.pool[node].g = g;
                        self.pool[node].f = g + self.pool[node].h;
                        self.pool[node].parent = Some(current);
                        self.discovered.insert(key, node);
                        self.open.push(&mut self.pool, node);
                    }
                    Some(node) if g < self.pool[node].g => {
                        self.pool[node].g = g;
                        self.pool[node].f = g + self.pool[node].h;
                        self.pool[node].parent = Some(current);
                        if self.pool[node].heap_index.is_some() {
                            self.open.decrease_key(&mut self.pool, node);
                        } else {
                            self.open.push(&mut self.pool, node);
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        None
    }

    /// Best-effort path once the budget is spent.
    ///
    /// Picks the reached node (one with a parent) nearest the goal, and only
    /// returns it if the heuristic dropped by more than the configured progress.
    fn partial_path<G: NavGrid + ?Sized>(
        &self,
        grid: &G,
        start_h: f32,
        mode: Walkability,
    ) -> Option<Path> {
        let best = self
            .pool
            .live()
            .iter()
            .copied()
            .filter(|&key| self.pool[key].parent.is_some())
            .min_by(|&a, &b| self.pool[a].h.total_cmp(&self.pool[b].h))?;

        if start_h - self.pool[best].h <= self.settings.partial_min_progress {
            log::debug!(
                "Search budget exhausted, closest node only {:.1} cells nearer",
                start_h - self.pool[best].h
            );
            return None;
        }

        let cells = self.trace(best);
        let cost = self.pool[best].g * grid.cell_size();
        Some(self.finish(grid, &cells, cost, mode, true))
    }

    fn trace(&self, mut key: NodeKey) -> Vec<Cell> {
        let mut cells = vec![(self.pool[key].x, self.pool[key].z)];
        while let Some(parent) = self.pool[key].parent {
            cells.push((self.pool[parent].x, self.pool[parent].z));
            key = parent;
        }
        cells.reverse();
        cells
    }

    fn finish<G: NavGrid + ?Sized>(
        &self,
        grid: &G,
        cells: &[Cell],
        cost: f32,
        mode: Walkability,
        partial: bool,
    ) -> Path {
        let points = smooth_path(grid, cells, mode)
            .into_iter()
            .map(|(x, z)| grid.cell_to_world(x, z))
            .collect();

        if partial {
            Path::partial(points, cost)
        } else {
            Path::new(points, cost)
        }
    }

    /// Nearest passable cell within the snap radius, ring by ring.
    fn snap<G: NavGrid + ?Sized>(&self, grid: &G, cell: Cell, mode: Walkability) -> Option<Cell> {
        if grid.is_passable(cell.0, cell.1, mode) {
            return Some(cell);
        }

        for radius in 1..=self.settings.snap_radius {
            let mut best: Option<(Cell, i32)> = None;

            for dz in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs().max(dz.abs()) != radius {
                        continue;
                    }

                    let candidate = (cell.0 + dx, cell.1 + dz);
                    let distance = dx * dx + dz * dz;
                    if grid.is_passable(candidate.0, candidate.1, mode)
                        && best.is_none_or(|(_, d)| distance < d)
                    {
                        best = Some((candidate, distance));
                    }
                }
            }

            if let Some((found, _)) = best {
                return Some(found);
            }
        }

        None
    }

    /// Jump points reachable from `current`.
    ///
    /// Falls back to plain one-cell neighbours when pruning finds none, which
    /// happens when every jump in a cluttered pocket dies before a forced neighbour.
    fn successors<G: NavGrid + ?Sized>(
        &self,
        grid: &G,
        current: NodeKey,
        query: &Query,
        out: &mut Successors,
    ) {
        let node = &self.pool[current];
        let cell = (node.x, node.z);
        let parent = node.parent.map(|p| (self.pool[p].x, self.pool[p].z));

        let mut neighbors = Successors::new();
        match parent.and_then(|p| Dir::between(p, cell)) {
            Some(dir) => self.pruned_neighbors(grid, cell, dir, query.mode, &mut neighbors),
            None => self.all_neighbors(grid, cell, query.mode, &mut neighbors),
        }

        for &neighbor in neighbors.iter() {
            if let Some(point) = self.jump(grid, neighbor, cell, query) {
                out.push(point);
            }
        }

        if out.is_empty() {
            self.all_neighbors(grid, cell, query.mode, out);
        }
    }

    /// Every passable neighbour without cutting corners.
    fn all_neighbors<G: NavGrid + ?Sized>(
        &self,
        grid: &G,
        (x, z): Cell,
        mode: Walkability,
        out: &mut Successors,
    ) {
        for dir in Dir::all() {
            let (dx, dz) = dir.vector();
            if !grid.is_passable(x + dx, z + dz, mode) {
                continue;
            }

            if dir.is_diagonal()
                && !(grid.is_passable(x + dx, z, mode) && grid.is_passable(x, z + dz, mode))
            {
                continue;
            }

            out.push((x + dx, z + dz));
        }
    }

    /// Natural and forced neighbours for a cell entered travelling in `dir`.
    fn pruned_neighbors<G: NavGrid + ?Sized>(
        &self,
        grid: &G,
        (x, z): Cell,
        dir: Dir,
        mode: Walkability,
        out: &mut Successors,
    ) {
        let passable = |x: i32, z: i32| grid.is_passable(x, z, mode);
        let (dx, dz) = dir.vector();

        if dir.is_diagonal() {
            let along_z = passable(x, z + dz);
            let along_x = passable(x + dx, z);

            if along_z {
                out.push((x, z + dz));
            }
            if along_x {
                out.push((x + dx, z));
            }
            if along_z && along_x && passable(x + dx, z + dz) {
                out.push((x + dx, z + dz));
            }
        } else if dx != 0 {
            let next = passable(x + dx, z);
            let up = passable(x, z + 1);
            let down = passable(x, z - 1);

            if next {
                out.push((x + dx, z));
                if up && passable(x + dx, z + 1) {
                    out.push((x + dx, z + 1));
                }
                if down && passable(x + dx, z - 1) {
                    out.push((x + dx, z - 1));
                }
            }
            if up {
                out.push((x, z + 1));
            }
            if down {
                out.push((x, z - 1));
            }
        } else {
            let next = passable(x, z + dz);
            let right = passable(x + 1, z);
            let left = passable(x - 1, z);

            if next {
                out.push((x, z + dz));
                if right && passable(x + 1, z + dz) {
                    out.push((x + 1, z + dz));
                }
                if left && passable(x - 1, z + dz) {
                    out.push((x - 1, z + dz));
                }
            }
            if right {
                out.push((x + 1, z));
            }
            if left {
                out.push((x - 1, z));
            }
        }
    }

    /// Walks from `from` through `start` and on in the same direction until a jump point.
    ///
    /// Stops with `None` on a blocked cell, a cut corner, or after
    /// [`SearchSettings::max_jump_distance`] cells.
    fn jump<G: NavGrid + ?Sized>(
        &self,
        grid: &G,
        start: Cell,
        from: Cell,
        query: &Query,
    ) -> Option<Cell> {
        let passable = |x: i32, z: i32| grid.is_passable(x, z, query.mode);
        let (dx, dz) = ((start.0 - from.0).signum(), (start.1 - from.1).signum());
        let diagonal = dx != 0 && dz != 0;

        let (mut px, mut pz) = from;
        let (mut x, mut z) = start;

        for _ in 0..self.settings.max_jump_distance {
            if !passable(x, z) {
                return None;
            }

            if diagonal && !(passable(px + dx, pz) && passable(px, pz + dz)) {
                return None;
            }

            if (x, z) == query.goal {
                return Some((x, z));
            }

            if diagonal {
                if self.jump(grid, (x + dx, z), (x, z), query).is_some()
                    || self.jump(grid, (x, z + dz), (x, z), query).is_some()
                {
                    return Some((x, z));
                }
            } else if dx != 0 {
                if (passable(x, z + 1) && !passable(x - dx, z + 1))
                    || (passable(x, z - 1) && !passable(x - dx, z - 1))
                {
                    return Some((x, z));
                }
            } else if (passable(x + 1, z) && !passable(x + 1, z - dz))
                || (passable(x - 1, z) && !passable(x - 1, z - dz))
            {
                return Some((x, z));
            }

            (px, pz) = (x, z);
            x += dx;
            z += dz;
        }

        None
    }
}
