//! Line of sight and string-pulling over a [`NavGrid`].
use crate::{cell::Walkability, grid::NavGrid};

/// Check if a straight segment between two cells stays on passable cells.
///
/// The segment is sampled once per cell along its major axis. A step that
/// changes both axes also needs both orthogonal cells passable, so the line
/// never squeezes between two diagonal blockers.
pub fn line_of_sight<G: NavGrid + ?Sized>(
    grid: &G,
    start: (i32, i32),
    end: (i32, i32),
    mode: Walkability,
) -> bool {
    if !grid.is_passable(start.0, start.1, mode) {
        return false;
    }

    let dx = (end.0 - start.0) as f32;
    let dz = (end.1 - start.1) as f32;
    let steps = (end.0 - start.0).abs().max((end.1 - start.1).abs());
    if steps == 0 {
        return true;
    }

    let mut prev = start;
    for i in 1..=steps {
        let t = i as f32 / steps as f32;
        let cell = (
            (start.0 as f32 + dx * t).round() as i32,
            (start.1 as f32 + dz * t).round() as i32,
        );

        if !grid.is_passable(cell.0, cell.1, mode) {
            return false;
        }

        if cell.0 != prev.0
            && cell.1 != prev.1
            && !(grid.is_passable(cell.0, prev.1, mode) && grid.is_passable(prev.0, cell.1, mode))
        {
            return false;
        }

        prev = cell;
    }

    true
}

/// Drops waypoints that can be skipped in a straight line.
///
/// From each anchor the farthest later waypoint still in sight becomes the next
/// anchor. The first and last waypoints are always kept.
pub fn smooth_path<G: NavGrid + ?Sized>(
    grid: &G,
    cells: &[(i32, i32)],
    mode: Walkability,
) -> Vec<(i32, i32)> {
    if cells.len() <= 2 {
        return cells.to_vec();
    }

    let last = cells.len() - 1;
    let mut smoothed = vec![cells[0]];
    let mut anchor = 0;

    while anchor < last {
        let next = (anchor + 2..=last)
            .rev()
            .find(|&k| line_of_sight(grid, cells[anchor], cells[k], mode))
            .unwrap_or(anchor + 1);

        smoothed.push(cells[next]);
        anchor = next;
    }

    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cell::NavCell, chunk::ChunkNavigationMap, grid::ChunkStore, settings::ChunkSettings,
    };

    fn open_store(side: u32) -> ChunkStore {
        let settings = ChunkSettings {
            cells_per_side: side,
            cell_size: 1.0,
        };
        let mut store = ChunkStore::new(settings);
        store.insert(ChunkNavigationMap::new(0, 0, &settings));
        store
    }

    fn block(store: &mut ChunkStore, x: i32, z: i32) {
        if let Some((chunk, cx, cz)) = store.locate_mut(x, z) {
            chunk.add_cell_flags(cx, cz, NavCell::OBSTACLE);
        }
    }

    #[test]
    fn test_clear_line() {
        let store = open_store(10);
        assert!(line_of_sight(&store, (0, 0), (9, 4), Walkability::Normal));
        assert!(line_of_sight(&store, (3, 3), (3, 3), Walkability::Normal));
    }

    #[test]
    fn test_blocked_line() {
        let mut store = open_store(10);
        block(&mut store, 5, 5);
        assert!(!line_of_sight(&store, (0, 0), (9, 9), Walkability::Normal));
        assert!(line_of_sight(&store, (0, 0), (9, 9), Walkability::IgnoreObstacles));
    }

    #[test]
    fn test_no_diagonal_squeeze() {
        let mut store = open_store(4);
        block(&mut store, 1, 0);
        block(&mut store, 0, 1);
        assert!(!line_of_sight(&store, (0, 0), (1, 1), Walkability::Normal));
    }

    #[test]
    fn test_leaves_grid() {
        let store = open_store(4);
        assert!(!line_of_sight(&store, (0, 0), (6, 0), Walkability::Normal));
    }

    #[test]
    fn test_smooth_collapses_staircase() {
        let store = open_store(10);
        let cells = vec![(0, 0), (1, 1), (2, 1), (3, 2), (4, 2), (6, 3)];
        let smoothed = smooth_path(&store, &cells, Walkability::Normal);
        assert_eq!(smoothed, vec![(0, 0), (6, 3)]);
    }

    #[test]
    fn test_smooth_keeps_corner() {
        let mut store = open_store(10);
        for z in 0..9 {
            block(&mut store, 5, z);
        }
        let cells = vec![(0, 0), (4, 4), (4, 9), (6, 9), (9, 9)];
        let smoothed = smooth_path(&store, &cells, Walkability::Normal);

        assert_eq!(smoothed.first(), Some(&(0, 0)));
        assert_eq!(smoothed.last(), Some(&(9, 9)));
        for pair in smoothed.windows(2) {
            assert!(line_of_sight(&store, pair[0], pair[1], Walkability::Normal));
        }
        assert!(smoothed.len() >= 3);
    }
}
