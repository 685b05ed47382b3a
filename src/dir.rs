//! The eight planar directions a search can travel in. `z` grows to the north.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dir {
    NORTH = 0,
    EAST = 1,
    SOUTH = 2,
    WEST = 3,
    NORTHEAST = 4,
    SOUTHEAST = 5,
    SOUTHWEST = 6,
    NORTHWEST = 7,
}

pub use self::Dir::*;

impl Dir {
    pub fn all() -> std::iter::Copied<std::slice::Iter<'static, Dir>> {
        [
            NORTH, EAST, SOUTH, WEST, NORTHEAST, SOUTHEAST, SOUTHWEST, NORTHWEST,
        ]
        .iter()
        .copied()
    }

    /// `(dx, dz)` step for this direction.
    pub fn vector(self) -> (i32, i32) {
        match self {
            NORTH => (0, 1),
            EAST => (1, 0),
            SOUTH => (0, -1),
            WEST => (-1, 0),
            NORTHEAST => (1, 1),
            SOUTHEAST => (1, -1),
            SOUTHWEST => (-1, -1),
            NORTHWEST => (-1, 1),
        }
    }

    /// Direction of travel from one cell to another, or `None` if they coincide.
    pub fn between(from: (i32, i32), to: (i32, i32)) -> Option<Dir> {
        Dir::from_vector((to.0 - from.0).signum(), (to.1 - from.1).signum())
    }

    pub fn from_vector(dx: i32, dz: i32) -> Option<Dir> {
        match (dx.signum(), dz.signum()) {
            (0, 1) => Some(NORTH),
            (1, 0) => Some(EAST),
            (0, -1) => Some(SOUTH),
            (-1, 0) => Some(WEST),
            (1, 1) => Some(NORTHEAST),
            (1, -1) => Some(SOUTHEAST),
            (-1, -1) => Some(SOUTHWEST),
            (-1, 1) => Some(NORTHWEST),
            _ => None,
        }
    }

    pub fn is_diagonal(self) -> bool {
        matches!(self, NORTHEAST | SOUTHEAST | SOUTHWEST | NORTHWEST)
    }
}
