//! `NavCell` flags and the walkability predicates built on them.
use std::ops::{BitOr, BitOrAssign};

/// Navigation flags for a single cell, stored as one byte in a chunk grid.
///
/// A cell with no flags set has never been classified and is treated as blocked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NavCell(pub u8);

impl NavCell {
    pub const EMPTY: NavCell = NavCell(0);
    /// Agents may stand here.
    pub const WALKABLE: NavCell = NavCell(1);
    /// Part of a road, cheaper to traverse.
    pub const ROAD: NavCell = NavCell(2);
    /// Submerged. Blocks every predicate, including the forced-return one.
    pub const WATER: NavCell = NavCell(4);
    /// Terrain too steep to climb.
    pub const STEEP: NavCell = NavCell(8);
    /// Structures, props and anything else placed in the world.
    pub const OBSTACLE: NavCell = NavCell(64);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flags: NavCell) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn intersects(self, flags: NavCell) -> bool {
        self.0 & flags.0 != 0
    }

    pub fn is_uninitialized(self) -> bool {
        self.0 == 0
    }

    /// Sets `flags`. Applying the same flags twice is a no-op.
    pub fn insert(&mut self, flags: NavCell) {
        self.0 |= flags.0;
    }

    /// Clears `flags`, leaving every other bit untouched.
    pub fn remove(&mut self, flags: NavCell) {
        self.0 &= !flags.0;
    }

    /// WALKABLE and none of OBSTACLE, WATER or STEEP.
    pub fn is_walkable(self) -> bool {
        self.contains(Self::WALKABLE)
            && !self.intersects(Self::OBSTACLE | Self::WATER | Self::STEEP)
    }

    /// Like [`NavCell::is_walkable`] but steep terrain is allowed.
    pub fn is_passable_ignore_slope(self) -> bool {
        self.contains(Self::WALKABLE) && !self.intersects(Self::OBSTACLE | Self::WATER)
    }

    /// Only water blocks. Used for forced return-home movement.
    pub fn is_passable_ignore_obstacles(self) -> bool {
        !self.is_uninitialized() && !self.intersects(Self::WATER)
    }

    pub fn passes(self, mode: Walkability) -> bool {
        match mode {
            Walkability::Normal => self.is_walkable(),
            Walkability::IgnoreSlope => self.is_passable_ignore_slope(),
            Walkability::IgnoreObstacles => self.is_passable_ignore_obstacles(),
        }
    }
}

impl BitOr for NavCell {
    type Output = NavCell;

    fn bitor(self, rhs: NavCell) -> NavCell {
        NavCell(self.0 | rhs.0)
    }
}

impl BitOrAssign for NavCell {
    fn bitor_assign(&mut self, rhs: NavCell) {
        self.0 |= rhs.0;
    }
}

impl From<u8> for NavCell {
    fn from(bits: u8) -> Self {
        NavCell(bits)
    }
}

impl From<NavCell> for u8 {
    fn from(cell: NavCell) -> Self {
        cell.0
    }
}

/// Which walkability predicate a search uses. One search uses one predicate throughout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Walkability {
    #[default]
    Normal,
    IgnoreSlope,
    IgnoreObstacles,
}

impl Walkability {
    /// Picks the predicate for a request. Ignoring obstacles wins when both are set
    /// since it is the more permissive of the two.
    pub fn from_flags(ignore_slopes: bool, ignore_obstacles: bool) -> Self {
        if ignore_obstacles {
            Walkability::IgnoreObstacles
        } else if ignore_slopes {
            Walkability::IgnoreSlope
        } else {
            Walkability::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_is_blocked() {
        let cell = NavCell::EMPTY;
        assert!(!cell.is_walkable());
        assert!(!cell.is_passable_ignore_slope());
        assert!(!cell.is_passable_ignore_obstacles());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut once = NavCell::WALKABLE;
        once.insert(NavCell::ROAD);

        let mut twice = NavCell::WALKABLE;
        twice.insert(NavCell::ROAD);
        twice.insert(NavCell::ROAD);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_inverts_insert() {
        let original = NavCell::WALKABLE | NavCell::ROAD;
        let mut cell = original;
        cell.insert(NavCell::OBSTACLE);
        cell.remove(NavCell::OBSTACLE);

        assert_eq!(cell, original);
    }

    #[test]
    fn test_predicates() {
        let steep = NavCell::WALKABLE | NavCell::STEEP;
        assert!(!steep.is_walkable());
        assert!(steep.is_passable_ignore_slope());
        assert!(steep.is_passable_ignore_obstacles());

        let blocked = NavCell::WALKABLE | NavCell::OBSTACLE;
        assert!(!blocked.is_walkable());
        assert!(!blocked.is_passable_ignore_slope());
        assert!(blocked.is_passable_ignore_obstacles());

        let water = NavCell::WALKABLE | NavCell::WATER;
        assert!(!water.passes(Walkability::IgnoreObstacles));
    }

    #[test]
    fn test_walkability_from_flags() {
        assert_eq!(Walkability::from_flags(false, false), Walkability::Normal);
        assert_eq!(Walkability::from_flags(true, false), Walkability::IgnoreSlope);
        assert_eq!(Walkability::from_flags(true, true), Walkability::IgnoreObstacles);
    }
}
