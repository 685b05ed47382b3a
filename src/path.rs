//! This module defines the `Path` component returned by every path query.
use bevy::math::Vec2;
use bevy::prelude::Component;
use std::collections::VecDeque;

/// An ordered list of world XZ waypoints (`y` holds world Z) from start to goal.
///
/// If using [`crate::plugin::JumpNavPlugin`] this is inserted as a component on an
/// entity once its [`crate::plugin::PathRequest`] resolves.
#[derive(Debug, Clone, Component)]
pub struct Path {
    pub(crate) points: VecDeque<Vec2>,
    cost: f32,
    partial: bool,
}

impl Path {
    /// Create a new path from waypoints and the search cost, in world units.
    pub fn new(points: Vec<Vec2>, cost: f32) -> Self {
        Path {
            points: points.into_iter().collect(),
            cost,
            partial: false,
        }
    }

    pub(crate) fn partial(points: Vec<Vec2>, cost: f32) -> Self {
        Path {
            partial: true,
            ..Path::new(points, cost)
        }
    }

    /// Returns the waypoints as a slice.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bevy::math::Vec2;
    /// use bevy_jumpnav::prelude::*;
    ///
    /// let mut path = Path::new(vec![Vec2::new(1.0, 2.0), Vec2::new(4.0, 6.0)], 5.0);
    /// assert_eq!(path.points(), &[Vec2::new(1.0, 2.0), Vec2::new(4.0, 6.0)]);
    /// ```
    pub fn points(&mut self) -> &[Vec2] {
        self.points.make_contiguous()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec2> {
        self.points.iter()
    }

    /// Grid cost of the path as found by the search, in world units.
    pub fn cost(&self) -> f32 {
        self.cost
    }

    /// Euclidean length of the polyline.
    pub fn length(&self) -> f32 {
        self.points
            .iter()
            .zip(self.points.iter().skip(1))
            .map(|(a, b)| a.distance(*b))
            .sum()
    }

    /// True if the search ran out of budget and this path stops short of the goal.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<Vec2> {
        self.points.front().copied()
    }

    pub fn last(&self) -> Option<Vec2> {
        self.points.back().copied()
    }

    /// Pops the next waypoint.
    pub fn pop(&mut self) -> Option<Vec2> {
        self.points.pop_front()
    }

    /// Returns the next waypoint without removing it.
    pub fn next(&self) -> Option<Vec2> {
        self.points.front().copied()
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points
    }
}

impl IntoIterator for Path {
    type Item = Vec2;
    type IntoIter = std::collections::vec_deque::IntoIter<Vec2>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}
