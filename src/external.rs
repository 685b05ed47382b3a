//! Capabilities the navigation core borrows from the rest of the game.
use bevy::math::Vec3;

use crate::chunk::ObjectId;

/// Terrain height lookup, used to classify water and steep ground.
///
/// Implemented for any `Fn(f32, f32) -> f32`, so a closure over a heightmap works.
pub trait TerrainHeight: Sync {
    /// Height of the terrain at world `(x, z)`.
    fn height(&self, x: f32, z: f32) -> f32;
}

impl<F> TerrainHeight for F
where
    F: Fn(f32, f32) -> f32 + Sync,
{
    fn height(&self, x: f32, z: f32) -> f32 {
        self(x, z)
    }
}

/// Broad-phase physics query.
pub trait SpatialQuery {
    type Collider;

    /// Colliders overlapping a sphere. May over-report.
    fn query_sphere(&self, center: Vec3, radius: f32) -> Vec<Self::Collider>;

    /// The spawned object a collider belongs to, if any.
    fn object_id(&self, collider: &Self::Collider) -> Option<ObjectId>;
}
