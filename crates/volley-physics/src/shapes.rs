//! Collider geometry descriptors.

use glam::Vec3;
use rapier3d::prelude::*;

/// Collider geometry, centered on the collider position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    /// Sphere with the given radius.
    Sphere {
        /// Radius in meters.
        radius: f32,
    },
    /// Axis-aligned box with the given half extents.
    Cuboid {
        /// Half size on each axis in meters.
        half_extents: Vec3,
    },
}

impl Shape {
    /// Rapier collider builder for this shape, centered on the origin.
    pub fn collider(&self) -> ColliderBuilder {
        match *self {
            Shape::Sphere { radius } => ColliderBuilder::ball(radius),
            Shape::Cuboid { half_extents } => {
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
        }
    }
}
