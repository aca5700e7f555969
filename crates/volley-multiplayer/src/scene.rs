//! Static description of the level every peer builds its collision world
//! from: world geometry, pushable props and peer-owned moving hitboxes.

use glam::Vec3;
use volley_physics::{BodyId, ColliderId, HitboxWorld, Shape};

use crate::replicated::PeerId;

/// Collision layer of level geometry and props.
pub const LAYER_WORLD: u32 = 1 << 0;
/// Collision layer of player hitboxes.
pub const LAYER_HITBOX: u32 = 1 << 1;

/// Immovable geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCollider {
    /// Shape.
    pub shape: Shape,
    /// Center.
    pub center: Vec3,
    /// Collision layer bits.
    pub layer: u32,
}

/// A prop that hit impulses can push.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBody {
    /// Shape.
    pub shape: Shape,
    /// Initial center.
    pub center: Vec3,
    /// Collision layer bits.
    pub layer: u32,
    /// Mass in kilograms.
    pub mass: f32,
}

/// A hitbox owned by a peer, moving on a deterministic path so every peer
/// can pose it for any tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneHitbox {
    /// Owning peer; its own shots never hit it.
    pub owner: PeerId,
    /// Shape.
    pub shape: Shape,
    /// Collision layer bits.
    pub layer: u32,
    /// Center at tick 0.
    pub start: Vec3,
    /// Velocity in meters per second.
    pub velocity: Vec3,
}

impl SceneHitbox {
    /// Center at a fractional tick.
    pub fn center_at(&self, tick: f64, delta_time: f32) -> Vec3 {
        let seconds = (tick.max(0.0) * f64::from(delta_time)) as f32;
        self.start + self.velocity * seconds
    }
}

/// A collision world built from a [`Scene`].
#[derive(Debug)]
pub struct SceneWorld {
    /// The world.
    pub world: HitboxWorld,
    /// Moving hitboxes and their colliders.
    pub hitboxes: Vec<(ColliderId, SceneHitbox)>,
    /// Bodies of the pushable props, in scene order.
    pub props: Vec<BodyId>,
}

/// Level contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    /// World geometry.
    pub statics: Vec<SceneCollider>,
    /// Pushable props.
    pub bodies: Vec<SceneBody>,
    /// Moving hitboxes.
    pub hitboxes: Vec<SceneHitbox>,
}

impl Scene {
    /// An empty level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a static box.
    pub fn with_wall(mut self, center: Vec3, half_extents: Vec3) -> Self {
        self.statics.push(SceneCollider {
            shape: Shape::Cuboid { half_extents },
            center,
            layer: LAYER_WORLD,
        });
        self
    }

    /// Adds a pushable box.
    pub fn with_crate(mut self, center: Vec3, half_extents: Vec3, mass: f32) -> Self {
        self.bodies.push(SceneBody {
            shape: Shape::Cuboid { half_extents },
            center,
            layer: LAYER_WORLD,
            mass,
        });
        self
    }

    /// Adds a spherical hitbox for `owner`.
    pub fn with_hitbox(mut self, owner: PeerId, radius: f32, start: Vec3, velocity: Vec3) -> Self {
        self.hitboxes.push(SceneHitbox {
            owner,
            shape: Shape::Sphere { radius },
            layer: LAYER_HITBOX,
            start,
            velocity,
        });
        self
    }

    /// Builds a collision world. Every peer building the same scene gets the
    /// same collider and body ids.
    pub fn build(&self, history_ticks: usize, delta_time: f32) -> SceneWorld {
        let mut world = HitboxWorld::new(history_ticks);
        for collider in &self.statics {
            world.add_static(collider.shape, collider.center, collider.layer);
        }
        let props = self
            .bodies
            .iter()
            .map(|body| world.add_dynamic(body.shape, body.center, body.layer, body.mass).1)
            .collect();
        let hitboxes = self
            .hitboxes
            .iter()
            .map(|hitbox| {
                let id = world.add_hitbox(hitbox.owner.0, hitbox.shape, hitbox.start, hitbox.layer);
                (id, *hitbox)
            })
            .collect();
        // Queries see colliders only after the first step.
        world.step(delta_time);
        SceneWorld {
            world,
            hitboxes,
            props,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hitbox_path_is_linear() {
        let hitbox = SceneHitbox {
            owner: PeerId(2),
            shape: Shape::Sphere { radius: 0.5 },
            layer: LAYER_HITBOX,
            start: Vec3::new(-3.0, 0.0, 20.0),
            velocity: Vec3::new(6.0, 0.0, 0.0),
        };
        assert_eq!(hitbox.center_at(0.0, 1.0 / 60.0), hitbox.start);
        assert!((hitbox.center_at(30.0, 1.0 / 60.0).x - 0.0).abs() < 1e-5);
        assert_eq!(hitbox.center_at(-5.0, 1.0 / 60.0), hitbox.start);
    }

    #[test]
    fn test_build_creates_every_collider() {
        let scene = Scene::new()
            .with_wall(Vec3::new(0.0, 0.0, 40.0), Vec3::new(10.0, 10.0, 0.5))
            .with_crate(Vec3::new(0.0, 0.0, 15.0), Vec3::splat(1.0), 20.0)
            .with_hitbox(PeerId(2), 0.5, Vec3::ZERO, Vec3::X);
        let built = scene.build(16, 1.0 / 60.0);
        assert_eq!(built.world.collider_count(), 3);
        assert_eq!(built.world.body_count(), 1);
        assert_eq!(built.hitboxes.len(), 1);
        assert_eq!(built.props.len(), 1);
        assert!(built.world.history(built.hitboxes[0].0).is_some());
    }

    #[test]
    fn test_built_world_is_queryable() {
        use volley_physics::{QueryTime, RaycastQuery};

        let scene = Scene::new().with_crate(Vec3::new(0.0, 0.0, 10.0), Vec3::splat(1.0), 100.0);
        let built = scene.build(16, 1.0 / 60.0);
        let hit = built
            .world
            .raycast(&RaycastQuery {
                origin: Vec3::ZERO,
                direction: Vec3::Z,
                max_distance: 50.0,
                layer_mask: LAYER_WORLD,
                exclude_owner: None,
                include_static: true,
                time: QueryTime::Present,
            })
            .unwrap();
        assert_eq!(hit.body, Some(built.props[0]));
        assert!((hit.distance - 9.0).abs() < 1e-3);
    }
}
