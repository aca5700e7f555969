//! Collision world for lag-compensated projectile hit detection.
//!
//! [`HitboxWorld`] wraps a Rapier pipeline holding static colliders,
//! dynamic bodies that accept impulses, and peer-owned hitboxes whose
//! positions are recorded every tick so raycasts can be resolved against the
//! world as a shooter saw it.

mod history;
mod shapes;
mod world;

pub use history::{HistorySample, HitboxHistory};
pub use shapes::Shape;
pub use world::{
    AppliedImpulse, BodyId, BodyMotion, ColliderId, ColliderKind, HitboxWorld, QueryTime,
    RaycastHit, RaycastQuery,
};
