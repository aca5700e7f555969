//! The collision world queried by projectile hit detection.
//!
//! Wraps a Rapier pipeline. World geometry and pushable props are regular
//! Rapier colliders found through the broad-phase query pipeline. Hitboxes
//! are sensor colliders whose recorded history lets a query pose them where
//! a shooter saw them; they are cast one by one at that pose, so a rewind
//! never has to touch the broad phase.

use std::fmt;

use glam::Vec3;
use rapier3d::parry::query::RayCast;
use rapier3d::prelude::*;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::history::HitboxHistory;
use crate::shapes::Shape;

/// Identifier of any collider in a [`HitboxWorld`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderId(pub u32);

/// Identifier of a dynamic body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

/// Which query mode a collider participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderKind {
    /// World geometry and dynamic props. Always evaluated at present time.
    Static,
    /// Peer-owned hitbox with recorded history.
    Hitbox,
}

/// When a raycast is evaluated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueryTime {
    /// Current collider positions.
    Present,
    /// Hitboxes are rewound to the given fractional tick.
    Historical(f64),
}

/// A raycast request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastQuery {
    /// Ray start.
    pub origin: Vec3,
    /// Ray direction. Need not be normalized.
    pub direction: Vec3,
    /// Maximum distance along the ray.
    pub max_distance: f32,
    /// Collider layers that may be hit.
    pub layer_mask: u32,
    /// Hitboxes owned by this peer are skipped.
    pub exclude_owner: Option<u32>,
    /// Whether static colliders are considered at all.
    pub include_static: bool,
    /// Present or rewound hitbox positions.
    pub time: QueryTime,
}

/// Result of a successful raycast.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    /// World-space hit point.
    pub point: Vec3,
    /// Surface normal at the hit point.
    pub normal: Vec3,
    /// Distance from the ray origin.
    pub distance: f32,
    /// Collider that was hit.
    pub collider: ColliderId,
    /// Dynamic body attached to the collider, if any.
    pub body: Option<BodyId>,
    /// Owning peer for hitboxes.
    pub owner: Option<u32>,
}

/// Position and linear velocity of a body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyMotion {
    /// Center of the body.
    pub position: Vec3,
    /// Linear velocity in meters per second.
    pub velocity: Vec3,
}

/// Record of an impulse applied through [`HitboxWorld::apply_impulse`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppliedImpulse {
    /// Body that received the impulse.
    pub body: BodyId,
    /// Impulse vector in newton-seconds.
    pub impulse: Vec3,
}

#[derive(Debug)]
struct ColliderEntry {
    handle: ColliderHandle,
    kind: ColliderKind,
    layer: u32,
    owner: Option<u32>,
    body: Option<BodyId>,
    history: Option<HitboxHistory>,
}

impl ColliderEntry {
    fn admits(&self, query: &RaycastQuery) -> bool {
        if self.layer & query.layer_mask == 0 {
            return false;
        }
        match self.kind {
            ColliderKind::Static => query.include_static,
            ColliderKind::Hitbox => query.exclude_owner.is_none() || self.owner != query.exclude_owner,
        }
    }
}

fn to_vector(v: Vec3) -> Vector {
    Vector::new(v.x, v.y, v.z)
}

fn to_vec3(x: f32, y: f32, z: f32) -> Vec3 {
    Vec3::new(x, y, z)
}

/// Rapier state plus the hitbox history of one peer.
pub struct HitboxWorld {
    gravity: Vector,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    entries: FxHashMap<ColliderId, ColliderEntry>,
    bodies: FxHashMap<BodyId, RigidBodyHandle>,
    impulses: Vec<AppliedImpulse>,
    impulses_applied: u64,
    history_capacity: usize,
    next_collider: u32,
    next_body: u32,
}

impl HitboxWorld {
    /// Creates an empty, weightless world that keeps `history_capacity`
    /// ticks of hitbox history.
    pub fn new(history_capacity: usize) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: 1.0 / 60.0,
            ..Default::default()
        };
        Self {
            gravity: Vector::new(0.0, 0.0, 0.0),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            entries: FxHashMap::default(),
            bodies: FxHashMap::default(),
            impulses: Vec::new(),
            impulses_applied: 0,
            history_capacity,
            next_collider: 1,
            next_body: 1,
        }
    }

    fn allocate_collider(&mut self) -> ColliderId {
        let id = ColliderId(self.next_collider);
        self.next_collider += 1;
        id
    }

    fn allocate_body(&mut self) -> BodyId {
        let id = BodyId(self.next_body);
        self.next_body += 1;
        id
    }

    /// Adds immovable world geometry.
    pub fn add_static(&mut self, shape: Shape, center: Vec3, layer: u32) -> ColliderId {
        let id = self.allocate_collider();
        let collider = shape
            .collider()
            .translation(to_vector(center))
            .user_data(u128::from(id.0))
            .build();
        let handle = self.collider_set.insert(collider);
        self.entries.insert(
            id,
            ColliderEntry {
                handle,
                kind: ColliderKind::Static,
                layer,
                owner: None,
                body: None,
                history: None,
            },
        );
        id
    }

    /// Adds a dynamic prop that hit impulses can push.
    pub fn add_dynamic(
        &mut self,
        shape: Shape,
        center: Vec3,
        layer: u32,
        mass: f32,
    ) -> (ColliderId, BodyId) {
        let id = self.allocate_collider();
        let body = self.allocate_body();

        let rigid_body = RigidBodyBuilder::dynamic()
            .translation(to_vector(center))
            .can_sleep(false)
            .build();
        let body_handle = self.rigid_body_set.insert(rigid_body);
        let collider = shape
            .collider()
            .mass(mass.max(f32::EPSILON))
            .user_data(u128::from(id.0))
            .build();
        let handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);

        self.bodies.insert(body, body_handle);
        self.entries.insert(
            id,
            ColliderEntry {
                handle,
                kind: ColliderKind::Static,
                layer,
                owner: None,
                body: Some(body),
                history: None,
            },
        );
        (id, body)
    }

    /// Adds a lag-compensated hitbox owned by `owner`. Hitboxes are sensors:
    /// they are posed by their owner and never pushed by contacts.
    pub fn add_hitbox(&mut self, owner: u32, shape: Shape, center: Vec3, layer: u32) -> ColliderId {
        let id = self.allocate_collider();
        let collider = shape
            .collider()
            .translation(to_vector(center))
            .sensor(true)
            .user_data(u128::from(id.0))
            .build();
        let handle = self.collider_set.insert(collider);
        self.entries.insert(
            id,
            ColliderEntry {
                handle,
                kind: ColliderKind::Hitbox,
                layer,
                owner: Some(owner),
                body: None,
                history: Some(HitboxHistory::new(self.history_capacity)),
            },
        );
        id
    }

    /// Adds a collider-less dynamic body for a physics projectile. It moves
    /// only by its velocity; hits are found by sweeping its path.
    pub fn add_projectile(&mut self, position: Vec3, velocity: Vec3, mass: f32) -> BodyId {
        let body = self.allocate_body();
        let rigid_body = RigidBodyBuilder::dynamic()
            .translation(to_vector(position))
            .linvel(to_vector(velocity))
            .additional_mass(mass.max(f32::EPSILON))
            .can_sleep(false)
            .build();
        let handle = self.rigid_body_set.insert(rigid_body);
        self.bodies.insert(body, handle);
        trace!(body = body.0, "projectile body added");
        body
    }

    /// Removes a body and every collider attached to it.
    pub fn remove_body(&mut self, body: BodyId) -> bool {
        let Some(handle) = self.bodies.remove(&body) else {
            return false;
        };
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        self.entries.retain(|_, entry| entry.body != Some(body));
        trace!(body = body.0, "body removed");
        true
    }

    /// Moves a collider to a new present-time center. Colliders attached to
    /// a body move the body.
    pub fn set_center(&mut self, id: ColliderId, center: Vec3) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        if let Some(body) = entry.body {
            return self.set_body_motion(
                body,
                BodyMotion {
                    position: center,
                    velocity: self.body_motion(body).map_or(Vec3::ZERO, |m| m.velocity),
                },
            );
        }
        match self.collider_set.get_mut(entry.handle) {
            Some(collider) => {
                collider.set_translation(to_vector(center));
                true
            }
            None => false,
        }
    }

    /// Present-time center of a collider.
    pub fn center(&self, id: ColliderId) -> Option<Vec3> {
        let entry = self.entries.get(&id)?;
        if let Some(body) = entry.body {
            return self.body_motion(body).map(|motion| motion.position);
        }
        let collider = self.collider_set.get(entry.handle)?;
        let t = collider.translation();
        Some(to_vec3(t.x, t.y, t.z))
    }

    /// Snapshots every hitbox position for `tick`.
    pub fn record(&mut self, tick: u64) {
        let collider_set = &self.collider_set;
        for entry in self.entries.values_mut() {
            let Some(history) = entry.history.as_mut() else {
                continue;
            };
            if let Some(collider) = collider_set.get(entry.handle) {
                let t = collider.translation();
                history.record(tick, to_vec3(t.x, t.y, t.z));
            }
        }
    }

    /// Recorded history of a hitbox.
    pub fn history(&self, id: ColliderId) -> Option<&HitboxHistory> {
        self.entries.get(&id).and_then(|e| e.history.as_ref())
    }

    /// Advances the simulation by `dt` seconds. Colliders added since the
    /// previous step become visible to queries afterwards.
    pub fn step(&mut self, dt: f32) {
        if dt > 0.0 {
            self.integration_parameters.dt = dt;
        }
        self.physics_pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    fn entry_of(&self, collider: &Collider) -> Option<(ColliderId, &ColliderEntry)> {
        let id = ColliderId(u32::try_from(collider.user_data).ok()?);
        self.entries.get(&id).map(|entry| (id, entry))
    }

    fn hit(
        query: &RaycastQuery,
        direction: Vec3,
        id: ColliderId,
        entry: &ColliderEntry,
        distance: f32,
        normal: Vec3,
    ) -> RaycastHit {
        RaycastHit {
            point: query.origin + direction * distance,
            normal,
            distance,
            collider: id,
            body: entry.body,
            owner: entry.owner,
        }
    }

    /// Casts a ray and returns the closest hit within `max_distance`.
    pub fn raycast(&self, query: &RaycastQuery) -> Option<RaycastHit> {
        let direction = query.direction.try_normalize()?;

        // World geometry and props through the broad phase.
        let predicate = |_: ColliderHandle, collider: &Collider| {
            self.entry_of(collider)
                .is_some_and(|(_, entry)| entry.kind == ColliderKind::Static && entry.admits(query))
        };
        let filter = QueryFilter::new().predicate(&predicate);
        let pipeline = self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.rigid_body_set,
            &self.collider_set,
            filter,
        );
        let ray = Ray::new(to_vector(query.origin), to_vector(direction));
        let mut best = pipeline
            .cast_ray_and_get_normal(&ray, query.max_distance, true)
            .and_then(|(handle, intersection)| {
                let (id, entry) = self.entry_of(self.collider_set.get(handle)?)?;
                let n = intersection.normal;
                Some(Self::hit(
                    query,
                    direction,
                    id,
                    entry,
                    intersection.time_of_impact,
                    to_vec3(n.x, n.y, n.z),
                ))
            });

        // Hitboxes at the pose the query asks for.
        for (&id, entry) in &self.entries {
            if entry.kind != ColliderKind::Hitbox || !entry.admits(query) {
                continue;
            }
            let Some(collider) = self.collider_set.get(entry.handle) else {
                continue;
            };
            let present = collider.translation();
            let present = to_vec3(present.x, present.y, present.z);
            let center = match (query.time, &entry.history) {
                (QueryTime::Historical(tick), Some(history)) => {
                    history.sample_at(tick).unwrap_or(present)
                }
                _ => present,
            };
            let local = Ray::new(to_vector(query.origin - center), to_vector(direction));
            let Some(intersection) =
                collider
                    .shape()
                    .cast_local_ray_and_get_normal(&local, query.max_distance, true)
            else {
                continue;
            };
            let distance = intersection.time_of_impact;
            if best.is_some_and(|b| b.distance < distance || (b.distance == distance && b.collider < id))
            {
                continue;
            }
            let n = intersection.normal;
            best = Some(Self::hit(query, direction, id, entry, distance, to_vec3(n.x, n.y, n.z)));
        }

        if let Some(hit) = &best {
            trace!(collider = hit.collider.0, distance = hit.distance, "raycast hit");
        }
        best
    }

    /// Applies an instantaneous impulse to a dynamic body.
    pub fn apply_impulse(&mut self, body: BodyId, impulse: Vec3) -> bool {
        let Some(rigid_body) = self
            .bodies
            .get(&body)
            .and_then(|handle| self.rigid_body_set.get_mut(*handle))
        else {
            return false;
        };
        rigid_body.apply_impulse(to_vector(impulse), true);
        self.impulses.push(AppliedImpulse { body, impulse });
        self.impulses_applied += 1;
        true
    }

    /// Impulses applied since the last [`drain_impulses`](Self::drain_impulses).
    pub fn impulses(&self) -> &[AppliedImpulse] {
        &self.impulses
    }

    /// Takes the impulses applied since the previous drain.
    pub fn drain_impulses(&mut self) -> Vec<AppliedImpulse> {
        std::mem::take(&mut self.impulses)
    }

    /// Impulses applied over the world's lifetime.
    pub fn impulses_applied(&self) -> u64 {
        self.impulses_applied
    }

    /// Position and velocity of a body.
    pub fn body_motion(&self, body: BodyId) -> Option<BodyMotion> {
        let rigid_body = self.rigid_body_set.get(*self.bodies.get(&body)?)?;
        let p = rigid_body.translation();
        let v = rigid_body.linvel();
        Some(BodyMotion {
            position: to_vec3(p.x, p.y, p.z),
            velocity: to_vec3(v.x, v.y, v.z),
        })
    }

    /// Teleports a body and replaces its velocity.
    pub fn set_body_motion(&mut self, body: BodyId, motion: BodyMotion) -> bool {
        let Some(rigid_body) = self
            .bodies
            .get(&body)
            .and_then(|handle| self.rigid_body_set.get_mut(*handle))
        else {
            return false;
        };
        rigid_body.set_translation(to_vector(motion.position), true);
        rigid_body.set_linvel(to_vector(motion.velocity), true);
        true
    }

    /// Replaces a body's velocity, keeping its position.
    pub fn set_body_velocity(&mut self, body: BodyId, velocity: Vec3) -> bool {
        let Some(rigid_body) = self
            .bodies
            .get(&body)
            .and_then(|handle| self.rigid_body_set.get_mut(*handle))
        else {
            return false;
        };
        rigid_body.set_linvel(to_vector(velocity), true);
        true
    }

    /// Number of colliders of every kind.
    pub fn collider_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of bodies, props and projectiles alike.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

impl Default for HitboxWorld {
    fn default() -> Self {
        Self::new(128)
    }
}

impl fmt::Debug for HitboxWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HitboxWorld")
            .field("colliders", &self.entries.len())
            .field("bodies", &self.bodies.len())
            .field("impulses_applied", &self.impulses_applied)
            .field("history_capacity", &self.history_capacity)
            .finish_non_exhaustive()
    }
}
