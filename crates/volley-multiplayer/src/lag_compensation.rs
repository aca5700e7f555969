//! Lag-compensated hit resolution for projectile records.
//!
//! Each tick a live projectile sweeps the segment it travelled during that
//! tick against the world as its shooter saw it. [`advance_record`] is a pure
//! step from `(tick, record, world)` to `(record, side effects)`, so a
//! resimulated tick reproduces the original outcome.

use glam::Vec3;
use tracing::{debug, trace};
use volley_physics::{BodyId, BodyMotion, HitboxWorld, QueryTime, RaycastHit, RaycastQuery};

use crate::clock::{Tick, ticks_for};
use crate::kinematic::FireRecord;
use crate::replicated::{ObjectAuthority, PeerId};
use crate::timer::TickTimer;

/// The physics collaborator seen by the replication core.
pub trait LagCompensation {
    /// Closest hit along a ray.
    fn raycast(&self, query: &RaycastQuery) -> Option<RaycastHit>;

    /// Applies an instantaneous impulse to a dynamic body.
    fn apply_impulse(&mut self, body: BodyId, impulse: Vec3) -> bool;

    /// Adds a body for a physics projectile.
    fn spawn_body(&mut self, position: Vec3, velocity: Vec3, mass: f32) -> BodyId;

    /// Position and velocity of a body.
    fn body_motion(&self, body: BodyId) -> Option<BodyMotion>;

    /// Teleports a body and replaces its velocity.
    fn set_body_motion(&mut self, body: BodyId, motion: BodyMotion) -> bool;

    /// Removes a body.
    fn remove_body(&mut self, body: BodyId) -> bool;
}

impl LagCompensation for HitboxWorld {
    fn raycast(&self, query: &RaycastQuery) -> Option<RaycastHit> {
        HitboxWorld::raycast(self, query)
    }

    fn apply_impulse(&mut self, body: BodyId, impulse: Vec3) -> bool {
        HitboxWorld::apply_impulse(self, body, impulse)
    }

    fn spawn_body(&mut self, position: Vec3, velocity: Vec3, mass: f32) -> BodyId {
        self.add_projectile(position, velocity, mass)
    }

    fn body_motion(&self, body: BodyId) -> Option<BodyMotion> {
        HitboxWorld::body_motion(self, body)
    }

    fn set_body_motion(&mut self, body: BodyId, motion: BodyMotion) -> bool {
        HitboxWorld::set_body_motion(self, body, motion)
    }

    fn remove_body(&mut self, body: BodyId) -> bool {
        HitboxWorld::remove_body(self, body)
    }
}

/// A non-degenerate swept segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweptSegment {
    /// Segment start.
    pub origin: Vec3,
    /// Unit direction from start to end.
    pub direction: Vec3,
    /// Segment length in meters.
    pub length: f32,
}

impl SweptSegment {
    /// Segment between two points, `None` when they coincide.
    pub fn between(from: Vec3, to: Vec3) -> Option<Self> {
        let delta = to - from;
        let length = delta.length();
        if !(length > f32::EPSILON) {
            return None;
        }
        Some(Self {
            origin: from,
            direction: delta / length,
            length,
        })
    }
}

/// Who is shooting and which world snapshot the shot is resolved against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotFilter {
    /// The shooter's hitboxes are never hit.
    pub shooter: Option<PeerId>,
    /// Present or rewound hitboxes.
    pub time: QueryTime,
    /// Layers the shot collides with.
    pub layer_mask: u32,
}

impl ShotFilter {
    fn query(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RaycastQuery {
        RaycastQuery {
            origin,
            direction,
            max_distance,
            layer_mask: self.layer_mask,
            exclude_owner: self.shooter.map(|peer| peer.0),
            include_static: true,
            time: self.time,
        }
    }
}

/// A resolved hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHit {
    /// World-space hit point.
    pub point: Vec3,
    /// Surface normal.
    pub normal: Vec3,
    /// Distance from the segment start.
    pub distance: f32,
    /// Distance as a fraction of the segment length.
    pub fraction: f32,
    /// Direction of travel.
    pub direction: Vec3,
    /// Dynamic body that was hit, if any.
    pub body: Option<BodyId>,
}

/// An impulse a hit wants to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingImpulse {
    /// Target body.
    pub body: BodyId,
    /// Impulse vector.
    pub impulse: Vec3,
}

impl PendingImpulse {
    /// Impulse along the hit direction, if a dynamic body was hit.
    pub fn from_hit(hit: &SegmentHit, strength: f32) -> Option<Self> {
        hit.body.map(|body| Self {
            body,
            impulse: hit.direction * strength,
        })
    }
}

/// Whether world-mutating side effects may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpulseGate {
    /// Apply now.
    Apply,
    /// Skip: the caller is not authoritative or its object is unconfirmed.
    Skip,
}

impl ImpulseGate {
    /// Only the state authority applies impulses, and never for a predicted
    /// spawn.
    pub fn for_authority(authority: &ObjectAuthority) -> Self {
        if authority.has_state_authority() && !authority.predicted_spawn {
            ImpulseGate::Apply
        } else {
            ImpulseGate::Skip
        }
    }
}

/// Applies `impulse` if the gate allows it. Returns whether it was applied.
pub fn apply_gated(
    world: &mut dyn LagCompensation,
    impulse: PendingImpulse,
    gate: ImpulseGate,
) -> bool {
    match gate {
        ImpulseGate::Apply => world.apply_impulse(impulse.body, impulse.impulse),
        ImpulseGate::Skip => {
            trace!(body = impulse.body.0, "impulse skipped");
            false
        }
    }
}

/// Sweeps `segment` against the world.
pub fn cast_segment(
    world: &dyn LagCompensation,
    segment: &SweptSegment,
    filter: &ShotFilter,
) -> Option<SegmentHit> {
    let hit = world.raycast(&filter.query(segment.origin, segment.direction, segment.length))?;
    Some(SegmentHit {
        point: hit.point,
        normal: hit.normal,
        distance: hit.distance,
        fraction: hit.distance / segment.length,
        direction: segment.direction,
        body: hit.body,
    })
}

/// Instant hitscan along `direction` up to `range`.
pub fn cast_hitscan(
    world: &dyn LagCompensation,
    origin: Vec3,
    direction: Vec3,
    range: f32,
    filter: &ShotFilter,
) -> Option<SegmentHit> {
    let direction = direction.try_normalize()?;
    let segment = SweptSegment {
        origin,
        direction,
        length: range,
    };
    cast_segment(world, &segment, filter)
}

/// Tuning for [`advance_record`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolveParams {
    /// Seconds per tick.
    pub delta_time: f32,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Post-hit linger in seconds.
    pub linger_secs: f32,
    /// Impulse strength applied to dynamic bodies.
    pub hit_impulse: f32,
}

/// What one tick did to a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Nothing to resolve: the record already hit, or did not move.
    Idle,
    /// Travelled without hitting anything.
    Moving,
    /// Hit something this tick.
    Hit(SegmentHit),
    /// Lifetime or linger elapsed; retire the record.
    Expired,
}

/// Result of [`advance_record`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordStep {
    /// The record after this tick.
    pub record: FireRecord,
    /// What happened.
    pub outcome: StepOutcome,
    /// Impulse the hit wants applied, subject to [`ImpulseGate`].
    pub impulse: Option<PendingImpulse>,
}

/// Advances one record through `tick`. Reads the world, never mutates it.
pub fn advance_record(
    record: &FireRecord,
    tick: Tick,
    params: &ResolveParams,
    world: &dyn LagCompensation,
    filter: &ShotFilter,
) -> RecordStep {
    let mut step = RecordStep {
        record: *record,
        outcome: StepOutcome::Idle,
        impulse: None,
    };

    if record.life.expired(tick) {
        step.outcome = StepOutcome::Expired;
        return step;
    }
    if record.destroyed {
        return step;
    }

    let (from, to) = record.segment(tick, params.delta_time);
    let Some(segment) = SweptSegment::between(from, to) else {
        return step;
    };

    step.outcome = StepOutcome::Moving;
    if let Some(hit) = cast_segment(world, &segment, filter) {
        // A non-positive linger still retires the record on the next tick.
        let linger = TickTimer::from_ticks(
            tick,
            ticks_for(params.linger_secs, params.tick_rate).unwrap_or(0),
        );
        step.record.record_hit(hit.point, linger);
        step.impulse = PendingImpulse::from_hit(&hit, params.hit_impulse);
        step.outcome = StepOutcome::Hit(hit);
        debug!(
            tick,
            fire_tick = record.fire_tick,
            x = hit.point.x,
            y = hit.point.y,
            z = hit.point.z,
            "projectile hit"
        );
    }
    step
}

#[cfg(test)]
mod tests {
    use volley_physics::Shape;

    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn params() -> ResolveParams {
        ResolveParams {
            delta_time: DT,
            tick_rate: 60,
            linger_secs: 2.0,
            hit_impulse: 50.0,
        }
    }

    fn filter(shooter: u32) -> ShotFilter {
        ShotFilter {
            shooter: Some(PeerId(shooter)),
            time: QueryTime::Present,
            layer_mask: u32::MAX,
        }
    }

    /// A thin wall whose near face lies on the plane `z`.
    fn wall_world(z: f32) -> HitboxWorld {
        let mut world = HitboxWorld::new(16);
        world.add_static(
            Shape::Cuboid {
                half_extents: Vec3::new(10.0, 10.0, 0.05),
            },
            Vec3::new(0.0, 0.0, z + 0.05),
            1,
        );
        world.step(DT);
        world
    }

    #[test]
    fn test_degenerate_segment_short_circuits() {
        assert!(SweptSegment::between(Vec3::ONE, Vec3::ONE).is_none());

        let world = wall_world(0.0);
        let record = FireRecord::new(10, Vec3::ZERO, Vec3::Z, TickTimer::NONE);
        let step = advance_record(&record, 10, &params(), &world, &filter(1));
        assert_eq!(step.outcome, StepOutcome::Idle);
        assert_eq!(step.record, record);
    }

    #[test]
    fn test_segment_hit_reports_fraction() {
        let world = wall_world(5.0);
        let segment = SweptSegment::between(Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0)).unwrap();
        let hit = cast_segment(&world, &segment, &filter(1)).unwrap();
        assert!((hit.distance - 5.0).abs() < 1e-4);
        assert!((hit.fraction - 0.5).abs() < 1e-5);
        assert!((hit.point - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
        assert!((hit.normal - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn test_record_hits_wall_exactly_once() {
        // 600 m/s covers 10 m per tick; the wall sits halfway along the
        // second tick's segment.
        let world = wall_world(15.0);
        let mut record = FireRecord::new(
            100,
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 600.0),
            TickTimer::create(100, 4.0, 60),
        );

        let mut transitions = 0;
        for tick in 101..=200 {
            let before = record.destroyed;
            let step = advance_record(&record, tick, &params(), &world, &filter(1));
            if let StepOutcome::Hit(hit) = step.outcome {
                assert_eq!(tick, 102);
                assert!((hit.fraction - 0.5).abs() < 1e-4);
            }
            record = step.record;
            if !before && record.destroyed {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
        let point = record.hit_position.unwrap();
        assert!((point - Vec3::new(0.0, 0.0, 15.0)).length() < 1e-4);
        assert_eq!(record.life.expiry_tick(), Some(102 + 120));
    }

    #[test]
    fn test_expired_record_is_retired() {
        let world = HitboxWorld::new(4);
        let record = FireRecord::new(100, Vec3::ZERO, Vec3::Z, TickTimer::create(100, 4.0, 60));
        for tick in 101..340 {
            let step = advance_record(&record, tick, &params(), &world, &filter(1));
            assert_eq!(step.outcome, StepOutcome::Moving, "tick {tick}");
        }
        let step = advance_record(&record, 340, &params(), &world, &filter(1));
        assert_eq!(step.outcome, StepOutcome::Expired);
    }

    #[test]
    fn test_zero_linger_expires_next_tick() {
        let world = wall_world(0.5);
        let record = FireRecord::new(0, Vec3::ZERO, Vec3::new(0.0, 0.0, 60.0), TickTimer::NONE);
        let p = ResolveParams {
            linger_secs: 0.0,
            ..params()
        };
        let hit = advance_record(&record, 1, &p, &world, &filter(1));
        assert!(matches!(hit.outcome, StepOutcome::Hit(_)));
        let next = advance_record(&hit.record, 2, &p, &world, &filter(1));
        assert_eq!(next.outcome, StepOutcome::Expired);
    }

    #[test]
    fn test_shooter_hitbox_is_ignored() {
        let mut world = HitboxWorld::new(4);
        world.add_hitbox(1, Shape::Sphere { radius: 1.0 }, Vec3::new(0.0, 0.0, 3.0), 1);
        let segment = SweptSegment::between(Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0)).unwrap();
        assert!(cast_segment(&world, &segment, &filter(1)).is_none());
        assert!(cast_segment(&world, &segment, &filter(2)).is_some());
    }

    #[test]
    fn test_historical_query_hits_rewound_target() {
        let mut world = HitboxWorld::new(16);
        let target = world.add_hitbox(2, Shape::Sphere { radius: 1.0 }, Vec3::new(0.0, 0.0, 5.0), 1);
        world.record(10);
        world.set_center(target, Vec3::new(40.0, 0.0, 5.0));
        world.record(11);

        let mut shot = filter(1);
        assert!(cast_hitscan(&world, Vec3::ZERO, Vec3::Z, 100.0, &shot).is_none());
        shot.time = QueryTime::Historical(10.0);
        let hit = cast_hitscan(&world, Vec3::ZERO, Vec3::Z, 100.0, &shot).unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_impulse_gate() {
        let mut world = HitboxWorld::new(4);
        let (_, body) = world.add_dynamic(Shape::Sphere { radius: 1.0 }, Vec3::ZERO, 1, 1.0);
        world.step(DT);
        let impulse = PendingImpulse {
            body,
            impulse: Vec3::X,
        };

        let predicted = ObjectAuthority::predicted(PeerId(1));
        let client = ObjectAuthority::client(PeerId(1), Some(PeerId(1)));
        let server = ObjectAuthority::server(Some(PeerId(1)));

        assert_eq!(ImpulseGate::for_authority(&predicted), ImpulseGate::Skip);
        assert_eq!(ImpulseGate::for_authority(&client), ImpulseGate::Skip);
        assert!(!apply_gated(&mut world, impulse, ImpulseGate::for_authority(&predicted)));
        assert!(world.impulses().is_empty());

        assert!(apply_gated(&mut world, impulse, ImpulseGate::for_authority(&server)));
        assert_eq!(world.impulses().len(), 1);
        assert_eq!(world.impulses_applied(), 1);
        let velocity = world.body_motion(body).unwrap().velocity;
        assert!((velocity.x - 1.0).abs() < 1e-3);
    }
}
