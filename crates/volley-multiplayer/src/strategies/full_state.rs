//! Full-state replication: every shot is a networked physics object whose
//! whole pose is synced each tick.
//!
//! By default the authority spawns one projectile per shot and the shooter
//! waits for it to replicate. With a projectile pool the weapon keeps a few
//! hidden projectiles spawned ahead of time; firing launches the next one
//! on both the authority and the shooter, which then simulates it ahead of
//! confirmation, and the authority refills the slot.

use std::any::Any;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;
use volley_physics::{BodyId, BodyMotion, HitboxHistory, QueryTime};

use super::{FireStrategy, Shot};
use crate::behaviour::{
    Launch, NetworkBehaviour, ObjectKey, ObjectKind, PoolSlot, RenderContext, SimContext,
    SpawnRequest, StrategyKind, Tuning,
};
use crate::clock::{Tick, ticks_for};
use crate::error::NetcodeError;
use crate::lag_compensation::{
    ImpulseGate, LagCompensation, PendingImpulse, ShotFilter, SweptSegment, apply_gated,
    cast_segment,
};
use crate::replicated::{ChangeDetector, ObjectAuthority, Replicated};
use crate::replication::{NetworkId, decode, encode};
use crate::timer::TickTimer;
use crate::visuals::{VisualId, VisualKind, VisualLayer};

const POSE_HISTORY: usize = 32;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Fires [`PhysicsProjectile`]s, either freshly spawned per shot or taken
/// from a pool of pre-spawned ones.
#[derive(Debug, Clone, Default)]
pub struct FullStateStrategy {
    pool: Vec<Option<NetworkId>>,
}

impl FullStateStrategy {
    /// A strategy keeping `pool_size` projectiles ready. Zero disables the
    /// pool.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: vec![None; pool_size],
        }
    }

    /// Pool slots; `None` while a slot awaits its replacement.
    pub fn pool(&self) -> &[Option<NetworkId>] {
        &self.pool
    }

    /// Whether shots come from the pool.
    pub fn is_pooled(&self) -> bool {
        !self.pool.is_empty()
    }

    fn fire_from_pool(&mut self, shot: &Shot, ctx: &mut SimContext<'_>) {
        let index = shot.index as usize % self.pool.len();
        match self.pool[index].take() {
            Some(id) => ctx.commands.launch(Launch {
                target: ObjectKey::Networked(id),
                tick: ctx.tick,
                origin: shot.origin,
                direction: shot.direction,
            }),
            None => debug!(tick = ctx.tick, index, "pool slot empty, shot dropped"),
        }
    }
}

impl FireStrategy for FullStateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FullState
    }

    fn fire(&mut self, shot: &Shot, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        if self.is_pooled() {
            self.fire_from_pool(shot, ctx);
            return Ok(());
        }
        if !ctx.authority.has_state_authority() {
            return Ok(());
        }
        let projectile = PhysicsProjectile::fired(ctx.tick, shot.origin, shot.direction, ctx.tuning);
        ctx.commands.spawn(SpawnRequest {
            behaviour: Box::new(projectile),
            input_authority: ctx.authority.input_authority,
            prediction_key: None,
            pool_slot: None,
        });
        Ok(())
    }

    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        if !ctx.authority.has_state_authority() {
            return Ok(());
        }
        for (slot, entry) in self.pool.iter().enumerate() {
            if entry.is_some() {
                continue;
            }
            ctx.commands.spawn(SpawnRequest {
                behaviour: Box::new(PhysicsProjectile::pooled()),
                input_authority: ctx.authority.input_authority,
                prediction_key: None,
                pool_slot: Some(PoolSlot {
                    owner: ctx.object,
                    slot,
                }),
            });
        }
        Ok(())
    }

    fn attach_pooled(&mut self, slot: usize, id: NetworkId) {
        if let Some(entry) = self.pool.get_mut(slot) {
            *entry = Some(id);
        }
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        if !self.is_pooled() {
            return Ok(Vec::new());
        }
        encode("projectile pool", &self.pool)
    }

    fn read_state(&mut self, bytes: &[u8]) -> Result<(), NetcodeError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.pool = decode("projectile pool", bytes)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Projectile
// ---------------------------------------------------------------------------

/// Replicated pose and outcome of a physics projectile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsState {
    /// Current position.
    pub position: Vec3,
    /// Orientation, facing the direction of travel.
    pub rotation: Quat,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Lifetime, replaced by the linger window after a hit.
    pub life: TickTimer,
    /// Set once the projectile collided.
    pub destroyed: bool,
    /// Collision point.
    pub hit_position: Option<Vec3>,
    /// Launched. Pooled projectiles stay hidden and inert until then.
    pub fired: bool,
    /// Launched from a pool; the input holder simulates it too.
    pub predicted: bool,
}

impl Default for PhysicsState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            life: TickTimer::NONE,
            destroyed: false,
            hit_position: None,
            fired: false,
            predicted: false,
        }
    }
}

impl PhysicsState {
    fn launched(tick: Tick, origin: Vec3, direction: Vec3, tuning: &Tuning, predicted: bool) -> Self {
        let weapon = &tuning.weapon;
        let velocity = direction.normalize_or_zero() * weapon.launch_impulse / projectile_mass(tuning);
        Self {
            position: origin,
            rotation: facing(velocity, Quat::IDENTITY),
            velocity,
            life: TickTimer::create(tick, weapon.lifetime_secs, tuning.tick_rate),
            destroyed: false,
            hit_position: None,
            fired: true,
            predicted,
        }
    }
}

fn projectile_mass(tuning: &Tuning) -> f32 {
    if tuning.weapon.projectile_mass > 0.0 {
        tuning.weapon.projectile_mass
    } else {
        1.0
    }
}

/// A gravity-affected projectile. The authority moves it on a rigid body in
/// its collision world; a shooter predicting a pooled launch integrates the
/// same motion without one.
#[derive(Debug, Clone)]
pub struct PhysicsProjectile {
    state: Replicated<PhysicsState>,
    poses: HitboxHistory,
    visual: Option<VisualId>,
    destroyed: ChangeDetector<bool>,
    body: Option<BodyId>,
}

impl PhysicsProjectile {
    /// Empty projectile awaiting replicated state.
    pub fn blank() -> Self {
        Self {
            state: Replicated::new(PhysicsState::default()),
            poses: HitboxHistory::new(POSE_HISTORY),
            visual: None,
            destroyed: ChangeDetector::new(),
            body: None,
        }
    }

    /// A hidden projectile waiting in a weapon's pool.
    pub fn pooled() -> Self {
        Self::blank()
    }

    /// A projectile launched from `origin` along `direction` on `tick`.
    pub fn fired(tick: Tick, origin: Vec3, direction: Vec3, tuning: &Tuning) -> Self {
        let mut projectile = Self::blank();
        projectile
            .state
            .overwrite(PhysicsState::launched(tick, origin, direction, tuning, false));
        projectile.poses.record(tick, origin);
        projectile
    }

    /// Current replicated state.
    pub fn state(&self) -> &PhysicsState {
        self.state.get()
    }

    /// Body carrying the projectile in the authority's world.
    pub fn body(&self) -> Option<BodyId> {
        self.body
    }

    fn release_body(&mut self, world: &mut dyn LagCompensation) {
        if let Some(body) = self.body.take() {
            world.remove_body(body);
        }
    }
}

fn facing(velocity: Vec3, fallback: Quat) -> Quat {
    velocity
        .try_normalize()
        .map(|direction| Quat::from_rotation_arc(Vec3::Z, direction))
        .unwrap_or(fallback)
}

impl NetworkBehaviour for PhysicsProjectile {
    fn kind(&self) -> ObjectKind {
        ObjectKind::PhysicsProjectile
    }

    fn spawned(&mut self, _authority: &ObjectAuthority, visuals: &mut VisualLayer) {
        let state = *self.state.get();
        if state.fired {
            let position = state.hit_position.unwrap_or(state.position);
            self.visual = Some(visuals.spawn(VisualKind::Projectile, position));
        }
        self.destroyed.prime(state.destroyed);
    }

    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        let current = *self.state.get();
        if !current.fired {
            return Ok(());
        }
        let authoritative = ctx.authority.has_state_authority();
        if !authoritative && !(current.predicted && ctx.authority.has_input_authority()) {
            return Ok(());
        }
        if current.life.expired(ctx.tick) {
            if authoritative {
                self.release_body(ctx.world);
                ctx.commands.despawn(ctx.object);
            }
            return Ok(());
        }
        if current.destroyed {
            return Ok(());
        }

        let position = if authoritative {
            let body = match self.body {
                Some(body) => body,
                None => {
                    let body = ctx.world.spawn_body(
                        current.position,
                        current.velocity,
                        projectile_mass(ctx.tuning),
                    );
                    self.body = Some(body);
                    body
                }
            };
            ctx.world
                .body_motion(body)
                .map_or(current.position, |motion| motion.position)
        } else {
            current.position
        };

        let dt = ctx.tuning.delta_time();
        let velocity = current.velocity + Vec3::from(ctx.tuning.weapon.gravity) * dt;
        let next = position + velocity * dt;

        // Collisions run against the present world; only tick-replayed
        // records rewind hitboxes.
        let filter = ShotFilter {
            time: QueryTime::Present,
            ..ctx.shot_filter()
        };
        let hit = SweptSegment::between(position, next)
            .and_then(|segment| cast_segment(&*ctx.world, &segment, &filter));

        let mut updated = current;
        let mut impulse = None;
        match hit {
            Some(hit) => {
                let linger = ticks_for(ctx.tuning.weapon.lifetime_after_hit_secs, ctx.tuning.tick_rate);
                updated.position = hit.point;
                updated.velocity = Vec3::ZERO;
                updated.destroyed = true;
                updated.hit_position = Some(hit.point);
                updated.life = TickTimer::from_ticks(ctx.tick, linger.unwrap_or(0));
                impulse = PendingImpulse::from_hit(&hit, ctx.tuning.weapon.hit_impulse);
                self.release_body(ctx.world);
                debug!(tick = ctx.tick, object = ?ctx.object, stage = ?ctx.stage, "physics projectile collided");
            }
            None => {
                updated.position = next;
                updated.velocity = velocity;
                updated.rotation = facing(velocity, current.rotation);
                if let Some(body) = self.body {
                    ctx.world.set_body_motion(body, BodyMotion { position, velocity });
                }
            }
        }

        self.state.set(&ctx.authority, "physics_state", updated)?;
        self.poses.record(ctx.tick, updated.position);
        if let Some(impulse) = impulse {
            apply_gated(ctx.world, impulse, ImpulseGate::for_authority(&ctx.authority));
        }
        Ok(())
    }

    fn launch(
        &mut self,
        launch: &Launch,
        authority: &ObjectAuthority,
        tuning: &Tuning,
    ) -> Result<(), NetcodeError> {
        if self.state.get().fired {
            return Ok(());
        }
        let state = PhysicsState::launched(launch.tick, launch.origin, launch.direction, tuning, true);
        self.state.set(authority, "physics_state", state)?;
        self.poses = HitboxHistory::new(POSE_HISTORY);
        self.poses.record(launch.tick, launch.origin);
        debug!(tick = launch.tick, target = ?launch.target, "pooled projectile launched");
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let state = *self.state.get();
        if !state.fired {
            // A rollback can un-fire a predicted launch.
            if let Some(visual) = self.visual.take() {
                ctx.visuals.destroy(visual);
            }
            return;
        }
        let visual = match self.visual {
            Some(visual) => visual,
            None => {
                let visual = ctx.visuals.spawn(VisualKind::Projectile, state.position);
                self.visual = Some(visual);
                visual
            }
        };
        if self.destroyed.changed(&state.destroyed) && state.destroyed {
            ctx.visuals
                .set_position(visual, state.hit_position.unwrap_or(state.position));
            ctx.visuals.show_hit(visual);
        }
        if state.destroyed {
            return;
        }
        let local = ctx.authority.has_state_authority()
            || (state.predicted && !ctx.authority.is_proxy());
        let tick = if local {
            ctx.time.local_tick
        } else {
            ctx.time.remote_tick
        };
        let position = self.poses.sample_at(tick).unwrap_or(state.position);
        ctx.visuals.set_position(visual, position);
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        encode("physics projectile", self.state.get())
    }

    fn read_state(&mut self, bytes: &[u8], tick: Tick) -> Result<(), NetcodeError> {
        let state: PhysicsState = decode("physics projectile", bytes)?;
        if self.state.get().fired && !state.fired {
            self.poses = HitboxHistory::new(POSE_HISTORY);
        }
        if state.fired {
            self.poses.record(tick, state.position);
        }
        self.state.overwrite(state);
        Ok(())
    }

    fn despawned(&mut self, visuals: &mut VisualLayer) {
        if let Some(visual) = self.visual.take() {
            visuals.destroy(visual);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
