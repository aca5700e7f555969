//! Fire-data replication: one networked object per shot, but only its fire
//! record is synced. Every peer replays the path from the record.

use std::any::Any;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{FireStrategy, Shot};
use crate::behaviour::{
    NetworkBehaviour, ObjectKind, RenderContext, SimContext, SpawnRequest, StrategyKind, Tuning,
};
use crate::clock::Tick;
use crate::error::NetcodeError;
use crate::kinematic::FireRecord;
use crate::lag_compensation::{ImpulseGate, StepOutcome, advance_record, apply_gated};
use crate::prediction::PredictionKey;
use crate::replicated::{ChangeDetector, ObjectAuthority, Replicated};
use crate::replication::{decode, encode};
use crate::timer::TickTimer;
use crate::visuals::{VisualId, VisualKind, VisualLayer};

/// Spawns one [`FireDataProjectile`] per shot. With spawn prediction on, the
/// input holder spawns it immediately under a [`PredictionKey`] and the
/// authority spawns the confirmed object under the same key.
#[derive(Debug, Clone, Copy, Default)]
pub struct FireDataStrategy;

impl FireStrategy for FireDataStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FireData
    }

    fn fire(&mut self, shot: &Shot, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        let predict = ctx.tuning.weapon.use_spawn_prediction;
        let authority = ctx.authority;
        if !(authority.has_state_authority() || (predict && authority.has_input_authority())) {
            return Ok(());
        }
        let prediction_key = authority
            .input_authority
            .filter(|_| predict)
            .map(|peer| PredictionKey::new(ctx.tick, peer));

        let projectile = FireDataProjectile::fire(ctx.tick, shot.origin, shot.direction, ctx.tuning);
        ctx.commands.spawn(SpawnRequest {
            behaviour: Box::new(projectile),
            input_authority: authority.input_authority,
            prediction_key,
            pool_slot: None,
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A projectile whose only replicated state is its [`FireRecord`].
#[derive(Debug, Clone)]
pub struct FireDataProjectile {
    data: Replicated<FireRecord>,
    visual: Option<VisualId>,
    destroyed: ChangeDetector<bool>,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    data: FireRecord,
}

impl FireDataProjectile {
    /// Empty projectile awaiting replicated state.
    pub fn blank() -> Self {
        Self::from_record(FireRecord::new(0, Vec3::ZERO, Vec3::ZERO, TickTimer::NONE))
    }

    /// A projectile fired on `tick` from `origin` along `direction`.
    pub fn fire(tick: Tick, origin: Vec3, direction: Vec3, tuning: &Tuning) -> Self {
        let velocity = direction.normalize_or_zero() * tuning.weapon.speed;
        let life = TickTimer::create(tick, tuning.weapon.lifetime_secs, tuning.tick_rate);
        Self::from_record(FireRecord::new(tick, origin, velocity, life))
    }

    fn from_record(record: FireRecord) -> Self {
        Self {
            data: Replicated::new(record),
            visual: None,
            destroyed: ChangeDetector::new(),
        }
    }

    /// Current fire record.
    pub fn record(&self) -> &FireRecord {
        self.data.get()
    }
}

impl NetworkBehaviour for FireDataProjectile {
    fn kind(&self) -> ObjectKind {
        ObjectKind::FireDataProjectile
    }

    fn spawned(&mut self, _authority: &ObjectAuthority, visuals: &mut VisualLayer) {
        let record = *self.data.get();
        let position = record.hit_position.unwrap_or(record.fire_position);
        self.visual = Some(visuals.spawn(VisualKind::Projectile, position));
        self.destroyed.prime(record.destroyed);
    }

    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        if ctx.authority.is_proxy() {
            return Ok(());
        }
        let current = *self.data.get();
        let step = advance_record(
            &current,
            ctx.tick,
            &ctx.tuning.resolve_params(),
            &*ctx.world,
            &ctx.shot_filter(),
        );
        if step.outcome == StepOutcome::Expired {
            ctx.commands.despawn(ctx.object);
            return Ok(());
        }
        if step.record != current {
            self.data.set(&ctx.authority, "fire_data", step.record)?;
        }
        if let Some(impulse) = step.impulse {
            apply_gated(ctx.world, impulse, ImpulseGate::for_authority(&ctx.authority));
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let Some(visual) = self.visual else {
            return;
        };
        let record = *self.data.get();
        if self.destroyed.changed(&record.destroyed) && record.destroyed {
            if let Some(point) = record.hit_position {
                ctx.visuals.set_position(visual, point);
            }
            ctx.visuals.show_hit(visual);
        }
        if record.destroyed {
            return;
        }
        let position = record.position_at(ctx.render_tick(), ctx.tuning.delta_time());
        ctx.visuals.set_position(visual, position);
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        encode(
            "fire data",
            &Wire {
                data: *self.data.get(),
            },
        )
    }

    fn read_state(&mut self, bytes: &[u8], _tick: Tick) -> Result<(), NetcodeError> {
        let wire: Wire = decode("fire data", bytes)?;
        self.data.overwrite(wire.data);
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

#[cfg(test)]
mod tests {
    use volley_physics::{HitboxWorld, QueryTime, Shape};

    use super::*;
    use crate::behaviour::{Commands, ObjectKey, SimStage};
    use crate::clock::RenderTime;
    use crate::replicated::PeerId;
    use crate::replication::NetworkId;

    fn wall_world() -> (HitboxWorld, volley_physics::BodyId) {
        let mut world = HitboxWorld::default();
        let (_, body) = world.add_dynamic(
            Shape::Cuboid {
                half_extents: Vec3::new(5.0, 5.0, 0.5),
            },
            Vec3::new(0.0, 0.0, 10.75),
            1,
            1.0,
        );
        world.step(1.0 / 60.0);
        (world, body)
    }

    fn run(
        projectile: &mut FireDataProjectile,
        authority: ObjectAuthority,
        world: &mut HitboxWorld,
        commands: &mut Commands,
        tuning: &Tuning,
        ticks: std::ops::RangeInclusive<Tick>,
    ) {
        for tick in ticks {
            let mut ctx = SimContext {
                tick,
                stage: SimStage::Forward,
                tuning,
                object: ObjectKey::Networked(NetworkId(3)),
                authority,
                input: None,
                perspective: QueryTime::Present,
                world: &mut *world,
                commands: &mut *commands,
            };
            projectile.fixed_update(&mut ctx).unwrap();
        }
    }

    #[test]
    fn test_hit_and_linger_despawn() {
        let tuning = Tuning::default();
        let (mut world, _) = wall_world();
        let mut commands = Commands::default();
        let mut projectile = FireDataProjectile::fire(100, Vec3::ZERO, Vec3::Z, &tuning);

        // 50 m/s reaches the face at z = 10.25 during tick 113.
        run(
            &mut projectile,
            ObjectAuthority::server(Some(PeerId(1))),
            &mut world,
            &mut commands,
            &tuning,
            101..=113,
        );
        let record = *projectile.record();
        assert!(record.destroyed);
        assert!((record.hit_position.unwrap().z - 10.25).abs() < 1e-3);
        assert_eq!(record.life.expiry_tick(), Some(233));
        assert_eq!(world.impulses().len(), 1);
        assert!(commands.is_empty());

        run(
            &mut projectile,
            ObjectAuthority::server(Some(PeerId(1))),
            &mut world,
            &mut commands,
            &tuning,
            114..=233,
        );
        assert_eq!(commands.despawns(), &[ObjectKey::Networked(NetworkId(3))]);
    }

    #[test]
    fn test_predicted_hit_skips_impulse() {
        let tuning = Tuning::default();
        let (mut world, _) = wall_world();
        let mut commands = Commands::default();
        let mut projectile = FireDataProjectile::fire(100, Vec3::ZERO, Vec3::Z, &tuning);
        run(
            &mut projectile,
            ObjectAuthority::predicted(PeerId(1)),
            &mut world,
            &mut commands,
            &tuning,
            101..=113,
        );
        assert!(projectile.record().destroyed);
        assert!(world.impulses().is_empty());
    }

    #[test]
    fn test_proxy_does_not_advance() {
        let tuning = Tuning::default();
        let (mut world, _) = wall_world();
        let mut commands = Commands::default();
        let mut projectile = FireDataProjectile::fire(100, Vec3::ZERO, Vec3::Z, &tuning);
        run(
            &mut projectile,
            ObjectAuthority::client(PeerId(2), Some(PeerId(1))),
            &mut world,
            &mut commands,
            &tuning,
            101..=120,
        );
        assert!(!projectile.record().destroyed);
    }

    #[test]
    fn test_render_shows_hit_once() {
        let tuning = Tuning::default();
        let mut visuals = VisualLayer::new();
        let authority = ObjectAuthority::client(PeerId(2), Some(PeerId(1)));
        let mut projectile = FireDataProjectile::fire(100, Vec3::ZERO, Vec3::Z, &tuning);
        projectile.spawned(&authority, &mut visuals);

        let mut hit = *projectile.record();
        hit.record_hit(Vec3::new(0.0, 0.0, 10.0), TickTimer::from_ticks(112, 120));
        let bytes = encode("fire data", &Wire { data: hit }).unwrap();
        projectile.read_state(&bytes, 112).unwrap();

        for _ in 0..3 {
            let mut ctx = RenderContext {
                time: RenderTime::uniform(111.5),
                frame_dt: 1.0 / 144.0,
                tuning: &tuning,
                authority,
                visuals: &mut visuals,
            };
            projectile.render(&mut ctx);
        }
        assert_eq!(visuals.hit_effects(), 1);
        assert_eq!(visuals.count_kind(VisualKind::Projectile), 1);
    }

    #[test]
    fn test_render_replays_position() {
        let tuning = Tuning::default();
        let mut visuals = VisualLayer::new();
        let authority = ObjectAuthority::client(PeerId(2), Some(PeerId(1)));
        let mut projectile = FireDataProjectile::fire(0, Vec3::ZERO, Vec3::Z, &tuning);
        projectile.spawned(&authority, &mut visuals);

        let mut ctx = RenderContext {
            time: RenderTime::uniform(30.0),
            frame_dt: 1.0 / 60.0,
            tuning: &tuning,
            authority,
            visuals: &mut visuals,
        };
        projectile.render(&mut ctx);
        let visual = projectile.visual.unwrap();
        assert!((visuals.get(visual).unwrap().position.z - 25.0).abs() < 1e-3);

        projectile.despawned(&mut visuals);
        assert!(visuals.is_empty());
    }
}
