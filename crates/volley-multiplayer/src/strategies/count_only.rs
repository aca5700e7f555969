//! Count-only replication: hitscan weapons sync just the fire counter and
//! the outcome of the newest shot. Observers fake a projectile per render
//! batch with a self-propelled dummy.

use std::any::Any;
use std::ops::Range;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{FireStrategy, Shot};
use crate::behaviour::{RenderContext, SimContext, StrategyKind};
use crate::error::NetcodeError;
use crate::lag_compensation::{ImpulseGate, PendingImpulse, apply_gated, cast_hitscan};
use crate::replicated::Replicated;
use crate::replication::{decode, encode};

/// Outcome of the newest shot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LastShot {
    /// Where the shot ended: the hit point, or the end of its range.
    pub target: Vec3,
    /// Whether it hit something.
    pub hit: bool,
}

/// Instant hitscan; only [`LastShot`] is replicated besides the counter.
///
/// When several fire events land in one render batch only one dummy is
/// shown, aimed at the newest target.
#[derive(Debug, Clone, Default)]
pub struct CountOnlyStrategy {
    last_shot: Replicated<LastShot>,
}

impl CountOnlyStrategy {
    /// Outcome of the newest shot.
    pub fn last_shot(&self) -> &LastShot {
        self.last_shot.get()
    }
}

impl FireStrategy for CountOnlyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CountOnly
    }

    fn fire(&mut self, shot: &Shot, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        let range = ctx.tuning.weapon.hitscan_range;
        let filter = ctx.shot_filter();
        let outcome = match cast_hitscan(&*ctx.world, shot.origin, shot.direction, range, &filter) {
            Some(hit) => {
                if let Some(impulse) = PendingImpulse::from_hit(&hit, ctx.tuning.weapon.hit_impulse)
                {
                    apply_gated(ctx.world, impulse, ImpulseGate::for_authority(&ctx.authority));
                }
                LastShot {
                    target: hit.point,
                    hit: true,
                }
            }
            None => LastShot {
                target: shot.origin + shot.direction * range,
                hit: false,
            },
        };
        self.last_shot.set(&ctx.authority, "last_shot", outcome)
    }

    fn render(&mut self, fresh: Range<u32>, muzzle: Vec3, ctx: &mut RenderContext<'_>) {
        if fresh.is_empty() {
            return;
        }
        let shot = *self.last_shot.get();
        ctx.visuals
            .spawn_flying(muzzle, shot.target, ctx.tuning.weapon.dummy_speed, shot.hit);
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        encode("last shot", self.last_shot.get())
    }

    fn read_state(&mut self, bytes: &[u8]) -> Result<(), NetcodeError> {
        self.last_shot.overwrite(decode("last shot", bytes)?);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use volley_physics::{HitboxWorld, QueryTime, Shape};

    use super::*;
    use crate::behaviour::{Commands, ObjectKey, SimStage, Tuning};
    use crate::clock::RenderTime;
    use crate::replicated::{ObjectAuthority, PeerId};
    use crate::replication::NetworkId;
    use crate::visuals::{VisualKind, VisualLayer};

    fn fire(
        strategy: &mut CountOnlyStrategy,
        world: &mut HitboxWorld,
        authority: ObjectAuthority,
        direction: Vec3,
    ) {
        let tuning = Tuning::default();
        let mut commands = Commands::default();
        let mut ctx = SimContext {
            tick: 10,
            stage: SimStage::Forward,
            tuning: &tuning,
            object: ObjectKey::Networked(NetworkId(1)),
            authority,
            input: None,
            perspective: QueryTime::Present,
            world,
            commands: &mut commands,
        };
        let shot = Shot {
            index: 0,
            origin: Vec3::ZERO,
            direction,
        };
        strategy.fire(&shot, &mut ctx).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_hit_records_point_and_pushes() {
        let mut world = HitboxWorld::default();
        world.add_dynamic(
            Shape::Sphere { radius: 1.0 },
            Vec3::new(0.0, 0.0, 20.0),
            1,
            2.0,
        );
        world.step(1.0 / 60.0);
        let mut strategy = CountOnlyStrategy::default();
        fire(
            &mut strategy,
            &mut world,
            ObjectAuthority::server(Some(PeerId(1))),
            Vec3::Z,
        );
        let shot = *strategy.last_shot();
        assert!(shot.hit);
        assert!((shot.target.z - 19.0).abs() < 1e-3);
        assert_eq!(world.impulses().len(), 1);
        assert!((world.impulses()[0].impulse.z - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_miss_targets_end_of_range() {
        let mut world = HitboxWorld::default();
        let mut strategy = CountOnlyStrategy::default();
        fire(
            &mut strategy,
            &mut world,
            ObjectAuthority::server(Some(PeerId(1))),
            Vec3::X,
        );
        let shot = *strategy.last_shot();
        assert!(!shot.hit);
        assert_eq!(shot.target, Vec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_input_holder_does_not_push() {
        let mut world = HitboxWorld::default();
        world.add_dynamic(
            Shape::Sphere { radius: 1.0 },
            Vec3::new(0.0, 0.0, 20.0),
            1,
            2.0,
        );
        world.step(1.0 / 60.0);
        let mut strategy = CountOnlyStrategy::default();
        fire(
            &mut strategy,
            &mut world,
            ObjectAuthority::client(PeerId(1), Some(PeerId(1))),
            Vec3::Z,
        );
        assert!(strategy.last_shot().hit);
        assert!(world.impulses().is_empty());
    }

    #[test]
    fn test_one_dummy_per_batch() {
        let tuning = Tuning::default();
        let mut visuals = VisualLayer::new();
        let mut strategy = CountOnlyStrategy::default();
        let mut ctx = RenderContext {
            time: RenderTime::uniform(10.0),
            frame_dt: 1.0 / 60.0,
            tuning: &tuning,
            authority: ObjectAuthority::client(PeerId(2), Some(PeerId(1))),
            visuals: &mut visuals,
        };
        strategy.render(3..7, Vec3::ZERO, &mut ctx);
        strategy.render(7..7, Vec3::ZERO, &mut ctx);
        assert_eq!(visuals.spawned_of(VisualKind::FlyingDummy), 1);
    }
}
