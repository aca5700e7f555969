//! Weapon controller shared by every replication strategy.
//!
//! The controller turns a held fire button into edge-triggered fire events,
//! owns the replicated fire counter and aim, and plays the muzzle effect for
//! fire events this peer has not shown yet. What a shot actually produces is
//! delegated to a [`FireStrategy`].

use std::any::Any;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behaviour::{
    NetworkBehaviour, ObjectKind, RenderContext, SimContext, StrategyKind, Tuning,
};
use crate::clock::Tick;
use crate::error::NetcodeError;
use crate::replicated::{FireCountWatcher, ObjectAuthority, Replicated};
use crate::replication::{NetworkId, decode, encode};
use crate::strategies::{FireStrategy, Shot, strategy_for};
use crate::visuals::VisualLayer;

#[derive(Serialize, Deserialize)]
struct WeaponState {
    fire_count: u32,
    last_fire: bool,
    muzzle: Vec3,
    aim: Vec3,
    strategy: Vec<u8>,
}

/// A weapon driven by its input authority's fire button.
#[derive(Debug)]
pub struct WeaponController {
    fire_count: Replicated<u32>,
    last_fire: Replicated<bool>,
    aim: Replicated<Vec3>,
    muzzle: Vec3,
    watcher: FireCountWatcher,
    strategy: Box<dyn FireStrategy>,
}

impl WeaponController {
    /// A weapon at `muzzle`, aiming along +Z.
    pub fn new(kind: StrategyKind, muzzle: Vec3, tuning: &Tuning) -> Self {
        Self {
            fire_count: Replicated::new(0),
            last_fire: Replicated::new(false),
            aim: Replicated::new(Vec3::Z),
            muzzle,
            watcher: FireCountWatcher::default(),
            strategy: strategy_for(kind, tuning),
        }
    }

    /// Total fire events.
    pub fn fire_count(&self) -> u32 {
        *self.fire_count.get()
    }

    /// Fire events this peer has presented.
    pub fn visible_fire_count(&self) -> u32 {
        self.watcher.visible()
    }

    /// Muzzle position.
    pub fn muzzle(&self) -> Vec3 {
        self.muzzle
    }

    /// Current aim direction.
    pub fn aim(&self) -> Vec3 {
        *self.aim.get()
    }

    /// Strategy kind.
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// The strategy, for inspection.
    pub fn strategy(&self) -> &dyn FireStrategy {
        self.strategy.as_ref()
    }

    /// Fires once: hands the shot to the strategy, then advances the
    /// counter. The only place the counter changes.
    pub fn fire(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        let shot = Shot {
            index: *self.fire_count.get(),
            origin: self.muzzle,
            direction: *self.aim.get(),
        };
        self.strategy.fire(&shot, ctx)?;
        self.fire_count
            .modify(&ctx.authority, "fire_count", |count| *count += 1)?;
        debug!(
            tick = ctx.tick,
            object = ?ctx.object,
            strategy = %self.strategy.kind(),
            fire_index = shot.index,
            stage = ?ctx.stage,
            "weapon fired"
        );
        Ok(())
    }
}

impl NetworkBehaviour for WeaponController {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Weapon(self.strategy.kind())
    }

    fn spawned(&mut self, _authority: &ObjectAuthority, _visuals: &mut VisualLayer) {
        // Fires from before this peer saw the weapon are never replayed.
        self.watcher.prime(*self.fire_count.get());
    }

    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError> {
        if ctx.authority.is_proxy() {
            return Ok(());
        }
        let input = ctx.input.unwrap_or_default();

        if let Some(aim) = input.aim.try_normalize()
            && aim != *self.aim.get()
        {
            self.aim.set(&ctx.authority, "aim", aim)?;
        }

        let pressed = input.fire && !*self.last_fire.get();
        if input.fire != *self.last_fire.get() {
            self.last_fire.set(&ctx.authority, "last_fire", input.fire)?;
        }
        if pressed {
            self.fire(ctx)?;
        }
        self.strategy.fixed_update(ctx)
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let fresh = self.watcher.observe(*self.fire_count.get());
        if let Some(newest) = fresh.clone().last() {
            ctx.visuals.fire_effect(newest);
        }
        self.strategy.render(fresh, self.muzzle, ctx);
    }

    fn attach_pooled(&mut self, slot: usize, id: NetworkId) {
        self.strategy.attach_pooled(slot, id);
    }

    fn write_state(&self) -> Result<Vec<u8>, NetcodeError> {
        encode(
            "weapon",
            &WeaponState {
                fire_count: *self.fire_count.get(),
                last_fire: *self.last_fire.get(),
                muzzle: self.muzzle,
                aim: *self.aim.get(),
                strategy: self.strategy.write_state()?,
            },
        )
    }

    fn read_state(&mut self, bytes: &[u8], _tick: Tick) -> Result<(), NetcodeError> {
        let state: WeaponState = decode("weapon", bytes)?;
        self.strategy.read_state(&state.strategy)?;
        self.fire_count.overwrite(state.fire_count);
        self.last_fire.overwrite(state.last_fire);
        self.aim.overwrite(state.aim);
        self.muzzle = state.muzzle;
        Ok(())
    }

    fn despawned(&mut self, visuals: &mut VisualLayer) {
        self.strategy.despawned(visuals);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use volley_physics::{HitboxWorld, QueryTime};

    use super::*;
    use crate::behaviour::{Commands, ObjectKey, SimStage};
    use crate::clock::RenderTime;
    use crate::input::PlayerInput;
    use crate::replicated::PeerId;
    use crate::replication::NetworkId;

    fn tick(
        weapon: &mut WeaponController,
        authority: ObjectAuthority,
        tick: Tick,
        input: PlayerInput,
        commands: &mut Commands,
    ) -> Result<(), NetcodeError> {
        let tuning = Tuning::default();
        let mut world = HitboxWorld::default();
        let mut ctx = SimContext {
            tick,
            stage: SimStage::Forward,
            tuning: &tuning,
            object: ObjectKey::Networked(NetworkId(1)),
            authority,
            input: Some(input),
            perspective: QueryTime::Present,
            world: &mut world,
            commands,
        };
        weapon.fixed_update(&mut ctx)
    }

    #[test]
    fn test_fire_is_edge_triggered() {
        let tuning = Tuning::default();
        let mut weapon = WeaponController::new(StrategyKind::CountOnly, Vec3::ZERO, &tuning);
        let authority = ObjectAuthority::server(Some(PeerId(1)));
        let mut commands = Commands::default();

        for t in 1..=5 {
            tick(&mut weapon, authority, t, PlayerInput::firing(Vec3::Z), &mut commands).unwrap();
        }
        assert_eq!(weapon.fire_count(), 1);

        tick(&mut weapon, authority, 6, PlayerInput::idle(Vec3::Z), &mut commands).unwrap();
        tick(&mut weapon, authority, 7, PlayerInput::firing(Vec3::Z), &mut commands).unwrap();
        assert_eq!(weapon.fire_count(), 2);
    }

    #[test]
    fn test_proxy_ignores_input() {
        let tuning = Tuning::default();
        let mut weapon = WeaponController::new(StrategyKind::CountOnly, Vec3::ZERO, &tuning);
        let mut commands = Commands::default();
        tick(
            &mut weapon,
            ObjectAuthority::client(PeerId(2), Some(PeerId(1))),
            1,
            PlayerInput::firing(Vec3::X),
            &mut commands,
        )
        .unwrap();
        assert_eq!(weapon.fire_count(), 0);
        assert_eq!(weapon.aim(), Vec3::Z);
    }

    #[test]
    fn test_full_state_fire_spawns_on_authority_only() {
        let tuning = Tuning::default();
        let mut server = WeaponController::new(StrategyKind::FullState, Vec3::ZERO, &tuning);
        let mut commands = Commands::default();
        tick(
            &mut server,
            ObjectAuthority::server(Some(PeerId(1))),
            1,
            PlayerInput::firing(Vec3::Z),
            &mut commands,
        )
        .unwrap();
        assert_eq!(commands.spawns().len(), 1);
        assert_eq!(commands.spawns()[0].prediction_key, None);

        let mut client = WeaponController::new(StrategyKind::FullState, Vec3::ZERO, &tuning);
        let mut commands = Commands::default();
        tick(
            &mut client,
            ObjectAuthority::client(PeerId(1), Some(PeerId(1))),
            1,
            PlayerInput::firing(Vec3::Z),
            &mut commands,
        )
        .unwrap();
        assert_eq!(client.fire_count(), 1);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_fire_data_predicts_with_key() {
        let tuning = Tuning::default();
        let mut weapon = WeaponController::new(StrategyKind::FireData, Vec3::ZERO, &tuning);
        let mut commands = Commands::default();
        tick(
            &mut weapon,
            ObjectAuthority::client(PeerId(1), Some(PeerId(1))),
            300,
            PlayerInput::firing(Vec3::Z),
            &mut commands,
        )
        .unwrap();
        assert_eq!(commands.spawns().len(), 1);
        assert_eq!(
            commands.spawns()[0].prediction_key,
            Some(crate::prediction::PredictionKey::new(300, PeerId(1)))
        );
    }

    #[test]
    fn test_state_round_trip_through_read_state() {
        let tuning = Tuning::default();
        let mut source = WeaponController::new(StrategyKind::RingBuffer, Vec3::ONE, &tuning);
        let mut commands = Commands::default();
        tick(
            &mut source,
            ObjectAuthority::server(Some(PeerId(1))),
            1,
            PlayerInput::firing(Vec3::X),
            &mut commands,
        )
        .unwrap();

        let bytes = source.write_state().unwrap();
        let mut mirror = ObjectKind::Weapon(StrategyKind::RingBuffer).instantiate(&tuning);
        mirror.read_state(&bytes, 1).unwrap();
        let mirror = mirror.as_any().downcast_ref::<WeaponController>().unwrap();
        assert_eq!(mirror.fire_count(), 1);
        assert_eq!(mirror.muzzle(), Vec3::ONE);
        assert_eq!(mirror.aim(), Vec3::X);
        assert_eq!(mirror.write_state().unwrap(), bytes);
    }

    #[test]
    fn test_late_join_shows_only_new_fires() {
        let tuning = Tuning::default();
        let mut source = WeaponController::new(StrategyKind::CountOnly, Vec3::ZERO, &tuning);
        let authority = ObjectAuthority::server(Some(PeerId(1)));
        let mut commands = Commands::default();
        for t in 0..14u64 {
            let input = if t % 2 == 0 {
                PlayerInput::firing(Vec3::Z)
            } else {
                PlayerInput::idle(Vec3::Z)
            };
            tick(&mut source, authority, t, input, &mut commands).unwrap();
        }
        assert_eq!(source.fire_count(), 7);

        let observer = ObjectAuthority::client(PeerId(2), Some(PeerId(1)));
        let mut visuals = VisualLayer::new();
        let mut mirror = WeaponController::new(StrategyKind::CountOnly, Vec3::ZERO, &tuning);
        mirror.read_state(&source.write_state().unwrap(), 14).unwrap();
        mirror.spawned(&observer, &mut visuals);

        let render = |weapon: &mut WeaponController, visuals: &mut VisualLayer| {
            let mut ctx = RenderContext {
                time: RenderTime::uniform(14.0),
                frame_dt: 1.0 / 60.0,
                tuning: &tuning,
                authority: observer,
                visuals,
            };
            weapon.render(&mut ctx);
        };
        render(&mut mirror, &mut visuals);
        assert_eq!(visuals.fire_effects(), 0);

        tick(&mut source, authority, 14, PlayerInput::firing(Vec3::Z), &mut commands).unwrap();
        mirror.read_state(&source.write_state().unwrap(), 15).unwrap();
        render(&mut mirror, &mut visuals);
        render(&mut mirror, &mut visuals);
        assert_eq!(visuals.fire_effects(), 1);
    }
}
