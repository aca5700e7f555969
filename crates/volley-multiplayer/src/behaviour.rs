//! Lifecycle interface for replicated objects.
//!
//! A host peer drives every object through the same small set of hooks:
//! [`spawned`](NetworkBehaviour::spawned) once when it appears locally,
//! [`fixed_update`](NetworkBehaviour::fixed_update) once per simulated (or
//! resimulated) tick, [`render`](NetworkBehaviour::render) once per frame and
//! [`despawned`](NetworkBehaviour::despawned) when it goes away. Pooled
//! projectiles additionally receive [`launch`](NetworkBehaviour::launch), and
//! objects mirroring a physics body re-pose it through
//! [`sync_world`](NetworkBehaviour::sync_world) after a rollback.

use std::any::Any;
use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use volley_config::WeaponConfig;
use volley_physics::QueryTime;

use crate::clock::{RenderTime, Tick};
use crate::error::NetcodeError;
use crate::input::PlayerInput;
use crate::lag_compensation::{LagCompensation, ResolveParams, ShotFilter};
use crate::prediction::PredictionKey;
use crate::replicated::{ObjectAuthority, PeerId};
use crate::replication::NetworkId;
use crate::props::PropBody;
use crate::strategies::{FireDataProjectile, PhysicsProjectile};
use crate::visuals::VisualLayer;
use crate::weapon::WeaponController;

/// Replication strategy of a weapon.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// One networked physics object per shot with its full pose synced.
    FullState,
    /// One networked object per shot carrying only its fire record.
    FireData,
    /// Hitscan; only a fire counter and the last target are synced.
    CountOnly,
    /// Hitscan kinematic projectiles in a fixed-capacity ring of records.
    RingBuffer,
}

impl StrategyKind {
    /// Every strategy, in presentation order.
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::FullState,
        StrategyKind::FireData,
        StrategyKind::CountOnly,
        StrategyKind::RingBuffer,
    ];

    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::FullState => "full-state",
            StrategyKind::FireData => "fire-data",
            StrategyKind::CountOnly => "count-only",
            StrategyKind::RingBuffer => "ring-buffer",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which behaviour a replicated object runs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A weapon using the given strategy.
    Weapon(StrategyKind),
    /// Projectile of the full-state strategy.
    PhysicsProjectile,
    /// Projectile of the fire-data strategy.
    FireDataProjectile,
    /// A scene prop whose body the authority simulates.
    Prop,
}

impl ObjectKind {
    /// Creates a blank behaviour of this kind, ready for
    /// [`NetworkBehaviour::read_state`].
    pub fn instantiate(self, tuning: &Tuning) -> Box<dyn NetworkBehaviour> {
        match self {
            ObjectKind::Weapon(strategy) => {
                Box::new(WeaponController::new(strategy, Vec3::ZERO, tuning))
            }
            ObjectKind::PhysicsProjectile => Box::new(PhysicsProjectile::blank()),
            ObjectKind::FireDataProjectile => Box::new(FireDataProjectile::blank()),
            ObjectKind::Prop => Box::new(PropBody::blank()),
        }
    }
}

/// Key of an object inside one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKey {
    /// Confirmed by the authority.
    Networked(NetworkId),
    /// Speculative spawn awaiting confirmation.
    Predicted(PredictionKey),
}

/// Settings every behaviour reads through its context.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    /// Weapon and projectile tuning.
    pub weapon: WeaponConfig,
    /// Simulation ticks per second.
    pub tick_rate: u32,
}

impl Tuning {
    /// Bundles weapon tuning with the tick rate.
    pub fn new(weapon: WeaponConfig, tick_rate: u32) -> Self {
        Self {
            weapon,
            tick_rate: tick_rate.max(1),
        }
    }

    /// Seconds per tick.
    pub fn delta_time(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Hit resolution parameters.
    pub fn resolve_params(&self) -> ResolveParams {
        ResolveParams {
            delta_time: self.delta_time(),
            tick_rate: self.tick_rate,
            linger_secs: self.weapon.lifetime_after_hit_secs,
            hit_impulse: self.weapon.hit_impulse,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::new(WeaponConfig::default(), crate::clock::DEFAULT_TICK_RATE)
    }
}

/// Whether a tick runs for the first time or is being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStage {
    /// First execution of the tick.
    Forward,
    /// Replay after a rollback to confirmed state.
    Resimulation,
}

/// A spawn requested by a behaviour.
#[derive(Debug)]
pub struct SpawnRequest {
    /// The initialised behaviour.
    pub behaviour: Box<dyn NetworkBehaviour>,
    /// Peer whose input drives it.
    pub input_authority: Option<PeerId>,
    /// Key for a predicted spawn.
    pub prediction_key: Option<PredictionKey>,
    /// Pool slot the new object's id is handed back to.
    pub pool_slot: Option<PoolSlot>,
}

/// A slot in some object's pool of pre-spawned objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSlot {
    /// Object owning the pool.
    pub owner: ObjectKey,
    /// Slot index.
    pub slot: usize,
}

/// Fires a pre-spawned object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Launch {
    /// Object to fire.
    pub target: ObjectKey,
    /// Tick of the fire event.
    pub tick: Tick,
    /// Launch position.
    pub origin: Vec3,
    /// Launch direction.
    pub direction: Vec3,
}

/// Spawns, launches and despawns queued during a tick and applied by the
/// host after every object has run.
#[derive(Debug, Default)]
pub struct Commands {
    pub(crate) spawns: Vec<SpawnRequest>,
    pub(crate) launches: Vec<Launch>,
    pub(crate) despawns: Vec<ObjectKey>,
}

impl Commands {
    /// Queues a spawn.
    pub fn spawn(&mut self, request: SpawnRequest) {
        self.spawns.push(request);
    }

    /// Queues a launch of a pooled object.
    pub fn launch(&mut self, launch: Launch) {
        self.launches.push(launch);
    }

    /// Queues a despawn.
    pub fn despawn(&mut self, key: ObjectKey) {
        if !self.despawns.contains(&key) {
            self.despawns.push(key);
        }
    }

    /// Queued spawns.
    pub fn spawns(&self) -> &[SpawnRequest] {
        &self.spawns
    }

    /// Queued launches.
    pub fn launches(&self) -> &[Launch] {
        &self.launches
    }

    /// Queued despawns.
    pub fn despawns(&self) -> &[ObjectKey] {
        &self.despawns
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.launches.is_empty() && self.despawns.is_empty()
    }
}

/// Everything a behaviour sees during one simulated tick.
pub struct SimContext<'a> {
    /// The tick being simulated.
    pub tick: Tick,
    /// Forward or resimulated.
    pub stage: SimStage,
    /// Shared tuning.
    pub tuning: &'a Tuning,
    /// The object being simulated.
    pub object: ObjectKey,
    /// Local roles for the object.
    pub authority: ObjectAuthority,
    /// Input of the object's input authority for this tick.
    pub input: Option<PlayerInput>,
    /// The world snapshot hits are resolved against.
    pub perspective: QueryTime,
    /// Physics collaborator.
    pub world: &'a mut dyn LagCompensation,
    /// Spawn/despawn queue.
    pub commands: &'a mut Commands,
}

impl SimContext<'_> {
    /// Filter for shots fired by this object.
    pub fn shot_filter(&self) -> ShotFilter {
        ShotFilter {
            shooter: self.authority.input_authority,
            time: self.perspective,
            layer_mask: self.tuning.weapon.hit_mask,
        }
    }
}

/// Everything a behaviour sees during one rendered frame.
pub struct RenderContext<'a> {
    /// Render time frames.
    pub time: RenderTime,
    /// Seconds since the previous frame.
    pub frame_dt: f32,
    /// Shared tuning.
    pub tuning: &'a Tuning,
    /// Local roles for the object.
    pub authority: ObjectAuthority,
    /// Peer-local visuals.
    pub visuals: &'a mut VisualLayer,
}

impl RenderContext<'_> {
    /// The frame this object is drawn in: remote for proxies, local
    /// otherwise.
    pub fn render_tick(&self) -> f64 {
        self.time.for_proxy(self.authority.is_proxy())
    }
}

/// A replicated object's behaviour.
pub trait NetworkBehaviour: fmt::Debug {
    /// Kind used to instantiate the object on other peers.
    fn kind(&self) -> ObjectKind;

    /// The object appeared on this peer (first spawn, late join or predicted
    /// spawn).
    fn spawned(&mut self, _authority: &ObjectAuthority, _visuals: &mut VisualLayer) {}

    /// Advances one tick.
    fn fixed_update(&mut self, ctx: &mut SimContext<'_>) -> Result<(), NetcodeError>;

    /// Updates visuals. Must not mutate replicated state and must be safe to
    /// call several times per tick.
    fn render(&mut self, _ctx: &mut RenderContext<'_>) {}

    /// A pooled object is fired.
    fn launch(
        &mut self,
        _launch: &Launch,
        _authority: &ObjectAuthority,
        _tuning: &Tuning,
    ) -> Result<(), NetcodeError> {
        Ok(())
    }

    /// The authority spawned `id` into pool slot `slot` of this object.
    fn attach_pooled(&mut self, _slot: usize, _id: NetworkId) {}

    /// State was restored to `confirmed` while the peer stands at `now`;
    /// re-pose any world body this object mirrors.
    fn sync_world(
        &mut self,
        _confirmed: Tick,
        _now: Tick,
        _tuning: &Tuning,
        _world: &mut dyn LagCompensation,
    ) {
    }

    /// Encodes the replicated state.
    fn write_state(&self) -> Result<Vec<u8>, NetcodeError>;

    /// Applies replicated state confirmed for `tick`.
    fn read_state(&mut self, bytes: &[u8], tick: Tick) -> Result<(), NetcodeError>;

    /// The object is leaving this peer.
    fn despawned(&mut self, _visuals: &mut VisualLayer) {}

    /// Downcasting support for hosts and tests.
    fn as_any(&self) -> &dyn Any;
}
