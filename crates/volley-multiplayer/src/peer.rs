//! State shared by the authority and client peers: the object store, the
//! collision world posed from the scene, and peer-local visuals.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};
use volley_physics::{BodyId, ColliderId, HitboxWorld, QueryTime};

use crate::behaviour::{
    Commands, Launch, NetworkBehaviour, ObjectKey, ObjectKind, RenderContext, SimContext,
    SimStage, Tuning,
};
use crate::clock::{RenderTime, Tick};
use crate::input::PlayerInput;
use crate::prediction::PredictionKey;
use crate::replicated::{ObjectAuthority, PeerId};
use crate::replication::NetworkId;
use crate::scene::{Scene, SceneHitbox};
use crate::visuals::VisualLayer;
use crate::weapon::WeaponController;

/// One replicated object as held by a peer.
#[derive(Debug)]
pub struct NetObject {
    /// Its behaviour.
    pub behaviour: Box<dyn NetworkBehaviour>,
    /// Local roles.
    pub authority: ObjectAuthority,
    /// Key it was spawned under, if predicted.
    pub prediction_key: Option<PredictionKey>,
    /// Latest authoritative state bytes (clients only).
    pub confirmed: Option<Vec<u8>>,
}

/// Counters a peer keeps about its own netcode activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    /// Speculative spawns created.
    pub predictions_spawned: u64,
    /// Speculative spawns merged with their authoritative twin.
    pub predictions_merged: u64,
    /// Speculative spawns discarded.
    pub predictions_rejected: u64,
    /// Ticks replayed after rollbacks.
    pub resimulated_ticks: u64,
    /// Behaviour hooks that returned an error.
    pub behaviour_errors: u64,
    /// Snapshots ignored because a newer one was already applied.
    pub stale_snapshots: u64,
}

/// The parts of a peer that do not depend on its role.
#[derive(Debug)]
pub struct PeerCore {
    pub(crate) local: PeerId,
    pub(crate) tuning: Tuning,
    pub(crate) objects: BTreeMap<ObjectKey, NetObject>,
    pub(crate) world: HitboxWorld,
    pub(crate) hitboxes: Vec<(ColliderId, SceneHitbox)>,
    pub(crate) props: Vec<BodyId>,
    pub(crate) visuals: VisualLayer,
    pub(crate) stats: PeerStats,
}

impl PeerCore {
    /// Builds the core for `local` from `scene`.
    pub fn new(local: PeerId, tuning: Tuning, scene: &Scene, history_ticks: usize) -> Self {
        let built = scene.build(history_ticks, tuning.delta_time());
        Self {
            local,
            tuning,
            objects: BTreeMap::new(),
            world: built.world,
            hitboxes: built.hitboxes,
            props: built.props,
            visuals: VisualLayer::new(),
            stats: PeerStats::default(),
        }
    }

    /// Moves every scene hitbox to where it is at `tick`.
    pub fn pose_scene(&mut self, tick: f64) {
        let delta_time = self.tuning.delta_time();
        for (id, hitbox) in &self.hitboxes {
            self.world.set_center(*id, hitbox.center_at(tick, delta_time));
        }
    }

    /// Steps the collision world by one tick and drops the impulse log the
    /// tick produced.
    pub fn step_world(&mut self) {
        self.world.step(self.tuning.delta_time());
        let applied = self.world.drain_impulses();
        if !applied.is_empty() {
            trace!(peer = %self.local, count = applied.len(), "impulses applied");
        }
    }

    /// Runs `fixed_update` for every selected object in key order and returns
    /// the commands they queued.
    pub fn simulate(
        &mut self,
        tick: Tick,
        stage: SimStage,
        select: impl Fn(&ObjectKey, &NetObject) -> bool,
        input_for: impl Fn(&ObjectAuthority) -> Option<PlayerInput>,
        perspective_for: impl Fn(&ObjectAuthority) -> QueryTime,
    ) -> Commands {
        let mut commands = Commands::default();
        let Self {
            tuning,
            objects,
            world,
            stats,
            ..
        } = self;

        for (key, object) in objects.iter_mut() {
            if !select(key, object) {
                continue;
            }
            let mut ctx = SimContext {
                tick,
                stage,
                tuning: &*tuning,
                object: *key,
                authority: object.authority,
                input: input_for(&object.authority),
                perspective: perspective_for(&object.authority),
                world: &mut *world,
                commands: &mut commands,
            };
            if let Err(err) = object.behaviour.fixed_update(&mut ctx) {
                stats.behaviour_errors += 1;
                warn!(tick, object = ?key, %err, "fixed update failed");
            }
        }
        commands
    }

    /// Fires pooled objects queued during a tick.
    pub fn apply_launches(&mut self, tick: Tick, launches: Vec<Launch>) {
        for launch in launches {
            let Some(object) = self.objects.get_mut(&launch.target) else {
                debug!(peer = %self.local, tick, target = ?launch.target, "launch target missing");
                continue;
            };
            if let Err(err) = object
                .behaviour
                .launch(&launch, &object.authority, &self.tuning)
            {
                self.stats.behaviour_errors += 1;
                warn!(tick, target = ?launch.target, %err, "launch failed");
            }
        }
    }

    /// Lets networked objects re-pose the bodies they mirror after state was
    /// restored to `confirmed`.
    pub fn sync_world(&mut self, confirmed: Tick, now: Tick) {
        let Self {
            tuning,
            objects,
            world,
            ..
        } = self;
        for (key, object) in objects.iter_mut() {
            if matches!(key, ObjectKey::Networked(_)) {
                object.behaviour.sync_world(confirmed, now, tuning, &mut *world);
            }
        }
    }

    /// Renders every object, then advances self-propelled visuals.
    pub fn render(&mut self, time: RenderTime, frame_dt: f32) {
        let Self {
            tuning,
            objects,
            visuals,
            ..
        } = self;
        visuals.swap();
        for object in objects.values_mut() {
            let mut ctx = RenderContext {
                time,
                frame_dt,
                tuning: &*tuning,
                authority: object.authority,
                visuals: &mut *visuals,
            };
            object.behaviour.render(&mut ctx);
        }
        visuals.update(frame_dt);
    }

    /// Inserts an object and runs its `spawned` hook.
    pub fn insert(&mut self, key: ObjectKey, mut object: NetObject) {
        object
            .behaviour
            .spawned(&object.authority, &mut self.visuals);
        debug!(peer = %self.local, object = ?key, kind = ?object.behaviour.kind(), "object spawned");
        self.objects.insert(key, object);
    }

    /// Removes an object and runs its `despawned` hook.
    pub fn despawn(&mut self, key: ObjectKey) -> bool {
        match self.objects.remove(&key) {
            Some(mut object) => {
                object.behaviour.despawned(&mut self.visuals);
                debug!(peer = %self.local, object = ?key, "object despawned");
                true
            }
            None => false,
        }
    }

    /// Looks up an object.
    pub fn object(&self, key: ObjectKey) -> Option<&NetObject> {
        self.objects.get(&key)
    }

    /// Every object in key order.
    pub fn objects(&self) -> impl Iterator<Item = (&ObjectKey, &NetObject)> {
        self.objects.iter()
    }

    /// Number of objects of `kind`.
    pub fn count_kind(&self, kind: ObjectKind) -> usize {
        self.objects
            .values()
            .filter(|o| o.behaviour.kind() == kind)
            .count()
    }

    /// A networked weapon.
    pub fn weapon(&self, id: NetworkId) -> Option<&WeaponController> {
        self.objects
            .get(&ObjectKey::Networked(id))?
            .behaviour
            .as_any()
            .downcast_ref::<WeaponController>()
    }

    /// This peer's id.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Shared tuning.
    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Collision world.
    pub fn world(&self) -> &HitboxWorld {
        &self.world
    }

    /// Bodies of the scene's pushable props.
    pub fn props(&self) -> &[BodyId] {
        &self.props
    }

    /// Peer-local visuals.
    pub fn visuals(&self) -> &VisualLayer {
        &self.visuals
    }

    /// Netcode counters.
    pub fn stats(&self) -> PeerStats {
        self.stats
    }
}
