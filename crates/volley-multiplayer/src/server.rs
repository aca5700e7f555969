//! The authoritative peer.
//!
//! Each tick the server consumes the inputs clients sent for that tick,
//! simulates every object, applies the spawns and despawns they queued and
//! replicates per-client diffs. Shots are resolved against hitboxes rewound
//! to the tick the shooter was looking at. Scene props are replicated as
//! [`PropBody`] objects so clients see the authority's impulses.

use std::collections::BTreeMap;

use glam::Vec3;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};
use volley_physics::QueryTime;

use crate::behaviour::{Commands, ObjectKey, SimStage, StrategyKind, Tuning};
use crate::clock::{RenderTime, Tick, TickClock};
use crate::input::{InputMessage, PlayerInput};
use crate::peer::{NetObject, PeerCore};
use crate::props::PropBody;
use crate::replicated::{ObjectAuthority, PeerId};
use crate::replication::{NetworkId, ReplicatedObject, ReplicationServer, Snapshot};
use crate::scene::Scene;
use crate::weapon::WeaponController;

/// Server-side peer: sole state authority for every object.
#[derive(Debug)]
pub struct ServerPeer {
    core: PeerCore,
    clock: TickClock,
    replication: ReplicationServer,
    inputs: FxHashMap<PeerId, BTreeMap<Tick, PlayerInput>>,
    views: FxHashMap<PeerId, f64>,
}

impl ServerPeer {
    /// Creates a server at tick 0.
    pub fn new(tuning: Tuning, scene: &Scene, history_ticks: usize) -> Self {
        let clock = TickClock::new(tuning.tick_rate);
        let mut server = Self {
            core: PeerCore::new(PeerId::SERVER, tuning, scene, history_ticks),
            clock,
            replication: ReplicationServer::new(),
            inputs: FxHashMap::default(),
            views: FxHashMap::default(),
        };
        server.spawn_props();
        server
    }

    fn spawn_props(&mut self) {
        for body in self.core.props.clone() {
            let Some(motion) = self.core.world.body_motion(body) else {
                continue;
            };
            let network_id = self.replication.allocate_network_id();
            self.core.insert(
                ObjectKey::Networked(network_id),
                NetObject {
                    behaviour: Box::new(PropBody::tracking(body, motion)),
                    authority: ObjectAuthority::server(None),
                    prediction_key: None,
                    confirmed: None,
                },
            );
        }
    }

    /// Latest simulated tick.
    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    /// Starts replicating to `client`. It receives full spawns next tick.
    pub fn add_client(&mut self, client: PeerId) {
        self.replication.add_client(client);
        debug!(%client, tick = self.tick(), "client added");
    }

    /// Stops replicating to `client` and forgets its inputs.
    pub fn remove_client(&mut self, client: PeerId) {
        self.replication.remove_client(client);
        self.inputs.remove(&client);
        self.views.remove(&client);
    }

    /// Spawns a weapon driven by `owner`.
    pub fn spawn_weapon(&mut self, owner: PeerId, strategy: StrategyKind, muzzle: Vec3) -> NetworkId {
        let network_id = self.replication.allocate_network_id();
        let behaviour = Box::new(WeaponController::new(strategy, muzzle, &self.core.tuning));
        self.core.insert(
            ObjectKey::Networked(network_id),
            NetObject {
                behaviour,
                authority: ObjectAuthority::server(Some(owner)),
                prediction_key: None,
                confirmed: None,
            },
        );
        network_id
    }

    /// Queues a client's input. Inputs for ticks already simulated are
    /// dropped.
    pub fn receive_input(&mut self, message: InputMessage) {
        if message.tick <= self.tick() {
            debug!(peer = %message.peer, tick = message.tick, now = self.tick(), "late input dropped");
            return;
        }
        self.inputs
            .entry(message.peer)
            .or_default()
            .insert(message.tick, message.input);
    }

    /// Runs one tick and returns the snapshot for every client.
    pub fn step(&mut self) -> Vec<(PeerId, Snapshot)> {
        let tick = self.clock.advance();
        self.core.pose_scene(tick as f64);
        self.core.world.record(tick);

        let mut inputs: FxHashMap<PeerId, PlayerInput> = FxHashMap::default();
        for (peer, queue) in &mut self.inputs {
            if let Some(input) = queue.remove(&tick) {
                inputs.insert(*peer, input);
                self.views.insert(*peer, input.view_tick);
            }
            queue.retain(|&t, _| t > tick);
        }

        let views = &self.views;
        let commands = self.core.simulate(
            tick,
            SimStage::Forward,
            |_, _| true,
            |authority| authority.input_authority.and_then(|peer| inputs.get(&peer).copied()),
            |authority| match authority.input_authority.and_then(|peer| views.get(&peer)) {
                Some(&view) => QueryTime::Historical(view),
                None => QueryTime::Present,
            },
        );
        self.apply_commands(tick, commands);
        self.core.step_world();

        let objects = self.replicated_objects();
        self.replication.replicate(&objects, tick)
    }

    fn apply_commands(&mut self, tick: Tick, commands: Commands) {
        for request in commands.spawns {
            let network_id = self.replication.allocate_network_id();
            trace!(tick, network_id = network_id.0, key = ?request.prediction_key, "spawn");
            self.core.insert(
                ObjectKey::Networked(network_id),
                NetObject {
                    behaviour: request.behaviour,
                    authority: ObjectAuthority::server(request.input_authority),
                    prediction_key: request.prediction_key,
                    confirmed: None,
                },
            );
            if let Some(pool) = request.pool_slot {
                match self.core.objects.get_mut(&pool.owner) {
                    Some(owner) => owner.behaviour.attach_pooled(pool.slot, network_id),
                    None => warn!(tick, owner = ?pool.owner, "pool owner missing"),
                }
            }
        }
        self.core.apply_launches(tick, commands.launches);
        for key in commands.despawns {
            if !self.core.despawn(key) {
                warn!(tick, object = ?key, "despawn of unknown object");
            }
        }
    }

    fn replicated_objects(&mut self) -> Vec<ReplicatedObject> {
        let mut objects = Vec::with_capacity(self.core.objects.len());
        for (key, object) in &self.core.objects {
            let ObjectKey::Networked(network_id) = *key else {
                continue;
            };
            match object.behaviour.write_state() {
                Ok(state) => objects.push(ReplicatedObject {
                    network_id,
                    kind: object.behaviour.kind(),
                    input_authority: object.authority.input_authority,
                    prediction_key: object.prediction_key,
                    state,
                }),
                Err(err) => {
                    self.core.stats.behaviour_errors += 1;
                    warn!(network_id = network_id.0, %err, "state not replicated");
                }
            }
        }
        objects
    }

    /// Renders the authority's view. `alpha` is the fraction of the next
    /// tick already accumulated.
    pub fn render(&mut self, alpha: f64, frame_dt: f32) {
        let local = (self.tick() as f64 - 1.0 + alpha.clamp(0.0, 1.0)).max(0.0);
        self.core.render(RenderTime::uniform(local), frame_dt);
    }

    /// Role-independent state.
    pub fn core(&self) -> &PeerCore {
        &self.core
    }
}
