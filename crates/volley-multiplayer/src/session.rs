//! In-process loopback transport.
//!
//! A [`LoopbackSession`] hosts one authority and any number of clients and
//! moves postcard-encoded messages between them with a fixed one-way latency
//! in ticks. Clients run ahead of the authority by that latency, so the input
//! a client produces for tick `t` arrives exactly when the authority
//! simulates `t`.

use std::collections::VecDeque;

use glam::Vec3;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};
use volley_config::{Config, SimulationConfig};

use crate::behaviour::{StrategyKind, Tuning};
use crate::client::ClientPeer;
use crate::clock::Tick;
use crate::input::{InputMessage, PlayerInput};
use crate::replicated::PeerId;
use crate::replication::{BandwidthStats, NetworkId, Snapshot, decode, encode};
use crate::scene::Scene;
use crate::server::ServerPeer;

/// Produces a client's input for a given tick.
pub type InputScript = Box<dyn FnMut(Tick) -> PlayerInput>;

/// Presses fire on exactly the listed ticks, aiming along `aim`.
pub fn fire_on(ticks: Vec<Tick>, aim: Vec3) -> InputScript {
    Box::new(move |tick| {
        if ticks.contains(&tick) {
            PlayerInput::firing(aim)
        } else {
            PlayerInput::idle(aim)
        }
    })
}

/// Presses fire every `interval` ticks, aiming along `aim`.
pub fn fire_every(interval: Tick, aim: Vec3) -> InputScript {
    let interval = interval.max(2);
    Box::new(move |tick| {
        if tick % interval == 0 {
            PlayerInput::firing(aim)
        } else {
            PlayerInput::idle(aim)
        }
    })
}

/// Never fires.
pub fn idle() -> InputScript {
    Box::new(|_| PlayerInput::default())
}

struct RemoteClient {
    peer: ClientPeer,
    script: InputScript,
    inbox: VecDeque<(u64, Vec<u8>)>,
}

/// Authority plus clients connected through a latency-delayed loopback.
pub struct LoopbackSession {
    server: ServerPeer,
    clients: Vec<RemoteClient>,
    server_inbox: VecDeque<(u64, Vec<u8>)>,
    dropped_inputs: FxHashSet<(PeerId, Tick)>,
    scene: Scene,
    tuning: Tuning,
    simulation: SimulationConfig,
    latency: u64,
    wall: u64,
    next_peer: u32,
    snapshot_stats: BandwidthStats,
    input_stats: BandwidthStats,
}

impl LoopbackSession {
    /// Creates a session from `config` with no clients.
    pub fn new(config: &Config, scene: Scene) -> Self {
        let tuning = Tuning::new(config.weapon.clone(), config.simulation.tick_rate);
        let server = ServerPeer::new(
            tuning.clone(),
            &scene,
            config.simulation.hitbox_history_ticks,
        );
        info!(
            tick_rate = tuning.tick_rate,
            latency = config.network.latency_ticks,
            prediction = tuning.weapon.use_spawn_prediction,
            "loopback session started"
        );
        Self {
            server,
            clients: Vec::new(),
            server_inbox: VecDeque::new(),
            dropped_inputs: FxHashSet::default(),
            scene,
            tuning,
            simulation: config.simulation.clone(),
            latency: u64::from(config.network.latency_ticks),
            wall: 0,
            next_peer: 1,
            snapshot_stats: BandwidthStats::default(),
            input_stats: BandwidthStats::default(),
        }
    }

    /// Connects a client driven by `script`. It receives full state on the
    /// next authority tick.
    pub fn join_client(&mut self, script: InputScript) -> PeerId {
        let peer = PeerId(self.next_peer);
        self.next_peer += 1;
        let start = self.server.tick() + self.latency;
        self.clients.push(RemoteClient {
            peer: ClientPeer::new(peer, self.tuning.clone(), &self.scene, &self.simulation, start),
            script,
            inbox: VecDeque::new(),
        });
        self.server.add_client(peer);
        debug!(%peer, start, "client joined");
        peer
    }

    /// Connects a client that never fires.
    pub fn join_observer(&mut self) -> PeerId {
        self.join_client(idle())
    }

    /// Spawns a weapon on the authority.
    pub fn spawn_weapon(&mut self, owner: PeerId, strategy: StrategyKind, muzzle: Vec3) -> NetworkId {
        self.server.spawn_weapon(owner, strategy, muzzle)
    }

    /// Loses the input `peer` produces for `tick` in transit.
    pub fn drop_input(&mut self, peer: PeerId, tick: Tick) {
        self.dropped_inputs.insert((peer, tick));
    }

    /// Advances every peer by one tick.
    pub fn step(&mut self) {
        self.wall += 1;
        let now = self.wall;

        for client in &mut self.clients {
            while client.inbox.front().is_some_and(|(due, _)| *due <= now) {
                let Some((_, bytes)) = client.inbox.pop_front() else {
                    break;
                };
                match decode::<Snapshot>("snapshot", &bytes) {
                    Ok(snapshot) => client.peer.receive_snapshot(snapshot),
                    Err(err) => warn!(peer = %client.peer.core().local(), %err, "snapshot dropped"),
                }
            }

            let next = client.peer.tick() + 1;
            let message = client.peer.tick_with((client.script)(next));
            if self.dropped_inputs.remove(&(message.peer, message.tick)) {
                debug!(peer = %message.peer, tick = message.tick, "input lost in transit");
                continue;
            }
            match encode("input", &message) {
                Ok(bytes) => {
                    self.input_stats.record(&bytes);
                    self.server_inbox.push_back((now + self.latency, bytes));
                }
                Err(err) => warn!(%err, "input not sent"),
            }
        }

        while self
            .server_inbox
            .front()
            .is_some_and(|(due, _)| *due <= now)
        {
            let Some((_, bytes)) = self.server_inbox.pop_front() else {
                break;
            };
            match decode::<InputMessage>("input", &bytes) {
                Ok(message) => self.server.receive_input(message),
                Err(err) => warn!(%err, "input dropped"),
            }
        }

        for (peer, snapshot) in self.server.step() {
            let bytes = match encode("snapshot", &snapshot) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%peer, %err, "snapshot not sent");
                    continue;
                }
            };
            self.snapshot_stats.record(&bytes);
            if let Some(client) = self
                .clients
                .iter_mut()
                .find(|c| c.peer.core().local() == peer)
            {
                client.inbox.push_back((now + self.latency, bytes));
            }
        }
    }

    /// Advances `ticks` times.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Renders every peer once.
    pub fn render(&mut self, alpha: f64, frame_dt: f32) {
        self.server.render(alpha, frame_dt);
        for client in &mut self.clients {
            client.peer.render(alpha, frame_dt);
        }
    }

    /// The authority.
    pub fn server(&self) -> &ServerPeer {
        &self.server
    }

    /// A client by id.
    pub fn client(&self, peer: PeerId) -> Option<&ClientPeer> {
        self.clients
            .iter()
            .map(|c| &c.peer)
            .find(|c| c.core().local() == peer)
    }

    /// Every client in join order.
    pub fn clients(&self) -> impl Iterator<Item = &ClientPeer> {
        self.clients.iter().map(|c| &c.peer)
    }

    /// One-way latency in ticks.
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Authority-to-client traffic.
    pub fn snapshot_stats(&self) -> BandwidthStats {
        self.snapshot_stats
    }

    /// Client-to-authority traffic.
    pub fn input_stats(&self) -> BandwidthStats {
        self.input_stats
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
