//! A client peer.
//!
//! The client simulates the objects it has input authority over ahead of
//! the authority, spawning fire-data projectiles speculatively and firing
//! pooled physics projectiles ahead of confirmation. Each snapshot rolls
//! those objects back to confirmed state, re-poses replicated props, merges
//! or rejects pending predictions and replays the buffered inputs up to the
//! current tick.

use tracing::{debug, trace, warn};
use volley_config::SimulationConfig;
use volley_physics::QueryTime;

use crate::behaviour::{Commands, ObjectKey, SimStage, Tuning};
use crate::clock::{RenderTime, Tick, TickClock};
use crate::error::NetcodeError;
use crate::input::{InputMessage, PlayerInput};
use crate::peer::{NetObject, PeerCore};
use crate::prediction::{InputBuffer, PredictionKey, SpawnReconciler};
use crate::replicated::{ObjectAuthority, PeerId};
use crate::replication::{SpawnObject, Snapshot};
use crate::scene::Scene;

/// Client-side peer.
#[derive(Debug)]
pub struct ClientPeer {
    core: PeerCore,
    clock: TickClock,
    interpolation_delay: f64,
    latest_confirmed: Option<Tick>,
    inputs: InputBuffer,
    reconciler: SpawnReconciler,
}

impl ClientPeer {
    /// A client whose first simulated tick is `start_tick + 1`.
    pub fn new(
        local: PeerId,
        tuning: Tuning,
        scene: &Scene,
        simulation: &SimulationConfig,
        start_tick: Tick,
    ) -> Self {
        let clock = TickClock::starting_at(start_tick, tuning.tick_rate);
        Self {
            core: PeerCore::new(local, tuning, scene, simulation.hitbox_history_ticks),
            clock,
            interpolation_delay: simulation.interpolation_delay_ticks.max(0.0),
            latest_confirmed: None,
            inputs: InputBuffer::default(),
            reconciler: SpawnReconciler::new(simulation.prediction_window_ticks),
        }
    }

    /// Latest simulated tick.
    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    /// Newest authoritative tick applied.
    pub fn latest_confirmed(&self) -> Option<Tick> {
        self.latest_confirmed
    }

    /// Predictions awaiting confirmation.
    pub fn pending_predictions(&self) -> usize {
        self.reconciler.pending_len()
    }

    /// The remote tick this client currently sees proxies at.
    pub fn view_tick(&self) -> f64 {
        self.latest_confirmed
            .map_or(0.0, |tick| (tick as f64 - self.interpolation_delay).max(0.0))
    }

    /// Simulates the next tick with `input` and returns the message for the
    /// authority.
    pub fn tick_with(&mut self, input: PlayerInput) -> InputMessage {
        let tick = self.clock.advance();
        let input = PlayerInput {
            view_tick: self.view_tick(),
            ..input
        };
        self.inputs.push(tick, input);
        self.core.pose_scene(input.view_tick);

        // Keys wrap every 256 ticks; free stale ones before this tick reuses them.
        for key in self.reconciler.expire(tick) {
            self.reject_prediction(key, "window elapsed");
        }

        let commands = self.core.simulate(
            tick,
            SimStage::Forward,
            |_, object| !object.authority.is_proxy(),
            |authority| authority.has_input_authority().then_some(input),
            |_| QueryTime::Present,
        );
        self.apply_predicted(tick, commands);
        self.core.step_world();

        InputMessage {
            peer: self.core.local,
            tick,
            input,
        }
    }

    fn apply_predicted(&mut self, tick: Tick, commands: Commands) {
        let local = self.core.local;
        let Commands {
            spawns,
            launches,
            despawns,
        } = commands;
        for request in spawns {
            let Some(key) = request.prediction_key else {
                trace!(tick, "unkeyed spawn left to the authority");
                continue;
            };
            if let Err(err) = self.reconciler.register(key, tick) {
                warn!(tick, %err, "speculative spawn skipped");
                continue;
            }
            self.core.stats.predictions_spawned += 1;
            self.core.insert(
                ObjectKey::Predicted(key),
                NetObject {
                    behaviour: request.behaviour,
                    authority: ObjectAuthority::predicted(local),
                    prediction_key: Some(key),
                    confirmed: None,
                },
            );
        }
        self.core.apply_launches(tick, launches);
        for key in despawns {
            if let ObjectKey::Predicted(prediction) = key {
                self.reconciler.reject(&prediction);
                self.core.despawn(key);
            }
        }
    }

    fn reject_prediction(&mut self, key: PredictionKey, reason: &'static str) {
        if self.core.despawn(ObjectKey::Predicted(key)) {
            self.core.stats.predictions_rejected += 1;
            debug!(peer = %self.core.local, ?key, reason, "predicted spawn rejected");
        }
    }

    /// Applies an authoritative snapshot, then replays unconfirmed ticks.
    pub fn receive_snapshot(&mut self, snapshot: Snapshot) {
        let confirmed = snapshot.tick;
        if self.latest_confirmed.is_some_and(|latest| confirmed <= latest) {
            self.core.stats.stale_snapshots += 1;
            debug!(tick = confirmed, "stale snapshot ignored");
            return;
        }
        self.latest_confirmed = Some(confirmed);

        for despawn in snapshot.despawns {
            self.core.despawn(ObjectKey::Networked(despawn.network_id));
        }
        for spawn in snapshot.spawns {
            self.apply_spawn(spawn, confirmed);
        }
        for update in snapshot.updates {
            match self
                .core
                .objects
                .get_mut(&ObjectKey::Networked(update.network_id))
            {
                Some(object) => object.confirmed = Some(update.state),
                None => warn!(err = %NetcodeError::UnknownObject(update.network_id), "update skipped"),
            }
        }
        for key in self.reconciler.resolve_unmatched(confirmed) {
            self.reject_prediction(key, "not confirmed by snapshot");
        }

        self.restore(confirmed);
        self.core.sync_world(confirmed, self.tick());
        self.inputs.discard_up_to(confirmed);
        self.resimulate(confirmed);
    }

    fn apply_spawn(&mut self, spawn: SpawnObject, confirmed: Tick) {
        let local = self.core.local;
        let key = ObjectKey::Networked(spawn.network_id);
        if self.core.objects.contains_key(&key) {
            return;
        }
        let authority = ObjectAuthority::client(local, spawn.input_authority);

        let merged = spawn
            .prediction_key
            .filter(|_| spawn.input_authority == Some(local))
            .filter(|prediction| self.reconciler.confirm(prediction))
            .and_then(|prediction| self.core.objects.remove(&ObjectKey::Predicted(prediction)));
        if let Some(mut object) = merged {
            object.authority = authority;
            object.confirmed = Some(spawn.state);
            self.core.objects.insert(key, object);
            self.core.stats.predictions_merged += 1;
            debug!(peer = %local, network_id = spawn.network_id.0, "predicted spawn merged");
            return;
        }

        let mut behaviour = spawn.kind.instantiate(&self.core.tuning);
        if let Err(err) = behaviour.read_state(&spawn.state, confirmed) {
            self.core.stats.behaviour_errors += 1;
            warn!(network_id = spawn.network_id.0, %err, "spawn skipped");
            return;
        }
        self.core.insert(
            key,
            NetObject {
                behaviour,
                authority,
                prediction_key: spawn.prediction_key,
                confirmed: Some(spawn.state),
            },
        );
    }

    fn restore(&mut self, confirmed: Tick) {
        let stats = &mut self.core.stats;
        for (key, object) in &mut self.core.objects {
            let (ObjectKey::Networked(_), Some(state)) = (key, object.confirmed.as_deref()) else {
                continue;
            };
            if let Err(err) = object.behaviour.read_state(state, confirmed) {
                stats.behaviour_errors += 1;
                warn!(object = ?key, %err, "restore failed");
            }
        }
    }

    fn resimulate(&mut self, confirmed: Tick) {
        let current = self.tick();
        if current <= confirmed {
            return;
        }
        let replay: Vec<(Tick, PlayerInput)> = self
            .inputs
            .entries_after(confirmed)
            .map(|entry| (entry.tick, entry.input))
            .collect();
        trace!(from = confirmed + 1, to = current, "resimulating");

        for tick in confirmed + 1..=current {
            let input = replay
                .iter()
                .find(|(t, _)| *t == tick)
                .map(|(_, input)| *input);
            let view = input.map_or(self.view_tick(), |input| input.view_tick);
            self.core.pose_scene(view);
            // Spawns and despawns already happened during the forward pass;
            // launches are replayed because restore un-fired their targets.
            let commands = self.core.simulate(
                tick,
                SimStage::Resimulation,
                |key, object| {
                    matches!(key, ObjectKey::Networked(_)) && object.authority.has_input_authority()
                },
                |authority| input.filter(|_| authority.has_input_authority()),
                |_| QueryTime::Present,
            );
            self.core.apply_launches(tick, commands.launches);
            self.core.stats.resimulated_ticks += 1;
        }
    }

    /// Renders the client's view. `alpha` is the fraction of the next tick
    /// already accumulated.
    pub fn render(&mut self, alpha: f64, frame_dt: f32) {
        let time = RenderTime::new(
            self.tick(),
            self.latest_confirmed.unwrap_or(0),
            alpha,
            self.interpolation_delay,
        );
        self.core.render(time, frame_dt);
    }

    /// Role-independent state.
    pub fn core(&self) -> &PeerCore {
        &self.core
    }
}
