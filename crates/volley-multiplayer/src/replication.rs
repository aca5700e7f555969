//! Object replication: delta-compressed state from the authority to clients.
//!
//! The authority assigns a [`NetworkId`] to every replicated object. Each
//! tick, [`ReplicationServer::replicate`] diffs every object's encoded state
//! against per-client shadow state and produces [`SpawnObject`],
//! [`ObjectUpdate`] or [`DespawnObject`] messages as needed. A client that
//! joins late has an empty shadow and therefore receives full spawns for
//! everything that exists.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::behaviour::ObjectKind;
use crate::clock::Tick;
use crate::error::NetcodeError;
use crate::prediction::PredictionKey;
use crate::replicated::PeerId;

// ---------------------------------------------------------------------------
// NetworkId
// ---------------------------------------------------------------------------

/// Unique network identifier for a replicated object. Allocated by the
/// authority from a monotonically increasing counter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u64);

// ---------------------------------------------------------------------------
// Wire codec
// ---------------------------------------------------------------------------

/// Encodes `value` with postcard.
pub fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, NetcodeError> {
    postcard::to_allocvec(value).map_err(|source| NetcodeError::Encode { what, source })
}

/// Decodes a postcard-encoded value.
pub fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, NetcodeError> {
    postcard::from_bytes(bytes).map_err(|source| NetcodeError::Decode { what, source })
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Spawn message: full state of an object new to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpawnObject {
    /// The object's network identifier.
    pub network_id: NetworkId,
    /// Which behaviour to instantiate.
    pub kind: ObjectKind,
    /// Peer whose input drives the object.
    pub input_authority: Option<PeerId>,
    /// Key of the speculative spawn this object confirms, if any.
    pub prediction_key: Option<PredictionKey>,
    /// Encoded replicated state.
    pub state: Vec<u8>,
}

/// Update message for an object whose state changed since the last send.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectUpdate {
    /// The object's network identifier.
    pub network_id: NetworkId,
    /// Encoded replicated state.
    pub state: Vec<u8>,
}

/// Despawn message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DespawnObject {
    /// The object's network identifier.
    pub network_id: NetworkId,
}

/// Output of one replication tick for one client.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Authority tick the state belongs to.
    pub tick: Tick,
    /// New objects the client should spawn.
    pub spawns: Vec<SpawnObject>,
    /// State changes for objects the client already knows.
    pub updates: Vec<ObjectUpdate>,
    /// Objects the client should remove.
    pub despawns: Vec<DespawnObject>,
}

impl Snapshot {
    /// Whether the snapshot carries no object messages.
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.updates.is_empty() && self.despawns.is_empty()
    }
}

/// One object's current state as seen by [`ReplicationServer::replicate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedObject {
    /// Network identifier.
    pub network_id: NetworkId,
    /// Behaviour kind.
    pub kind: ObjectKind,
    /// Input authority.
    pub input_authority: Option<PeerId>,
    /// Prediction key the object was spawned with.
    pub prediction_key: Option<PredictionKey>,
    /// Encoded state.
    pub state: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Per-client shadow state
// ---------------------------------------------------------------------------

/// Which objects a client knows and the state bytes it last received.
#[derive(Debug, Clone, Default)]
struct ClientShadow {
    objects: FxHashMap<NetworkId, Vec<u8>>,
}

// ---------------------------------------------------------------------------
// ReplicationServer
// ---------------------------------------------------------------------------

/// Authority-side replication. Compares object state against per-client
/// shadow state and emits minimal messages.
#[derive(Debug, Clone)]
pub struct ReplicationServer {
    next_network_id: u64,
    shadows: FxHashMap<PeerId, ClientShadow>,
}

impl ReplicationServer {
    /// Creates a replication server with no clients.
    pub fn new() -> Self {
        Self {
            next_network_id: 1,
            shadows: FxHashMap::default(),
        }
    }

    /// Allocates the next [`NetworkId`].
    pub fn allocate_network_id(&mut self) -> NetworkId {
        let id = NetworkId(self.next_network_id);
        self.next_network_id += 1;
        id
    }

    /// Starts tracking a client.
    pub fn add_client(&mut self, client: PeerId) {
        self.shadows.entry(client).or_default();
    }

    /// Stops tracking a client.
    pub fn remove_client(&mut self, client: PeerId) {
        self.shadows.remove(&client);
    }

    /// Tracked clients in id order.
    pub fn clients(&self) -> Vec<PeerId> {
        let mut clients: Vec<PeerId> = self.shadows.keys().copied().collect();
        clients.sort_unstable();
        clients
    }

    /// Runs one replication tick. `objects` must be in network id order; the
    /// result is in client id order.
    pub fn replicate(&mut self, objects: &[ReplicatedObject], tick: Tick) -> Vec<(PeerId, Snapshot)> {
        let current: FxHashSet<NetworkId> = objects.iter().map(|o| o.network_id).collect();

        let mut result = Vec::with_capacity(self.shadows.len());
        for client in self.clients() {
            let Some(shadow) = self.shadows.get_mut(&client) else {
                continue;
            };
            let mut snapshot = Snapshot {
                tick,
                ..Snapshot::default()
            };

            // Objects in the shadow that no longer exist.
            let mut gone: Vec<NetworkId> = shadow
                .objects
                .keys()
                .filter(|id| !current.contains(id))
                .copied()
                .collect();
            gone.sort_unstable();
            for network_id in gone {
                shadow.objects.remove(&network_id);
                snapshot.despawns.push(DespawnObject { network_id });
            }

            for object in objects {
                match shadow.objects.get_mut(&object.network_id) {
                    None => {
                        snapshot.spawns.push(SpawnObject {
                            network_id: object.network_id,
                            kind: object.kind,
                            input_authority: object.input_authority,
                            prediction_key: object.prediction_key,
                            state: object.state.clone(),
                        });
                        shadow
                            .objects
                            .insert(object.network_id, object.state.clone());
                    }
                    Some(last_sent) if *last_sent != object.state => {
                        last_sent.clone_from(&object.state);
                        snapshot.updates.push(ObjectUpdate {
                            network_id: object.network_id,
                            state: object.state.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }

            result.push((client, snapshot));
        }
        result
    }
}

impl Default for ReplicationServer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Bandwidth accounting
// ---------------------------------------------------------------------------

/// Message and byte totals for one direction of traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandwidthStats {
    /// Messages sent.
    pub messages: u64,
    /// Postcard-encoded bytes.
    pub raw_bytes: u64,
    /// Bytes after LZ4 compression.
    pub compressed_bytes: u64,
}

impl BandwidthStats {
    /// Accounts one encoded message.
    pub fn record(&mut self, bytes: &[u8]) {
        self.messages += 1;
        self.raw_bytes += bytes.len() as u64;
        self.compressed_bytes += lz4_flex::compress_prepend_size(bytes).len() as u64;
    }

    /// Average raw bytes per message.
    pub fn average_raw(&self) -> f64 {
        if self.messages == 0 {
            0.0
        } else {
            self.raw_bytes as f64 / self.messages as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "replication_tests.rs"]
mod tests;
