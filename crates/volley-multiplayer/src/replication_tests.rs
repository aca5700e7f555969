//! Unit tests for object replication.

use super::*;
use crate::behaviour::StrategyKind;

fn object(id: NetworkId, state: &[u8]) -> ReplicatedObject {
    ReplicatedObject {
        network_id: id,
        kind: ObjectKind::FireDataProjectile,
        input_authority: Some(PeerId(1)),
        prediction_key: Some(PredictionKey::new(12, PeerId(1))),
        state: state.to_vec(),
    }
}

#[test]
fn test_new_object_is_spawned_once() {
    let mut server = ReplicationServer::new();
    server.add_client(PeerId(1));
    let id = server.allocate_network_id();

    let objects = vec![object(id, &[1, 2, 3])];
    let out = server.replicate(&objects, 5);
    assert_eq!(out.len(), 1);
    let (client, snapshot) = &out[0];
    assert_eq!(*client, PeerId(1));
    assert_eq!(snapshot.tick, 5);
    assert_eq!(snapshot.spawns.len(), 1);
    assert_eq!(snapshot.spawns[0].network_id, id);
    assert_eq!(
        snapshot.spawns[0].prediction_key,
        Some(PredictionKey::new(12, PeerId(1)))
    );

    // Unchanged state produces nothing.
    let out = server.replicate(&objects, 6);
    assert!(out[0].1.is_empty());
}

#[test]
fn test_changed_state_produces_update() {
    let mut server = ReplicationServer::new();
    server.add_client(PeerId(1));
    let id = server.allocate_network_id();

    server.replicate(&[object(id, &[1])], 1);
    let out = server.replicate(&[object(id, &[2])], 2);
    let snapshot = &out[0].1;
    assert!(snapshot.spawns.is_empty());
    assert_eq!(
        snapshot.updates,
        vec![ObjectUpdate {
            network_id: id,
            state: vec![2],
        }]
    );
}

#[test]
fn test_removed_object_is_despawned() {
    let mut server = ReplicationServer::new();
    server.add_client(PeerId(1));
    let a = server.allocate_network_id();
    let b = server.allocate_network_id();

    server.replicate(&[object(a, &[1]), object(b, &[1])], 1);
    let out = server.replicate(&[object(b, &[1])], 2);
    assert_eq!(out[0].1.despawns, vec![DespawnObject { network_id: a }]);

    // Already despawned for this client.
    let out = server.replicate(&[object(b, &[1])], 3);
    assert!(out[0].1.is_empty());
}

#[test]
fn test_late_joiner_receives_full_spawns() {
    let mut server = ReplicationServer::new();
    server.add_client(PeerId(1));
    let weapon = server.allocate_network_id();
    let mut objects = vec![ReplicatedObject {
        network_id: weapon,
        kind: ObjectKind::Weapon(StrategyKind::CountOnly),
        input_authority: Some(PeerId(1)),
        prediction_key: None,
        state: vec![7],
    }];
    server.replicate(&objects, 1);

    objects[0].state = vec![8];
    server.add_client(PeerId(2));
    let out = server.replicate(&objects, 2);
    assert_eq!(server.clients(), vec![PeerId(1), PeerId(2)]);

    let early = &out[0].1;
    assert_eq!(early.updates.len(), 1);
    assert!(early.spawns.is_empty());

    let late = &out[1].1;
    assert_eq!(late.spawns.len(), 1);
    assert_eq!(late.spawns[0].kind, ObjectKind::Weapon(StrategyKind::CountOnly));
    assert_eq!(late.spawns[0].state, vec![8]);
}

#[test]
fn test_removed_client_gets_nothing() {
    let mut server = ReplicationServer::new();
    server.add_client(PeerId(1));
    server.add_client(PeerId(2));
    server.remove_client(PeerId(1));
    let id = server.allocate_network_id();
    let out = server.replicate(&[object(id, &[1])], 1);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, PeerId(2));
}

#[test]
fn test_network_ids_are_monotonic() {
    let mut server = ReplicationServer::default();
    let a = server.allocate_network_id();
    let b = server.allocate_network_id();
    assert!(b > a);
}

#[test]
fn test_snapshot_survives_the_wire() {
    let mut server = ReplicationServer::new();
    server.add_client(PeerId(3));
    let id = server.allocate_network_id();
    let out = server.replicate(&[object(id, &[9, 9, 9])], 42);
    let bytes = encode("snapshot", &out[0].1).unwrap();
    let decoded: Snapshot = decode("snapshot", &bytes).unwrap();
    assert_eq!(decoded, out[0].1);

    assert!(matches!(
        decode::<Snapshot>("snapshot", &[0xff]),
        Err(NetcodeError::Decode { what: "snapshot", .. })
    ));
}

#[test]
fn test_bandwidth_stats_accumulate() {
    let mut stats = BandwidthStats::default();
    assert_eq!(stats.average_raw(), 0.0);
    stats.record(&[0u8; 100]);
    stats.record(&[0u8; 50]);
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.raw_bytes, 150);
    assert!(stats.compressed_bytes > 0);
    assert!(stats.compressed_bytes < stats.raw_bytes);
    assert_eq!(stats.average_raw(), 75.0);
}
