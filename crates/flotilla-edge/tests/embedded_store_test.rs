// Integration tests running the engine on the RocksDB-backed store
// Tests that fleet state survives reopening the database

mod common;

use std::sync::Arc;

use common::{TestFleet, assert_fleet_consistent};
use flotilla_edge::{FleetVerdict, StatusType};
use flotilla_persistence::{EmbeddedStore, KvStore, StorageMode};

#[test]
fn test_engine_on_embedded_store() {
    let data_dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(EmbeddedStore::open(data_dir.path()).unwrap());
    assert_eq!(store.storage_mode(), StorageMode::Embedded);

    let fleet = TestFleet::with_store(store);
    let a = fleet.edge_env("a", &[1]);
    let b = fleet.edge_env("b", &[1]);
    let group = fleet.dynamic_group("site", &[1], false);
    let stack = fleet.compose_stack("web", &[group]).stack;
    assert_eq!(stack.num_deployments, 2);

    fleet.report(stack.id, &a, StatusType::Running, 1).unwrap();
    let view = fleet
        .report(stack.id, &b, StatusType::Running, 1)
        .unwrap()
        .unwrap();
    assert_eq!(view.summary.verdict, FleetVerdict::Running);
    assert_fleet_consistent(&fleet.engine);
}

#[test]
fn test_fleet_survives_reopen() {
    let data_dir = tempfile::tempdir().unwrap();

    let stack_id = {
        let store: Arc<dyn KvStore> = Arc::new(EmbeddedStore::open(data_dir.path()).unwrap());
        let fleet = TestFleet::with_store(store);
        let a = fleet.edge_env("a", &[]);
        let group = fleet.static_group("solo", &[&a]);
        let stack = fleet.compose_stack("web", &[group]).stack;
        fleet.report(stack.id, &a, StatusType::Deploying, 1).unwrap();
        stack.id
    };

    let store: Arc<dyn KvStore> = Arc::new(EmbeddedStore::open(data_dir.path()).unwrap());
    let fleet = TestFleet::with_store(store);

    let view = fleet.engine.get_stack(stack_id).unwrap();
    assert_eq!(view.stack.num_deployments, 1);
    assert_eq!(view.statuses.len(), 1);
    assert_eq!(view.statuses[0].status.len(), 1);
    assert_eq!(view.summary.verdict, FleetVerdict::Deploying);

    // Sequences continue where they stopped
    let b = fleet.edge_env("b", &[]);
    assert_eq!(b.id.value(), 2);
    assert_fleet_consistent(&fleet.engine);
}
