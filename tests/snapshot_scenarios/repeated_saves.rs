//! The setup permit re-arms after every save

use crate::common::*;
use shardsave::layers::durability::testing::MemoryTargetFactory;
use shardsave::SnapshotConfig;
use std::sync::Arc;

#[test]
fn test_consecutive_blocking_saves_each_elect_a_leader() {
    let factory = Arc::new(MemoryTargetFactory::new());
    let cluster = TestCluster::builder()
        .sites_per_host(4)
        .memory_targets(factory.clone())
        .build();

    for round in 0..5 {
        let result = cluster.save(&format!("round{}", round), true);
        assert!(!result.has_failure(), "round {} failed", round);
        assert!(cluster.host(0).barrier().is_idle());
        next_millisecond();
    }

    // Two eligible tables per round, one target each.
    assert_eq!(factory.created_tables().len(), 10);
    assert!(factory.targets().iter().all(|t| t.is_closed()));
    assert_eq!(cluster.registry.snapshots().len(), 5);
    assert!(cluster.registry.in_progress().is_empty());
}

#[test]
fn test_registry_history_is_bounded() {
    let factory = Arc::new(MemoryTargetFactory::new());
    let cluster = TestCluster::builder()
        .memory_targets(factory)
        .config(SnapshotConfig::default().with_max_completed_snapshots(2))
        .build();

    for round in 0..4 {
        assert!(!cluster.save(&format!("r{}", round), true).has_failure());
        next_millisecond();
    }
    let nonces: Vec<String> = cluster
        .registry
        .snapshots()
        .into_iter()
        .map(|s| s.nonce)
        .collect();
    assert_eq!(nonces, vec!["r2", "r3"]);
}

#[test]
fn test_failed_setup_does_not_wedge_the_barrier() {
    let factory = Arc::new(MemoryTargetFactory::new().panic_for("REGIONS"));
    let cluster = TestCluster::builder()
        .sites_per_host(3)
        .memory_targets(factory)
        .build();

    for attempt in 0..3 {
        let result = cluster.save(&format!("broken{}", attempt), false);
        assert!(result.has_failure());
        assert!(result.rows().iter().any(|row| row
            .iter()
            .any(|cell| cell.as_str().map_or(false, |s| s.contains("panic")))));
        assert!(cluster.host(0).barrier().is_idle());
        assert!(!cluster.host(0).is_snapshotting());
        assert!(cluster.registry.snapshots().is_empty());
        next_millisecond();
    }
}
