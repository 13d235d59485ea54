//! Non-blocking saves: the call returns once tasks are handed out

use crate::common::*;
use shardsave::layers::durability::testing::MemoryTargetFactory;
use shardsave::{Catalog, ResultShape, TableInfo, CNAME_ERR_MSG, CNAME_RESULT, CNAME_TABLE};
use std::sync::Arc;

fn three_tables() -> Catalog {
    Catalog::new(
        "test-cluster",
        "test-db",
        vec![
            TableInfo::partitioned(0, "ORDERS"),
            TableInfo::replicated(1, "REGIONS"),
            TableInfo::partitioned(2, "ITEMS"),
        ],
    )
}

#[test]
fn test_one_table_fails_creation_others_proceed() {
    let factory = Arc::new(MemoryTargetFactory::new().fail_create_for("ITEMS"));
    let cluster = TestCluster::builder()
        .sites_per_host(3)
        .catalog(three_tables())
        .memory_targets(factory.clone())
        .build();

    let result = cluster.save("nightly", false);
    assert_eq!(result.shape(), Some(ResultShape::Node));
    assert_eq!(result.row_count(), 3);
    let status = |table: &str| {
        let row = (0..result.row_count())
            .find(|&r| result.get_string(r, CNAME_TABLE) == Some(table))
            .unwrap();
        (
            result.get_string(row, CNAME_RESULT).unwrap().to_string(),
            result.get_string(row, CNAME_ERR_MSG).unwrap().to_string(),
        )
    };
    assert_eq!(status("ORDERS").0, "SUCCESS");
    assert_eq!(status("REGIONS").0, "SUCCESS");
    let (items, message) = status("ITEMS");
    assert_eq!(items, "FAILURE");
    assert!(message.starts_with("SNAPSHOT INITIATION OF "));
    assert!(message.contains("nightly-ITEMS-host_0.vpt"));

    // Writes are still pending on the sites.
    let entry = &cluster.registry.in_progress()[0];
    assert_eq!(entry.tables.iter().filter(|t| t.is_finished()).count(), 1);
    assert!(cluster.host(0).is_snapshotting());

    assert!(cluster.drain().is_empty());

    let view = &cluster.registry.snapshots()[0];
    assert!(view.time_finished.is_some());
    assert!(view.has_errors());
    assert!(!cluster.host(0).is_snapshotting());
    assert!(factory.target("ORDERS").unwrap().is_closed());
    assert_eq!(factory.target("ORDERS").unwrap().writer_partitions().len(), 3);
    assert_eq!(factory.target("REGIONS").unwrap().writer_partitions().len(), 1);
}

#[test]
fn test_save_rejected_while_previous_still_draining() {
    let factory = Arc::new(MemoryTargetFactory::new());
    let cluster = TestCluster::builder().memory_targets(factory).build();

    let first = cluster.save("first", false);
    assert!(!first.has_failure());
    assert!(cluster.host(0).is_snapshotting());

    next_millisecond();
    let second = cluster.save("second", false);
    assert_eq!(second.row_count(), 1);
    assert_eq!(second.get_string(0, CNAME_RESULT), Some("FAILURE"));
    assert_eq!(second.get_string(0, CNAME_ERR_MSG), Some("SNAPSHOT IN PROGRESS"));
    assert_eq!(cluster.registry.snapshots().len(), 1);

    cluster.drain();
    next_millisecond();
    let third = cluster.save("third", false);
    assert!(!third.has_failure());
    cluster.drain();
    assert_eq!(cluster.registry.snapshots().len(), 2);
    assert!(cluster.registry.in_progress().is_empty());
}

#[test]
fn test_sites_can_drain_incrementally() {
    let factory = Arc::new(MemoryTargetFactory::new());
    let cluster = TestCluster::builder()
        .sites_per_host(2)
        .memory_targets(factory.clone())
        .build();
    cluster.save("nightly", false);

    let host = &cluster.cluster().hosts()[0];
    let mut rounds = 0;
    while host.sites().iter().any(|s| s.has_pending_work()) {
        for site in host.sites() {
            site.do_snapshot_work(1);
        }
        rounds += 1;
        assert!(rounds < 10);
    }
    assert!(!host.service().is_snapshotting());
    assert!(cluster.registry.snapshots()[0].time_finished.is_some());
}
