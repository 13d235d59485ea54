//! Blocking saves: every site drains before the call returns

use crate::common::*;
use shardsave::layers::durability::testing::MemoryTargetFactory;
use shardsave::{
    read_snapshot_digest, HostId, PartitionId, ResultShape, TableFileReader, CNAME_ERR_MSG,
    CNAME_RESULT, CNAME_SITE_ID,
};
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_blocking_save_writes_every_table() {
    let cluster = TestCluster::builder()
        .sites_per_host(3)
        .rows_per_table(25)
        .build();
    let result = cluster.save("nightly", true);

    assert_eq!(result.shape(), Some(ResultShape::Site));
    assert_eq!(result.row_count(), 3);
    let sites: HashSet<i64> = (0..3)
        .map(|r| result.get_i64(r, CNAME_SITE_ID).unwrap())
        .collect();
    assert_eq!(sites, HashSet::from([0, 1, 2]));
    for row in 0..3 {
        assert_eq!(result.get_string(row, CNAME_RESULT), Some("SUCCESS"));
    }

    assert_eq!(
        cluster.file_names(),
        vec![
            "nightly-ORDERS-host_0.vpt",
            "nightly-REGIONS.vpt",
            "nightly-host_0.digest"
        ]
    );

    let orders = TableFileReader::read(&cluster.path().join("nightly-ORDERS-host_0.vpt")).unwrap();
    assert!(orders.complete);
    assert_eq!(orders.header.table_name, "ORDERS");
    assert_eq!(orders.header.partition_ids, vec![0, 1, 2]);
    assert_eq!(orders.row_count(), 75);
    for partition in 0..3 {
        let rows = orders.rows_for(PartitionId(partition));
        assert_eq!(rows.len(), 25);
        assert_eq!(rows[0], seeded_row("ORDERS", partition, 0).as_slice());
    }

    // A replicated table is written by exactly one site.
    let regions = TableFileReader::read(&cluster.path().join("nightly-REGIONS.vpt")).unwrap();
    assert!(regions.complete);
    assert!(regions.header.is_replicated);
    assert_eq!(regions.row_count(), 25);
    let writers: HashSet<_> = regions.blocks.iter().map(|b| b.partition_id).collect();
    assert_eq!(writers.len(), 1);

    let digest = read_snapshot_digest(&cluster.path().join("nightly-host_0.digest")).unwrap();
    assert_eq!(digest.tables, vec!["ORDERS", "REGIONS"]);

    let snapshots = cluster.registry.snapshots();
    assert_eq!(snapshots.len(), 1);
    let view = &snapshots[0];
    assert_eq!(view.host_id, HostId(0));
    assert!(view.time_finished.is_some());
    assert!(!view.has_errors());
    assert!(view.tables.iter().all(|t| t.bytes_written > 0));

    assert!(!cluster.host(0).is_snapshotting());
    assert!(cluster.host(0).barrier().is_idle());
}

#[test]
fn test_blocking_write_failure_reported_by_writing_sites() {
    let factory = Arc::new(MemoryTargetFactory::new().fail_writes_for("ORDERS"));
    let cluster = TestCluster::builder()
        .sites_per_host(2)
        .memory_targets(factory)
        .build();
    let result = cluster.save("nightly", true);

    assert_eq!(result.shape(), Some(ResultShape::Site));
    for row in 0..2 {
        assert_eq!(result.get_string(row, CNAME_RESULT), Some("FAILURE"));
        assert!(result
            .get_string(row, CNAME_ERR_MSG)
            .unwrap()
            .starts_with("ORDERS: "));
    }

    let view = &cluster.registry.snapshots()[0];
    assert!(view.time_finished.is_some());
    let orders = view.tables.iter().find(|t| t.name == "ORDERS").unwrap();
    assert!(orders.last_error.is_some());
    let regions = view.tables.iter().find(|t| t.name == "REGIONS").unwrap();
    assert!(regions.last_error.is_none());
}

#[test]
fn test_blocking_setup_failure_folded_into_site_rows() {
    let factory = Arc::new(MemoryTargetFactory::new().fail_create_for("REGIONS"));
    let cluster = TestCluster::builder()
        .sites_per_host(2)
        .memory_targets(factory.clone())
        .build();
    let result = cluster.save("nightly", true);

    assert_eq!(result.shape(), Some(ResultShape::Site));
    let failures: Vec<&str> = (0..2)
        .filter(|&r| result.get_string(r, CNAME_RESULT) == Some("FAILURE"))
        .map(|r| result.get_string(r, CNAME_ERR_MSG).unwrap())
        .collect();
    // Only the leader saw the creation failure.
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("SNAPSHOT INITIATION OF "));

    assert_eq!(factory.created_tables(), vec!["ORDERS"]);
    assert!(factory.target("ORDERS").unwrap().is_closed());
    assert!(cluster.registry.snapshots()[0].time_finished.is_some());
}

#[test]
fn test_site_panic_keeps_site_shaped_rows() {
    // REGIONS is replicated, so exactly one site writes it and panics.
    let factory = Arc::new(MemoryTargetFactory::new().panic_writes_for("REGIONS"));
    let cluster = TestCluster::builder()
        .sites_per_host(3)
        .memory_targets(factory.clone())
        .build();
    let result = cluster.save("nightly", true);

    assert_eq!(result.shape(), Some(ResultShape::Site));
    assert_eq!(result.row_count(), 3);
    let sites: HashSet<i64> = (0..3)
        .map(|r| result.get_i64(r, CNAME_SITE_ID).unwrap())
        .collect();
    assert_eq!(sites, HashSet::from([0, 1, 2]));
    let failures: Vec<&str> = (0..3)
        .filter(|&r| result.get_string(r, CNAME_RESULT) == Some("FAILURE"))
        .map(|r| result.get_string(r, CNAME_ERR_MSG).unwrap())
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("panicked"));

    // The unfinished write is abandoned, so the host is free again.
    assert!(factory.target("REGIONS").unwrap().is_closed());
    assert!(!cluster.host(0).is_snapshotting());
    assert!(cluster.host(0).barrier().is_idle());
    let view = &cluster.registry.snapshots()[0];
    assert!(view.time_finished.is_some());
    let regions = view.tables.iter().find(|t| t.name == "REGIONS").unwrap();
    assert!(regions.last_error.as_deref().unwrap().contains("abandoned"));
}
