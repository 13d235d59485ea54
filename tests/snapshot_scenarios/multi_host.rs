//! Saves spanning several hosts sharing one registry

use crate::common::*;
use shardsave::{HostId, ResultShape, TableFileReader, CNAME_HOST_ID};
use std::collections::BTreeSet;

#[test]
fn test_each_host_elects_its_own_leader() {
    let cluster = TestCluster::builder()
        .hosts(3)
        .sites_per_host(2)
        .catalog(partitioned_catalog())
        .build();

    let result = cluster.save("nightly", false);
    assert_eq!(result.shape(), Some(ResultShape::Node));
    // Three tables reported by the leader of each of three hosts.
    assert_eq!(result.row_count(), 9);
    assert!(!result.has_failure());
    let hosts: BTreeSet<i64> = (0..9)
        .map(|r| result.get_i64(r, CNAME_HOST_ID).unwrap())
        .collect();
    assert_eq!(hosts, BTreeSet::from([0, 1, 2]));

    assert!(cluster.drain().is_empty());

    let snapshots = cluster.registry.snapshots();
    assert_eq!(snapshots.len(), 3);
    let registered: BTreeSet<HostId> = snapshots.iter().map(|s| s.host_id).collect();
    assert_eq!(registered, BTreeSet::from([HostId(0), HostId(1), HostId(2)]));
    assert!(snapshots.iter().all(|s| s.time_finished.is_some()));

    for host in 0..3u32 {
        let file = cluster
            .path()
            .join(format!("nightly-ITEMS-host_{}.vpt", host));
        let table = TableFileReader::read(&file).unwrap();
        assert_eq!(table.header.host_id, host);
        assert_eq!(table.header.num_partitions, 6);
        assert_eq!(
            table.header.partition_ids,
            vec![host * 2, host * 2 + 1]
        );
        assert_eq!(table.row_count(), 20);
        assert!(cluster
            .path()
            .join(format!("nightly-host_{}.digest", host))
            .exists());
    }
}

#[test]
fn test_blocking_multi_host_returns_row_per_site() {
    let cluster = TestCluster::builder()
        .hosts(2)
        .sites_per_host(3)
        .catalog(partitioned_catalog())
        .build();
    let result = cluster.save("nightly", true);
    assert_eq!(result.shape(), Some(ResultShape::Site));
    assert_eq!(result.row_count(), 6);
    assert!(!result.has_failure());
    for host in 0..2 {
        assert!(!cluster.host(host).is_snapshotting());
        assert!(cluster.host(host).barrier().is_idle());
    }
}
