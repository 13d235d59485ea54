//! Phase A outcomes

use crate::common::*;
use shardsave::layers::durability::testing::MemoryTargetFactory;
use shardsave::layers::engine::{aggregate_feasibility, SnapshotFragment};
use shardsave::{FragmentDispatcher, ResultShape, CNAME_ERR_MSG, CNAME_RESULT, CNAME_TABLE};
use std::sync::Arc;

#[test]
fn test_existing_file_fails_and_skips_creation() {
    let factory = Arc::new(MemoryTargetFactory::new());
    let cluster = TestCluster::builder().memory_targets(factory.clone()).build();
    std::fs::write(cluster.path().join("nightly-REGIONS.vpt"), b"previous").unwrap();

    let result = cluster.save("nightly", true);

    assert_eq!(result.shape(), Some(ResultShape::Node));
    assert_eq!(result.row_count(), 2);
    let regions = (0..2)
        .find(|&r| result.get_string(r, CNAME_TABLE) == Some("REGIONS"))
        .unwrap();
    assert_eq!(result.get_string(regions, CNAME_RESULT), Some("FAILURE"));
    assert!(result
        .get_string(regions, CNAME_ERR_MSG)
        .unwrap()
        .starts_with("SAVE FILE ALREADY EXISTS: "));

    assert!(factory.created_tables().is_empty());
    assert!(cluster.registry.snapshots().is_empty());
    assert!(!cluster.path().join("nightly-host_0.digest").exists());
    assert_eq!(
        std::fs::read(cluster.path().join("nightly-REGIONS.vpt")).unwrap(),
        b"previous"
    );
}

#[test]
fn test_missing_directory_is_unwritable() {
    let cluster = TestCluster::builder().build();
    let missing = cluster.path().join("not").join("there");
    let result = cluster
        .save
        .save(&missing.to_string_lossy(), "nightly", false);

    assert_eq!(result.row_count(), 2);
    for row in 0..2 {
        assert!(result
            .get_string(row, CNAME_ERR_MSG)
            .unwrap()
            .starts_with("FILE LOCATION UNWRITABLE: "));
    }
    assert!(cluster.registry.snapshots().is_empty());
}

#[test]
fn test_feasibility_reports_once_per_host() {
    let cluster = TestCluster::builder().sites_per_host(4).build();
    let fragment = SnapshotFragment::SaveFeasibility {
        path: cluster.path().to_path_buf(),
        nonce: "nightly".to_string(),
    };
    let per_site = cluster.cluster().dispatch(&fragment);

    assert_eq!(per_site.len(), 4);
    assert_eq!(per_site.iter().filter(|t| !t.is_empty()).count(), 1);
    let merged = aggregate_feasibility(&per_site).unwrap();
    assert_eq!(merged.row_count(), 2);
    assert!(!merged.has_failure());
    assert_eq!(
        cluster.file_names(),
        vec!["nightly-ORDERS-host_0.vpt", "nightly-REGIONS.vpt"]
    );
}
