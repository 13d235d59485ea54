//! Parameter validation happens before any distributed work

use crate::common::*;
use shardsave::{ResultShape, CNAME_ERR_MSG};

#[test]
fn test_empty_nonce_rejected_without_side_effects() {
    let cluster = TestCluster::builder().build();
    let result = cluster.save("", false);

    assert_eq!(result.shape(), Some(ResultShape::ErrorMessage));
    assert_eq!(
        result.get_string(0, CNAME_ERR_MSG),
        Some("Provided nonce was null or the empty string")
    );
    assert!(cluster.registry.snapshots().is_empty());
    assert!(cluster.file_names().is_empty());
    assert!(cluster.host(0).barrier().is_idle());
}

#[test]
fn test_empty_path_rejected() {
    let cluster = TestCluster::builder().build();
    let result = cluster.save.save("", "nightly", true);
    assert_eq!(
        result.get_string(0, CNAME_ERR_MSG),
        Some("Provided path was null or the empty string")
    );
    assert!(cluster.registry.snapshots().is_empty());
}

#[test]
fn test_nonce_with_delimiter_rejected() {
    let cluster = TestCluster::builder().build();
    for nonce in ["nightly-1", "a,b"] {
        let result = cluster.save(nonce, true);
        assert_eq!(result.shape(), Some(ResultShape::ErrorMessage));
        assert!(result
            .get_string(0, CNAME_ERR_MSG)
            .unwrap()
            .contains("prohibited character"));
    }
    assert!(cluster.file_names().is_empty());
}
