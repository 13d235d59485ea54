//! Snapshot Save Scenario Tests
//!
//! End-to-end saves through an in-process cluster: validation, the
//! feasibility phase, target creation, blocking and non-blocking completion,
//! and repeated saves on the same hosts.

#[path = "../common/mod.rs"]
mod common;

mod blocking;
mod feasibility;
mod multi_host;
mod non_blocking;
mod repeated_saves;
mod validation;
