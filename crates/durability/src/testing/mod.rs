//! Testing utilities for snapshot targets
//!
//! This module provides in-memory stand-ins for the file layer:
//!
//! - **MemoryTarget**: Records row blocks in memory and counts closes
//! - **MemoryTargetFactory**: Builds memory targets, with per-table fault
//!   injection for creation failures, write failures and panics
//!
//! # Example
//!
//! ```ignore
//! use shardsave_durability::testing::MemoryTargetFactory;
//!
//! let factory = MemoryTargetFactory::new()
//!     .fail_create_for("AUDIT")
//!     .fail_writes_for("ORDERS");
//! ```

mod memory;

pub use memory::{MemoryTarget, MemoryTargetFactory};
