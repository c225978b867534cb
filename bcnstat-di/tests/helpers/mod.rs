//! Test Helper Utilities
//!
//! Shared fixtures for bcnstat-di integration tests

pub mod fixtures;

// Re-export commonly used items; each test binary uses a different subset
#[allow(unused_imports)]
pub use fixtures::{
    cell_center, create_test_db, descriptor, fact_count, full_catalog, master_columns,
    master_value, test_config, write_dataset,
};
