//! Critical test matrix: state integrity, data integrity, disk exhaustion and
//! interrupted runs.
//!
//! Run with: `cargo test --test critical`

mod support;

#[path = "critical/corrupted_state.rs"]
mod corrupted_state;
#[path = "critical/data_corruption.rs"]
mod data_corruption;
#[path = "critical/disk_space_failures.rs"]
mod disk_space_failures;
#[path = "critical/interrupted_operations.rs"]
mod interrupted_operations;
