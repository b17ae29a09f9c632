//! Workflow integration tests
//!
//! Tests for complete workflows that exercise multiple commands
//! and validate end-to-end behavior.

pub mod config_commands;
pub mod run_lifecycle;
pub mod sweep_edge_cases;
