// ABOUTME: Library root for deployer - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod artifacts;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod monitor;
pub mod output;
pub mod runner;
pub mod ssh;
pub mod transport;
