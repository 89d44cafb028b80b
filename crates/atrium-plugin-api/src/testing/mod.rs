//! Testing utilities for plugin developers
//!
//! Enabled with the `testing` feature.

pub mod helpers;
pub mod mocks;

pub use helpers::{in_memory_services, PluginTestHarness};
pub use mocks::MockPlugin;
