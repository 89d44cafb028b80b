//! # Atrium Plugin Runtime
//!
//! Discovery and lifecycle management for Atrium plugins.
//!
//! ## Features
//!
//! - **Plugin Loader**: scans plugin roots, validates manifests, builds the catalog
//! - **Module Table**: resolves manifest entry points to compiled plugin modules
//! - **Plugin Manager**: install, activate, deactivate and uninstall with a durable registry
//! - **Catalog Watcher**: re-runs discovery when manifests change on disk
//!
//! ## Example
//!
//! ```rust,no_run
//! use atrium_plugin_runtime::*;
//! use atrium_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let modules = ModuleTable::new();
//! // modules.register("hello_world", hello_world::module());
//!
//! let loader = PluginLoader::new(LoaderConfig::local("plugins"), modules);
//! let manager = Arc::new(PluginManager::new(loader, Arc::new(InMemoryStore::new())));
//!
//! manager.initialize().await?;
//! manager.install("hello-world").await?;
//! manager.activate("hello-world", serde_json::json!({})).await?;
//!
//! // Serve manager.router() alongside the host's own routes
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod loader;
pub mod manager;
pub mod modules;
pub mod watcher;

pub use error::{PluginRuntimeError, Result};
pub use loader::{
    DiscoveryReport, LoadedPlugin, LoaderConfig, PluginDescriptor, PluginLoader, PluginOrigin,
};
pub use manager::{Activation, InitializeReport, PluginManager, PluginStatus};
pub use modules::ModuleTable;
pub use watcher::{CatalogWatcher, WatchHandle};

// Re-export plugin API types for convenience
pub use atrium_plugin_api::{
    topics, EntryModule, EventHub, LifecycleState, Manifest, Plugin, PluginContext, PluginError,
    PluginInfo,
};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::error::{PluginRuntimeError, Result};
    pub use crate::loader::{LoaderConfig, PluginLoader};
    pub use crate::manager::{Activation, PluginManager, PluginStatus};
    pub use crate::modules::ModuleTable;
    pub use atrium_plugin_api::prelude::*;
}
