//! # Atrium Plugin API
//!
//! This crate provides the SDK for writing Atrium plugins.
//!
//! ## Building blocks
//!
//! - **Manifest**: the `plugin.json` (or YAML/TOML) descriptor and its validator
//! - **Plugin**: the lifecycle trait every plugin implements
//! - **PluginContext**: per-activation handle for routes, config, logging and migrations
//! - **EventHub**: process-wide publish/subscribe bus
//! - **RouteTable**: dispatch from `/api/plugins/{id}` into mounted routers
//!
//! ## Example
//!
//! ```rust,no_run
//! use atrium_plugin_api::prelude::*;
//!
//! #[derive(Debug)]
//! struct Greeter;
//!
//! #[async_trait]
//! impl Plugin for Greeter {
//!     fn info(&self) -> PluginInfo {
//!         PluginInfo {
//!             id: "greeter".into(),
//!             name: "Greeter".into(),
//!             version: "1.0.0".into(),
//!             description: String::new(),
//!             author: String::new(),
//!         }
//!     }
//!
//!     async fn activate(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
//!         let greeting: String = ctx.config("greeting", "Hello".to_string());
//!         ctx.register_route("GET", "/hello", move || async move { greeting })?;
//!         Ok(())
//!     }
//! }
//!
//! pub fn module() -> EntryModule {
//!     EntryModule::instance(Greeter)
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod error;
pub mod events;
pub mod manifest;
pub mod migrations;
pub mod plugin;
pub mod routes;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used types
pub use context::{HostServices, PluginContext, PluginLogger};
pub use error::{PluginError, Result};
pub use events::{
    topics, EmitReport, Event, EventHub, HandlerError, HandlerResult, Subscription,
    SubscriptionId,
};
pub use manifest::{
    ConfigOption, ConfigType, Manifest, ManifestError, ManifestFormat, ManifestValidator,
    MenuDescriptor,
};
pub use migrations::MigrationRunner;
pub use plugin::{EntryModule, LifecycleState, Plugin, PluginConstructor, PluginInfo};
pub use routes::{OrgScope, RouteEntry, RouteMethod, RouteTable};

// Store handle plugins receive through their context
pub use atrium_store::PluginStore;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::context::{PluginContext, PluginLogger};
    pub use crate::error::PluginError;
    pub use crate::events::{Event, EventHub, HandlerResult};
    pub use crate::manifest::Manifest;
    pub use crate::plugin::{EntryModule, Plugin, PluginInfo};
    pub use crate::routes::OrgScope;
    pub use atrium_store::PluginStore;
    pub use async_trait::async_trait;
}
