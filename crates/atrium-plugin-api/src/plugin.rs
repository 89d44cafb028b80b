//! Core plugin trait and types

use crate::context::PluginContext;
use crate::error::Result;
use crate::manifest::Manifest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Core plugin trait that all plugins must implement
///
/// An instance lives for one activation. The runtime drops it on
/// deactivation and builds a fresh one for the next lifecycle call.
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Identity of the running plugin
    fn info(&self) -> PluginInfo;

    /// Activate the plugin
    ///
    /// Register routes and event subscriptions here. Routes are mounted by
    /// the runtime after this returns successfully.
    async fn activate(&self, ctx: &mut PluginContext) -> Result<()>;

    /// Deactivate the plugin
    ///
    /// The plugin's routes are already unmounted when this is called.
    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }

    /// Called on install, before permissions are synchronized
    ///
    /// Default implementation runs the migrations in the plugin's
    /// `migrations/` directory.
    async fn on_install(&self, ctx: &mut PluginContext) -> Result<()> {
        ctx.run_migrations(None).await.map(|_| ())
    }

    /// Called on an uninstall that removes plugin data
    async fn on_uninstall(&self, _ctx: &mut PluginContext) -> Result<()> {
        Ok(())
    }
}

/// Plugin identity as reported by a live instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin id
    pub id: String,

    /// Display name
    pub name: String,

    /// Plugin version
    pub version: String,

    /// Plugin description
    #[serde(default)]
    pub description: String,

    /// Plugin author
    #[serde(default)]
    pub author: String,
}

impl From<&Manifest> for PluginInfo {
    fn from(manifest: &Manifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
        }
    }
}

/// Lifecycle state of a plugin as seen by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Cataloged, never installed or uninstalled
    Discovered,

    /// Installed but not running
    Installed,

    /// Running with routes mounted
    Active,

    /// Recorded in the registry but no longer discovered
    Missing,
}

impl LifecycleState {
    /// Derive the state from registry flags and catalog membership
    pub fn from_flags(cataloged: bool, is_installed: bool, is_active: bool) -> Self {
        match (cataloged, is_installed, is_active) {
            (_, _, true) => Self::Active,
            (false, _, false) => Self::Missing,
            (true, true, false) => Self::Installed,
            (true, false, false) => Self::Discovered,
        }
    }

    /// Check if the plugin is running
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Installed => write!(f, "installed"),
            Self::Active => write!(f, "active"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Builds a plugin instance from its manifest
pub type PluginConstructor = dyn Fn(&Manifest) -> Result<Arc<dyn Plugin>> + Send + Sync;

/// What an entry point resolves to
///
/// A module either exports a ready instance, shared by every load, or a
/// constructor invoked with the manifest on every load.
#[derive(Clone)]
pub enum EntryModule {
    /// Pre-built instance
    Instance(Arc<dyn Plugin>),

    /// Constructor called on every load
    Constructor(Arc<PluginConstructor>),
}

impl EntryModule {
    /// Module exporting an existing instance
    pub fn instance<P: Plugin + 'static>(plugin: P) -> Self {
        Self::Instance(Arc::new(plugin))
    }

    /// Module exporting a constructor
    pub fn constructor<F>(constructor: F) -> Self
    where
        F: Fn(&Manifest) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        Self::Constructor(Arc::new(constructor))
    }

    /// Produce the plugin instance for one load
    pub fn instantiate(&self, manifest: &Manifest) -> Result<Arc<dyn Plugin>> {
        match self {
            Self::Instance(plugin) => Ok(Arc::clone(plugin)),
            Self::Constructor(constructor) => constructor(manifest),
        }
    }
}

impl fmt::Debug for EntryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(plugin) => f.debug_tuple("Instance").field(plugin).finish(),
            Self::Constructor(_) => f.write_str("Constructor(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Noop(String);

    #[async_trait]
    impl Plugin for Noop {
        fn info(&self) -> PluginInfo {
            PluginInfo {
                id: self.0.clone(),
                name: self.0.clone(),
                version: "1.0.0".to_string(),
                description: String::new(),
                author: String::new(),
            }
        }

        async fn activate(&self, _ctx: &mut PluginContext) -> Result<()> {
            Ok(())
        }
    }

    fn manifest(id: &str) -> Manifest {
        Manifest::from_value(serde_json::json!({
            "id": id,
            "name": "Noop",
            "version": "1.0.0",
            "entryPoint": "index",
        }))
        .unwrap()
    }

    #[test]
    fn test_instance_module_shares_instance() {
        let module = EntryModule::instance(Noop("noop".to_string()));
        let a = module.instantiate(&manifest("noop")).unwrap();
        let b = module.instantiate(&manifest("noop")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_constructor_module_builds_fresh_instances() {
        let module = EntryModule::constructor(|m: &Manifest| {
            Ok(Arc::new(Noop(m.id.clone())) as Arc<dyn Plugin>)
        });
        let a = module.instantiate(&manifest("first")).unwrap();
        let b = module.instantiate(&manifest("first")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.info().id, "first");
    }

    #[test]
    fn test_info_from_manifest() {
        let info = PluginInfo::from(&manifest("noop"));
        assert_eq!(info.id, "noop");
        assert_eq!(info.version, "1.0.0");
    }

    #[test]
    fn test_lifecycle_state() {
        assert_eq!(LifecycleState::from_flags(true, false, false), LifecycleState::Discovered);
        assert_eq!(LifecycleState::from_flags(true, true, false), LifecycleState::Installed);
        assert_eq!(LifecycleState::from_flags(true, true, true), LifecycleState::Active);
        assert_eq!(LifecycleState::from_flags(false, true, false), LifecycleState::Missing);
        assert!(LifecycleState::Active.is_active());
        assert_eq!(LifecycleState::Installed.to_string(), "installed");
    }
}
