//! Entry point resolution
//!
//! Plugins are compiled into the host. Each plugin crate exports an
//! [`EntryModule`]; the host registers it here under the `entryPoint` string
//! its manifest declares.

use atrium_plugin_api::EntryModule;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Table from manifest entry points to plugin modules
#[derive(Clone, Default)]
pub struct ModuleTable {
    modules: Arc<DashMap<String, EntryModule>>,
}

impl fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleTable")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

impl ModuleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Returns the module it replaced, if any.
    pub fn register(&self, entry_point: impl Into<String>, module: EntryModule) -> Option<EntryModule> {
        let entry_point = entry_point.into();
        debug!(entry_point = %entry_point, "Plugin module registered");
        self.modules.insert(entry_point, module)
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(self, entry_point: impl Into<String>, module: EntryModule) -> Self {
        self.register(entry_point, module);
        self
    }

    /// Look up the module for an entry point
    pub fn resolve(&self, entry_point: &str) -> Option<EntryModule> {
        self.modules.get(entry_point).map(|m| m.value().clone())
    }

    /// Registered entry points, sorted
    pub fn entry_points(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
