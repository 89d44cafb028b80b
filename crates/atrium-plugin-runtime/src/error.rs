//! Plugin runtime error types

use atrium_plugin_api::{ManifestError, PluginError};
use std::fmt;
use std::path::PathBuf;

/// Plugin runtime error type
#[derive(Debug, thiserror::Error)]
pub enum PluginRuntimeError {
    /// Plugin id is not in the catalog (or, for status, not recorded either)
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// Deactivation of a plugin that is not running
    #[error("Plugin not active: {0}")]
    NotActive(String),

    /// Manifest failed validation; the plugin was not cataloged
    #[error("Invalid manifest {}: {source}", path.display())]
    ManifestInvalid {
        /// Manifest file
        path: PathBuf,
        /// Violations found
        #[source]
        source: ManifestError,
    },

    /// A second plugin claimed an id already in the catalog
    #[error("Duplicate plugin {id} at {}: already discovered at {}", path.display(), existing.display())]
    DuplicatePlugin {
        /// Plugin id
        id: String,
        /// Rejected location
        path: PathBuf,
        /// Location that won
        existing: PathBuf,
    },

    /// No module is registered for the manifest's entry point
    #[error("Entry point {entry_point} of plugin {plugin} is not registered")]
    EntryPointUnresolved {
        /// Plugin id
        plugin: String,
        /// Entry point from the manifest
        entry_point: String,
    },

    /// A declared dependency is not cataloged or not installed
    #[error("Plugin {plugin} depends on {dependency}, which is not installed")]
    DependencyMissing {
        /// Dependent plugin
        plugin: String,
        /// Missing dependency
        dependency: String,
    },

    /// A declared dependency is not running
    #[error("Plugin {plugin} depends on {dependency}, which is not active")]
    DependencyNotActive {
        /// Dependent plugin
        plugin: String,
        /// Inactive dependency
        dependency: String,
    },

    /// Dependency cycle detected
    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// Error raised by plugin code or the plugin SDK
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] atrium_store::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type for plugin runtime operations
pub type Result<T> = std::result::Result<T, PluginRuntimeError>;

impl PluginRuntimeError {
    /// Create a new plugin not found error
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Create a new not active error
    pub fn not_active(id: impl fmt::Display) -> Self {
        Self::NotActive(id.to_string())
    }

    /// Create a new dependency missing error
    pub fn dependency_missing(plugin: impl fmt::Display, dependency: impl fmt::Display) -> Self {
        Self::DependencyMissing {
            plugin: plugin.to_string(),
            dependency: dependency.to_string(),
        }
    }

    /// Create a new dependency not active error
    pub fn dependency_not_active(plugin: impl fmt::Display, dependency: impl fmt::Display) -> Self {
        Self::DependencyNotActive {
            plugin: plugin.to_string(),
            dependency: dependency.to_string(),
        }
    }

    /// Create a new dependency cycle error
    pub fn dependency_cycle(msg: impl fmt::Display) -> Self {
        Self::DependencyCycle(msg.to_string())
    }

    /// Create a new other error
    pub fn other(msg: impl fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }

    /// Whether the error names an unknown plugin
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the error is a dependency violation
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Self::DependencyMissing { .. } | Self::DependencyNotActive { .. } | Self::DependencyCycle(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PluginRuntimeError::not_found("hello-world");
        assert!(err.is_not_found());

        let err = PluginRuntimeError::dependency_missing("reports", "payroll");
        assert!(err.is_dependency_error());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = PluginRuntimeError::NotActive("hello-world".to_string());
        assert_eq!(err.to_string(), "Plugin not active: hello-world");

        let err = PluginRuntimeError::dependency_not_active("reports", "payroll");
        assert_eq!(
            err.to_string(),
            "Plugin reports depends on payroll, which is not active"
        );
    }

    #[test]
    fn test_plugin_error_conversion() {
        let err: PluginRuntimeError = PluginError::invalid_method("TRACE").into();
        assert!(matches!(err, PluginRuntimeError::Plugin(PluginError::InvalidMethod(_))));
    }
}
