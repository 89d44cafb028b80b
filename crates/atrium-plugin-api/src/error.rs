//! Plugin error types

use std::fmt;

/// Plugin error type
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Route registration used a verb outside the supported set
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Route path is not usable inside a plugin namespace
    #[error("Invalid route path: {0}")]
    InvalidRoute(String),

    /// The same method and path were registered twice
    #[error("Route already registered: {method} {path}")]
    DuplicateRoute {
        /// HTTP method
        method: String,
        /// Route path
        path: String,
    },

    /// A migration script failed; the remaining scripts were not run
    #[error("Migration {migration} failed: {source}")]
    MigrationFailed {
        /// Migration file name
        migration: String,
        /// Underlying store error
        #[source]
        source: atrium_store::Error,
    },

    /// Activation failed
    #[error("Activation failed: {0}")]
    ActivationError(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] atrium_store::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    /// Create a new invalid method error
    pub fn invalid_method(method: impl fmt::Display) -> Self {
        Self::InvalidMethod(method.to_string())
    }

    /// Create a new invalid route error
    pub fn invalid_route(msg: impl fmt::Display) -> Self {
        Self::InvalidRoute(msg.to_string())
    }

    /// Create a new activation error
    pub fn activation(msg: impl fmt::Display) -> Self {
        Self::ActivationError(msg.to_string())
    }
}
