//! Plugin store trait and persisted record types

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Durable lifecycle state for one plugin id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Plugin id
    pub plugin_id: String,

    /// Whether the plugin is installed
    pub is_installed: bool,

    /// Whether the plugin should be active
    pub is_active: bool,

    /// Last applied configuration
    pub config: serde_json::Value,

    /// When the plugin was last installed
    pub installed_at: Option<DateTime<Utc>>,

    /// When the plugin was last activated
    pub activated_at: Option<DateTime<Utc>>,
}

impl RegistryRecord {
    /// Create a record for a plugin that has never been installed
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            is_installed: false,
            is_active: false,
            config: serde_json::Value::Object(serde_json::Map::new()),
            installed_at: None,
            activated_at: None,
        }
    }
}

/// Marks one migration script as applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Plugin id
    pub plugin_id: String,

    /// Migration file name
    pub name: String,

    /// When it was applied
    pub applied_at: DateTime<Utc>,
}

/// A permission a plugin declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Plugin id
    pub plugin_id: String,

    /// Permission key
    pub key: String,

    /// Human readable description
    pub description: String,
}

/// Plugin store trait
///
/// Backs the plugin registry, migration bookkeeping and permission tables.
/// The handle is shared by the manager and every plugin context.
#[async_trait]
pub trait PluginStore: Send + Sync + fmt::Debug + 'static {
    /// Create the registry, migration and permission tables if they are missing
    async fn ensure_schema(&self) -> Result<()>;

    /// Fetch the registry record for a plugin
    async fn get_record(&self, plugin_id: &str) -> Result<Option<RegistryRecord>>;

    /// List every registry record
    async fn list_records(&self) -> Result<Vec<RegistryRecord>>;

    /// Insert or replace a registry record (last writer wins)
    async fn upsert_record(&self, record: &RegistryRecord) -> Result<()>;

    /// Whether a migration was already applied
    ///
    /// Returns [`Error::MissingTable`](crate::Error::MissingTable) if the
    /// migration table has not been created yet.
    async fn is_migration_applied(&self, plugin_id: &str, name: &str) -> Result<bool>;

    /// Record a migration as applied. Recording twice is a no-op.
    async fn record_migration(&self, plugin_id: &str, name: &str) -> Result<()>;

    /// List applied migrations for a plugin, ordered by name
    async fn list_migrations(&self, plugin_id: &str) -> Result<Vec<MigrationRecord>>;

    /// Delete every migration record of a plugin, returning the count removed
    async fn delete_migrations(&self, plugin_id: &str) -> Result<u64>;

    /// Replace the permission set of a plugin
    async fn sync_permissions(
        &self,
        plugin_id: &str,
        permissions: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// List permissions of a plugin, ordered by key
    async fn list_permissions(&self, plugin_id: &str) -> Result<Vec<PermissionRecord>>;

    /// Delete every permission of a plugin, returning the count removed
    async fn delete_permissions(&self, plugin_id: &str) -> Result<u64>;

    /// Execute a migration script against the backing database
    async fn execute_script(&self, script: &str) -> Result<()>;

    /// Health check - verify backend is reachable
    async fn health_check(&self) -> Result<()> {
        self.list_records().await.map(|_| ())
    }
}
