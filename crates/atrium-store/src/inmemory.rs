//! In-memory plugin store implementation

use crate::{Error, MigrationRecord, PermissionRecord, PluginStore, RegistryRecord, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
struct Tables {
    schema_ready: bool,
    records: BTreeMap<String, RegistryRecord>,
    migrations: BTreeMap<(String, String), MigrationRecord>,
    permissions: BTreeMap<(String, String), PermissionRecord>,
    scripts: Vec<String>,
}

/// In-memory plugin store
///
/// Single-process only; nothing survives a restart. Scripts handed to
/// [`PluginStore::execute_script`] are recorded rather than interpreted, which
/// makes the backend useful for exercising migration bookkeeping in tests.
///
/// Like a SQL backend, migration lookups fail with
/// [`Error::MissingTable`] until [`PluginStore::ensure_schema`] has run.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts executed so far, in execution order
    pub fn executed_scripts(&self) -> Vec<String> {
        self.tables.read().scripts.clone()
    }

    fn require_schema(tables: &Tables, table: &str) -> Result<()> {
        if tables.schema_ready {
            Ok(())
        } else {
            Err(Error::MissingTable(table.to_string()))
        }
    }
}

#[async_trait]
impl PluginStore for InMemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.tables.write().schema_ready = true;
        Ok(())
    }

    async fn get_record(&self, plugin_id: &str) -> Result<Option<RegistryRecord>> {
        let tables = self.tables.read();
        Self::require_schema(&tables, "plugin_registry")?;
        Ok(tables.records.get(plugin_id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<RegistryRecord>> {
        let tables = self.tables.read();
        Self::require_schema(&tables, "plugin_registry")?;
        Ok(tables.records.values().cloned().collect())
    }

    async fn upsert_record(&self, record: &RegistryRecord) -> Result<()> {
        trace!(plugin = %record.plugin_id, "InMemory UPSERT record");
        let mut tables = self.tables.write();
        Self::require_schema(&tables, "plugin_registry")?;
        tables
            .records
            .insert(record.plugin_id.clone(), record.clone());
        Ok(())
    }

    async fn is_migration_applied(&self, plugin_id: &str, name: &str) -> Result<bool> {
        let tables = self.tables.read();
        Self::require_schema(&tables, "plugin_migrations")?;
        Ok(tables
            .migrations
            .contains_key(&(plugin_id.to_string(), name.to_string())))
    }

    async fn record_migration(&self, plugin_id: &str, name: &str) -> Result<()> {
        let mut tables = self.tables.write();
        Self::require_schema(&tables, "plugin_migrations")?;
        tables
            .migrations
            .entry((plugin_id.to_string(), name.to_string()))
            .or_insert_with(|| MigrationRecord {
                plugin_id: plugin_id.to_string(),
                name: name.to_string(),
                applied_at: Utc::now(),
            });
        Ok(())
    }

    async fn list_migrations(&self, plugin_id: &str) -> Result<Vec<MigrationRecord>> {
        let tables = self.tables.read();
        Self::require_schema(&tables, "plugin_migrations")?;
        Ok(tables
            .migrations
            .values()
            .filter(|m| m.plugin_id == plugin_id)
            .cloned()
            .collect())
    }

    async fn delete_migrations(&self, plugin_id: &str) -> Result<u64> {
        let mut tables = self.tables.write();
        Self::require_schema(&tables, "plugin_migrations")?;
        let before = tables.migrations.len();
        tables.migrations.retain(|(id, _), _| id != plugin_id);
        Ok((before - tables.migrations.len()) as u64)
    }

    async fn sync_permissions(
        &self,
        plugin_id: &str,
        permissions: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        Self::require_schema(&tables, "plugin_permissions")?;
        tables.permissions.retain(|(id, _), _| id != plugin_id);
        for (key, description) in permissions {
            tables.permissions.insert(
                (plugin_id.to_string(), key.clone()),
                PermissionRecord {
                    plugin_id: plugin_id.to_string(),
                    key: key.clone(),
                    description: description.clone(),
                },
            );
        }
        Ok(())
    }

    async fn list_permissions(&self, plugin_id: &str) -> Result<Vec<PermissionRecord>> {
        let tables = self.tables.read();
        Self::require_schema(&tables, "plugin_permissions")?;
        Ok(tables
            .permissions
            .values()
            .filter(|p| p.plugin_id == plugin_id)
            .cloned()
            .collect())
    }

    async fn delete_permissions(&self, plugin_id: &str) -> Result<u64> {
        let mut tables = self.tables.write();
        Self::require_schema(&tables, "plugin_permissions")?;
        let before = tables.permissions.len();
        tables.permissions.retain(|(id, _), _| id != plugin_id);
        Ok((before - tables.permissions.len()) as u64)
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        trace!(bytes = script.len(), "InMemory EXECUTE script");
        self.tables.write().scripts.push(script.to_string());
        Ok(())
    }
}
