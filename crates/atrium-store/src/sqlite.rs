//! SQLite plugin store implementation

use crate::{Error, MigrationRecord, PermissionRecord, PluginStore, RegistryRecord, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, trace};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plugin_registry (
    plugin_id TEXT PRIMARY KEY,
    is_installed BOOLEAN NOT NULL DEFAULT 0,
    is_active BOOLEAN NOT NULL DEFAULT 0,
    config TEXT NOT NULL DEFAULT '{}',
    installed_at TEXT,
    activated_at TEXT,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS plugin_migrations (
    plugin_id TEXT NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    PRIMARY KEY (plugin_id, name)
);

CREATE TABLE IF NOT EXISTS plugin_permissions (
    plugin_id TEXT NOT NULL,
    permission_key TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (plugin_id, permission_key)
);
"#;

/// SQLite plugin store
///
/// Durable registry backed by a `sqlx` connection pool. The pool is shared by
/// the manager and by every plugin's migration runner.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqliteStore {
    /// Connect to a SQLite database
    ///
    /// The schema is not created here; call [`PluginStore::ensure_schema`].
    /// In-memory databases are pinned to a single long-lived connection so
    /// every query sees the same database.
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?
            .create_if_missing(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(pool_size.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        debug!(url, in_memory, "SQLite store connected");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn record_from_row(row: &SqliteRow) -> Result<RegistryRecord> {
        let config: String = row.try_get("config")?;
        Ok(RegistryRecord {
            plugin_id: row.try_get("plugin_id")?,
            is_installed: row.try_get("is_installed")?,
            is_active: row.try_get("is_active")?,
            config: serde_json::from_str(&config)?,
            installed_at: row.try_get::<Option<DateTime<Utc>>, _>("installed_at")?,
            activated_at: row.try_get::<Option<DateTime<Utc>>, _>("activated_at")?,
        })
    }
}

#[async_trait]
impl PluginStore for SqliteStore {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Plugin registry schema initialized");
        Ok(())
    }

    async fn get_record(&self, plugin_id: &str) -> Result<Option<RegistryRecord>> {
        trace!(plugin = plugin_id, "SQLite GET record");

        let row = sqlx::query(
            "SELECT plugin_id, is_installed, is_active, config, installed_at, activated_at \
             FROM plugin_registry WHERE plugin_id = ?",
        )
        .bind(plugin_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_records(&self) -> Result<Vec<RegistryRecord>> {
        let rows = sqlx::query(
            "SELECT plugin_id, is_installed, is_active, config, installed_at, activated_at \
             FROM plugin_registry ORDER BY plugin_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn upsert_record(&self, record: &RegistryRecord) -> Result<()> {
        trace!(plugin = %record.plugin_id, "SQLite UPSERT record");

        let config = serde_json::to_string(&record.config)?;

        sqlx::query(
            r#"
            INSERT INTO plugin_registry
                (plugin_id, is_installed, is_active, config, installed_at, activated_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (plugin_id) DO UPDATE
            SET is_installed = excluded.is_installed,
                is_active = excluded.is_active,
                config = excluded.config,
                installed_at = excluded.installed_at,
                activated_at = excluded.activated_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&record.plugin_id)
        .bind(record.is_installed)
        .bind(record.is_active)
        .bind(config)
        .bind(record.installed_at)
        .bind(record.activated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_migration_applied(&self, plugin_id: &str, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM plugin_migrations WHERE plugin_id = ? AND name = ?")
            .bind(plugin_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn record_migration(&self, plugin_id: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO plugin_migrations (plugin_id, name, applied_at) VALUES (?, ?, ?) \
             ON CONFLICT (plugin_id, name) DO NOTHING",
        )
        .bind(plugin_id)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_migrations(&self, plugin_id: &str) -> Result<Vec<MigrationRecord>> {
        let rows = sqlx::query(
            "SELECT plugin_id, name, applied_at FROM plugin_migrations \
             WHERE plugin_id = ? ORDER BY name",
        )
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MigrationRecord {
                    plugin_id: row.try_get("plugin_id")?,
                    name: row.try_get("name")?,
                    applied_at: row.try_get("applied_at")?,
                })
            })
            .collect()
    }

    async fn delete_migrations(&self, plugin_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM plugin_migrations WHERE plugin_id = ?")
            .bind(plugin_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn sync_permissions(
        &self,
        plugin_id: &str,
        permissions: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM plugin_permissions WHERE plugin_id = ?")
            .bind(plugin_id)
            .execute(&mut *tx)
            .await?;

        for (key, description) in permissions {
            sqlx::query(
                "INSERT INTO plugin_permissions (plugin_id, permission_key, description) \
                 VALUES (?, ?, ?)",
            )
            .bind(plugin_id)
            .bind(key)
            .bind(description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(plugin = plugin_id, count = permissions.len(), "Permissions synchronized");

        Ok(())
    }

    async fn list_permissions(&self, plugin_id: &str) -> Result<Vec<PermissionRecord>> {
        let rows = sqlx::query(
            "SELECT plugin_id, permission_key, description FROM plugin_permissions \
             WHERE plugin_id = ? ORDER BY permission_key",
        )
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PermissionRecord {
                    plugin_id: row.try_get("plugin_id")?,
                    key: row.try_get("permission_key")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    async fn delete_permissions(&self, plugin_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM plugin_permissions WHERE plugin_id = ?")
            .bind(plugin_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn execute_script(&self, script: &str) -> Result<()> {
        trace!(bytes = script.len(), "SQLite EXECUTE script");

        sqlx::raw_sql(script)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Script(e.to_string()))?;

        Ok(())
    }
}
