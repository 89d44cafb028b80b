//! Per-plugin SQL migration runner

use crate::error::{PluginError, Result};
use atrium_store::PluginStore;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name, relative to the plugin root, searched by default
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// File extension of migration scripts
pub const MIGRATION_EXTENSION: &str = "sql";

/// Applies a plugin's migration scripts exactly once each
///
/// Scripts run in lexical file-name order. A script that fails halts the
/// batch; scripts after it are left for the next run.
#[derive(Debug)]
pub struct MigrationRunner<'a> {
    plugin_id: &'a str,
    store: &'a dyn PluginStore,
}

impl<'a> MigrationRunner<'a> {
    /// Create a runner for one plugin
    pub fn new(plugin_id: &'a str, store: &'a dyn PluginStore) -> Self {
        Self { plugin_id, store }
    }

    /// Apply every unseen script in `dir`, returning the names applied
    ///
    /// A missing directory is an empty batch.
    pub async fn run(&self, dir: &Path) -> Result<Vec<String>> {
        let scripts = list_scripts(dir).await?;
        let mut applied = Vec::new();

        for (name, path) in scripts {
            if self.is_applied(&name).await? {
                debug!(plugin = self.plugin_id, migration = %name, "Migration already applied");
                continue;
            }

            let script = tokio::fs::read_to_string(&path).await?;

            self.store
                .execute_script(&script)
                .await
                .map_err(|source| PluginError::MigrationFailed {
                    migration: name.clone(),
                    source,
                })?;

            self.store.record_migration(self.plugin_id, &name).await?;

            info!(plugin = self.plugin_id, migration = %name, "Migration applied");
            applied.push(name);
        }

        Ok(applied)
    }

    async fn is_applied(&self, name: &str) -> Result<bool> {
        match self.store.is_migration_applied(self.plugin_id, name).await {
            Ok(applied) => Ok(applied),
            // Bookkeeping table not created yet: nothing has been applied
            Err(e) if e.is_missing_table() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// List `*.sql` files in `dir`, sorted by file name
async fn list_scripts(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "No migrations directory");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut scripts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(MIGRATION_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            scripts.push((name.to_string(), path.clone()));
        }
    }

    scripts.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_store::{InMemoryStore, SqliteStore};

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_runs_scripts_in_lexical_order_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "002_second.sql", "-- second");
        write(dir.path(), "001_first.sql", "-- first");
        write(dir.path(), "README.md", "not a migration");

        let store = InMemoryStore::new();
        store.ensure_schema().await.unwrap();
        let runner = MigrationRunner::new("hello-world", &store);

        let applied = runner.run(dir.path()).await.unwrap();
        assert_eq!(applied, vec!["001_first.sql", "002_second.sql"]);

        let again = runner.run(dir.path()).await.unwrap();
        assert!(again.is_empty());

        assert_eq!(store.executed_scripts(), vec!["-- first", "-- second"]);
        assert_eq!(store.list_migrations("hello-world").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let runner = MigrationRunner::new("hello-world", &store);

        let applied = runner.run(&dir.path().join("missing")).await.unwrap();
        assert!(applied.is_empty());
    }

    #[tokio::test]
    async fn test_failing_script_halts_batch() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "001_create.sql",
            "CREATE TABLE hw_greetings (id INTEGER PRIMARY KEY, text TEXT NOT NULL);",
        );
        write(dir.path(), "002_broken.sql", "CREATE TABLE oops (");
        write(
            dir.path(),
            "003_seed.sql",
            "INSERT INTO hw_greetings (text) VALUES ('hello');",
        );

        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        store.ensure_schema().await.unwrap();
        let runner = MigrationRunner::new("hello-world", &store);

        let err = runner.run(dir.path()).await.unwrap_err();
        match err {
            PluginError::MigrationFailed { migration, .. } => {
                assert_eq!(migration, "002_broken.sql");
            }
            other => panic!("unexpected error: {other}"),
        }

        let recorded = store.list_migrations("hello-world").await.unwrap();
        let names: Vec<_> = recorded.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["001_create.sql"]);
    }

    #[tokio::test]
    async fn test_missing_bookkeeping_table_means_none_applied() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001_first.sql", "-- first");

        // Schema never created: the lookup is tolerated, recording is not
        let store = InMemoryStore::new();
        let runner = MigrationRunner::new("hello-world", &store);

        let err = runner.run(dir.path()).await.unwrap_err();
        assert!(matches!(err, PluginError::Store(ref e) if e.is_missing_table()));
        assert_eq!(store.executed_scripts().len(), 1);
    }
}
