//! Catalog refresh on manifest changes
//!
//! Watches the loader's scan roots and re-runs discovery when a manifest
//! file is created, modified or removed. Running plugins are not touched;
//! changes take effect on the next lifecycle call.

use crate::error::{PluginRuntimeError, Result};
use crate::manager::PluginManager;
use atrium_plugin_api::manifest::MANIFEST_FILE_NAMES;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default quiet period before a refresh
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches plugin roots and refreshes the catalog
#[derive(Debug)]
pub struct CatalogWatcher {
    manager: Arc<PluginManager>,
    roots: Vec<PathBuf>,
    debounce: Duration,
}

impl CatalogWatcher {
    /// Watch the roots the manager's loader scans
    pub fn new(manager: Arc<PluginManager>) -> Self {
        let config = manager.loader().config();
        let mut roots = vec![config.plugins_dir.clone()];
        roots.extend(config.packages_dir.clone());

        Self {
            manager,
            roots,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Set debounce duration
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Start watching in a background task
    ///
    /// Roots that do not exist are skipped. Dropping the returned handle
    /// stops the watcher.
    pub fn spawn(self) -> Result<WatchHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| PluginRuntimeError::other(format!("Failed to create file watcher: {e}")))?;

        for root in self.roots.iter().filter(|r| r.is_dir()) {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| {
                    PluginRuntimeError::other(format!(
                        "Failed to watch {}: {e}",
                        root.display()
                    ))
                })?;
            info!(root = %root.display(), "Watching plugin root");
        }

        let manager = self.manager;
        let debounce = self.debounce;

        let task = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) if is_manifest_event(&event) => {
                        tokio::time::sleep(debounce).await;
                        while rx.try_recv().is_ok() {}

                        let count = manager.refresh().await;
                        info!(plugins = count, "Catalog refreshed after manifest change");
                    }
                    Ok(event) => {
                        debug!(kind = ?event.kind, "Ignoring file event");
                    }
                    Err(e) => warn!(error = %e, "File watcher error"),
                }
            }
        });

        Ok(WatchHandle {
            _watcher: watcher,
            task,
        })
    }
}

/// Keeps a [`CatalogWatcher`] alive
#[derive(Debug)]
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching
    pub fn stop(self) {
        self.task.abort();
        info!("Catalog watcher stopped");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn is_manifest_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| is_manifest_path(p))
}

fn is_manifest_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| MANIFEST_FILE_NAMES.contains(&n))
}
