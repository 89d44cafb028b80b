//! Plugin discovery and instantiation
//!
//! The loader scans two roots for plugin directories: the local plugins
//! directory, and an optional packages directory where only entries whose
//! name carries the package prefix are considered. Each plugin directory
//! holds one manifest file. Valid manifests become [`PluginDescriptor`]s in
//! the catalog; everything else is logged and skipped.

use crate::error::{PluginRuntimeError, Result};
use crate::modules::ModuleTable;
use atrium_plugin_api::manifest::MANIFEST_FILE_NAMES;
use atrium_plugin_api::{Manifest, ManifestError, ManifestFormat, Plugin};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default package name prefix
pub const DEFAULT_PACKAGE_PREFIX: &str = "atrium-plugin-";

/// Where a plugin was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginOrigin {
    /// Local plugins directory
    Local,
    /// Packaged dependency directory
    Package,
}

impl std::fmt::Display for PluginOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.pad("local"),
            Self::Package => f.pad("package"),
        }
    }
}

/// A cataloged plugin
///
/// Replaced wholesale on every discovery, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    /// Validated manifest
    pub manifest: Manifest,

    /// Plugin root directory
    pub path: PathBuf,

    /// Manifest file
    pub manifest_path: PathBuf,

    /// Discovery source
    pub origin: PluginOrigin,

    /// Entry point resolved against the plugin directory
    pub entry_path: PathBuf,

    /// Client entry point resolved against the plugin directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_entry_path: Option<PathBuf>,
}

impl PluginDescriptor {
    /// Plugin id
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    fn new(manifest: Manifest, path: PathBuf, manifest_path: PathBuf, origin: PluginOrigin) -> Self {
        let entry_path = path.join(&manifest.entry_point);
        let client_entry_path = manifest.client_entry_point.as_ref().map(|p| path.join(p));
        Self {
            manifest,
            path,
            manifest_path,
            origin,
            entry_path,
            client_entry_path,
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Local plugins directory
    pub plugins_dir: PathBuf,

    /// Packaged dependency directory
    #[serde(default)]
    pub packages_dir: Option<PathBuf>,

    /// Name prefix identifying plugin packages
    #[serde(default = "default_package_prefix")]
    pub package_prefix: String,
}

fn default_package_prefix() -> String {
    DEFAULT_PACKAGE_PREFIX.to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            packages_dir: None,
            package_prefix: default_package_prefix(),
        }
    }
}

impl LoaderConfig {
    /// Configuration scanning only a local directory
    pub fn local(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            ..Self::default()
        }
    }
}

/// Outcome of one discovery pass
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Plugin ids cataloged, in discovery order
    pub registered: Vec<String>,

    /// Manifests rejected, with the reason
    pub rejected: Vec<PluginRuntimeError>,
}

/// A freshly instantiated plugin with its descriptor
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    /// Catalog entry the instance was built from
    pub descriptor: Arc<PluginDescriptor>,

    /// Plugin instance
    pub instance: Arc<dyn Plugin>,
}

/// Discovers plugins and instantiates them on demand
#[derive(Debug)]
pub struct PluginLoader {
    config: LoaderConfig,
    modules: ModuleTable,
    catalog: RwLock<BTreeMap<String, Arc<PluginDescriptor>>>,
}

impl PluginLoader {
    /// Create a loader with an empty catalog
    pub fn new(config: LoaderConfig, modules: ModuleTable) -> Self {
        Self {
            config,
            modules,
            catalog: RwLock::new(BTreeMap::new()),
        }
    }

    /// Loader configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Registered entry modules
    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    /// Rebuild the catalog from both scan roots
    ///
    /// Never fails: unreadable roots, bad manifests and duplicate ids are
    /// logged and reported, and the rest of the scan continues.
    pub async fn discover(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut catalog: BTreeMap<String, Arc<PluginDescriptor>> = BTreeMap::new();

        let mut sources: Vec<(PathBuf, PluginOrigin)> = scan_root(&self.config.plugins_dir, None)
            .await
            .into_iter()
            .map(|dir| (dir, PluginOrigin::Local))
            .collect();

        if let Some(packages_dir) = &self.config.packages_dir {
            let packages = scan_root(packages_dir, Some(&self.config.package_prefix)).await;
            sources.extend(packages.into_iter().map(|dir| (dir, PluginOrigin::Package)));
        }

        for (dir, origin) in sources {
            let Some(manifest_path) = find_manifest(&dir).await else {
                debug!(dir = %dir.display(), "No manifest found, skipping");
                continue;
            };

            let manifest = match read_manifest(&manifest_path).await {
                Ok(manifest) => manifest,
                Err(source) => {
                    let err = PluginRuntimeError::ManifestInvalid {
                        path: manifest_path,
                        source,
                    };
                    warn!(error = %err, "Skipping plugin with invalid manifest");
                    report.rejected.push(err);
                    continue;
                }
            };

            if let Some(existing) = catalog.get(&manifest.id) {
                let err = PluginRuntimeError::DuplicatePlugin {
                    id: manifest.id.clone(),
                    path: dir,
                    existing: existing.path.clone(),
                };
                warn!(error = %err, "Skipping duplicate plugin");
                report.rejected.push(err);
                continue;
            }

            let descriptor = PluginDescriptor::new(manifest, dir, manifest_path, origin);
            debug!(
                plugin = %descriptor.id(),
                version = %descriptor.manifest.version,
                origin = ?descriptor.origin,
                "Plugin discovered"
            );
            report.registered.push(descriptor.id().to_string());
            catalog.insert(descriptor.id().to_string(), Arc::new(descriptor));
        }

        info!(
            plugins = report.registered.len(),
            rejected = report.rejected.len(),
            "Plugin discovery complete"
        );

        *self.catalog.write() = catalog;
        report
    }

    /// Resolve and instantiate a cataloged plugin
    ///
    /// Every call resolves the entry module again; instances are never
    /// cached here.
    pub fn load(&self, id: &str) -> Result<LoadedPlugin> {
        let descriptor = self.get(id).ok_or_else(|| PluginRuntimeError::not_found(id))?;

        let module = self
            .modules
            .resolve(&descriptor.manifest.entry_point)
            .ok_or_else(|| PluginRuntimeError::EntryPointUnresolved {
                plugin: id.to_string(),
                entry_point: descriptor.manifest.entry_point.clone(),
            })?;

        let instance = module.instantiate(&descriptor.manifest)?;
        Ok(LoadedPlugin {
            descriptor,
            instance,
        })
    }

    /// Every cataloged plugin, ordered by id
    pub fn all(&self) -> Vec<Arc<PluginDescriptor>> {
        self.catalog.read().values().cloned().collect()
    }

    /// One cataloged plugin
    pub fn get(&self, id: &str) -> Option<Arc<PluginDescriptor>> {
        self.catalog.read().get(id).cloned()
    }

    /// Number of cataloged plugins
    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.catalog.read().is_empty()
    }
}

/// Subdirectories of `root`, sorted by name, optionally prefix-filtered
///
/// A missing or unreadable root yields nothing.
async fn scan_root(root: &Path, prefix: Option<&str>) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "Plugin root not readable, skipping");
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Error while scanning plugin root");
                break;
            }
        };

        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Some(prefix) = prefix {
            if !name.starts_with(prefix) {
                continue;
            }
        }

        dirs.push(entry.path());
    }

    dirs.sort();
    dirs
}

/// First manifest file present in a plugin directory
async fn find_manifest(dir: &Path) -> Option<PathBuf> {
    for name in MANIFEST_FILE_NAMES {
        let path = dir.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

async fn read_manifest(path: &Path) -> std::result::Result<Manifest, ManifestError> {
    let format = ManifestFormat::from_path(path)?;
    let content = tokio::fs::read_to_string(path).await.map_err(|e| ManifestError {
        violations: vec![format!("failed to read manifest: {e}")],
    })?;
    Manifest::parse(&content, format)
}
