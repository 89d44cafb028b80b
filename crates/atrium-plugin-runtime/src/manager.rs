//! Plugin manager: lifecycle orchestration
//!
//! The manager owns the active table and drives every lifecycle transition.
//! Transitions are serialized on the active table's lock. Lifecycle events
//! are emitted after the lock is released, so subscribers may call back into
//! the manager.

use crate::error::{PluginRuntimeError, Result};
use crate::loader::{LoadedPlugin, PluginDescriptor, PluginLoader, PluginOrigin};
use atrium_plugin_api::{
    topics, EventHub, HostServices, LifecycleState, Manifest, Plugin, PluginContext, PluginError,
    RouteEntry, RouteTable,
};
use atrium_store::{PluginStore, RegistryRecord};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of an activate call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// The plugin was started by this call
    Activated,
    /// The plugin was already running; nothing changed
    AlreadyActive,
}

/// Merged catalog, registry and runtime view of one plugin
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    /// Plugin id
    pub id: String,

    /// Derived lifecycle state
    pub state: LifecycleState,

    /// Persisted install flag
    pub is_installed: bool,

    /// Whether the plugin is in the active table
    pub is_active: bool,

    /// Last applied configuration
    pub config: Value,

    /// When the plugin was last installed
    pub installed_at: Option<DateTime<Utc>>,

    /// When the plugin was last activated
    pub activated_at: Option<DateTime<Utc>>,

    /// Discovery source, when cataloged
    pub origin: Option<PluginOrigin>,

    /// Plugin directory, when cataloged
    pub path: Option<PathBuf>,

    /// Manifest, when cataloged
    pub manifest: Option<Manifest>,

    /// Routes served while active
    pub routes: Vec<RouteEntry>,
}

/// Outcome of [`PluginManager::initialize`]
#[derive(Debug, Default, Clone)]
pub struct InitializeReport {
    /// Plugins cataloged by discovery
    pub discovered: usize,

    /// Plugins reactivated, in activation order
    pub reactivated: Vec<String>,

    /// Plugins that should be active but could not be reactivated
    pub skipped: Vec<String>,
}

#[derive(Debug)]
struct ActivePlugin {
    instance: Arc<dyn Plugin>,
    context: PluginContext,
    dependencies: Vec<String>,
    activated_at: DateTime<Utc>,
}

/// Plugin manager for lifecycle operations
///
/// One value owns the catalog (through its loader) and the active table.
/// Share it by `Arc`.
#[derive(Debug)]
pub struct PluginManager {
    loader: PluginLoader,
    services: HostServices,
    active: Mutex<HashMap<String, ActivePlugin>>,
}

impl PluginManager {
    /// Create a manager with a fresh event hub and route table
    pub fn new(loader: PluginLoader, store: Arc<dyn PluginStore>) -> Self {
        Self::with_services(
            loader,
            HostServices::new(store, EventHub::new(), RouteTable::new()),
        )
    }

    /// Create a manager bound to existing host services
    pub fn with_services(loader: PluginLoader, services: HostServices) -> Self {
        Self {
            loader,
            services,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Plugin loader and catalog
    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    /// Shared event hub
    pub fn events(&self) -> &EventHub {
        &self.services.events
    }

    /// Shared durable store
    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.services.store
    }

    /// Route dispatch table
    pub fn routes(&self) -> &RouteTable {
        &self.services.routes
    }

    /// Host router serving every mounted plugin namespace
    pub fn router(&self) -> Router {
        self.services.routes.router()
    }

    /// Create the schema, discover plugins and reactivate those recorded active
    ///
    /// Reactivation follows dependency order. Per-plugin failures are logged
    /// and skipped.
    pub async fn initialize(&self) -> Result<InitializeReport> {
        self.services.store.ensure_schema().await?;

        let discovery = self.loader.discover().await;
        let mut report = InitializeReport {
            discovered: discovery.registered.len(),
            ..Default::default()
        };

        let candidates: BTreeMap<String, Value> = self
            .services
            .store
            .list_records()
            .await?
            .into_iter()
            .filter(|r| r.is_installed && r.is_active)
            .map(|r| (r.plugin_id, r.config))
            .collect();

        let graph: BTreeMap<String, Vec<String>> = candidates
            .keys()
            .map(|id| (id.clone(), self.dependencies_of(id)))
            .collect();
        let (order, blocked) = dependency_order(&graph);

        for id in blocked {
            let err = PluginRuntimeError::dependency_cycle(format!("{id} is in or behind a cycle"));
            warn!(plugin = %id, error = %err, "Skipping reactivation");
            report.skipped.push(id);
        }

        for id in order {
            let config = candidates.get(&id).cloned().unwrap_or_else(|| json!({}));
            match self.activate(&id, config).await {
                Ok(_) => report.reactivated.push(id),
                Err(e) => {
                    warn!(plugin = %id, error = %e, "Failed to reactivate plugin");
                    report.skipped.push(id);
                }
            }
        }

        info!(
            discovered = report.discovered,
            reactivated = report.reactivated.len(),
            skipped = report.skipped.len(),
            "Plugin manager initialized"
        );

        Ok(report)
    }

    /// Install a cataloged plugin
    ///
    /// Runs `on_install` (migrations by default), synchronizes declared
    /// permissions and marks the plugin installed.
    pub async fn install(&self, id: &str) -> Result<()> {
        let guard = self.active.lock().await;
        self.install_locked(id).await?;
        drop(guard);

        self.emit(topics::PLUGIN_INSTALLED, id).await;
        Ok(())
    }

    /// Activate a plugin with the given configuration
    ///
    /// Manifest defaults are merged under `config`. Activating a running
    /// plugin succeeds without side effects.
    pub async fn activate(&self, id: &str, config: Value) -> Result<Activation> {
        let mut active = self.active.lock().await;
        if active.contains_key(id) {
            debug!(plugin = %id, "Plugin already active");
            return Ok(Activation::AlreadyActive);
        }

        self.activate_locked(&mut active, id, config).await?;
        drop(active);

        self.emit(topics::PLUGIN_ACTIVATED, id).await;
        Ok(Activation::Activated)
    }

    /// Deactivate a running plugin
    ///
    /// Fails with `NotActive`, leaving the registry untouched, when the
    /// plugin is not running. An error from the plugin's own `deactivate`
    /// is returned after cleanup has completed.
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        let plugin_failure = self.deactivate_locked(&mut active, id).await?;
        drop(active);

        self.emit(topics::PLUGIN_DEACTIVATED, id).await;

        match plugin_failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Uninstall a plugin, deactivating it first when running
    ///
    /// With `remove_data`, `on_uninstall` runs and the plugin's migration
    /// records are deleted.
    pub async fn uninstall(&self, id: &str, remove_data: bool) -> Result<()> {
        let mut active = self.active.lock().await;

        let mut deactivated = false;
        if active.contains_key(id) {
            if let Some(e) = self.deactivate_locked(&mut active, id).await? {
                warn!(plugin = %id, error = %e, "Plugin deactivate failed during uninstall");
            }
            deactivated = true;
        }

        let result = self.uninstall_locked(id, remove_data).await;
        drop(active);

        if deactivated {
            self.emit(topics::PLUGIN_DEACTIVATED, id).await;
        }
        result?;

        self.emit(topics::PLUGIN_UNINSTALLED, id).await;
        Ok(())
    }

    /// Re-run discovery, returning the catalog size
    ///
    /// Running plugins are not affected.
    pub async fn refresh(&self) -> usize {
        self.loader.discover().await.registered.len()
    }

    /// Every cataloged plugin merged with its registry record
    pub async fn list(&self) -> Result<Vec<PluginStatus>> {
        let running = self.running_snapshot().await;
        let mut records = self.records().await?;

        Ok(self
            .loader
            .all()
            .into_iter()
            .map(|descriptor| {
                let record = records.remove(descriptor.id());
                build_status(descriptor.id(), Some(descriptor.as_ref()), record, &running)
            })
            .collect())
    }

    /// Status of one plugin, cataloged or recorded
    pub async fn status(&self, id: &str) -> Result<PluginStatus> {
        let descriptor = self.loader.get(id);
        let record = match self.services.store.get_record(id).await {
            Ok(record) => record,
            Err(e) if e.is_missing_table() => None,
            Err(e) => return Err(e.into()),
        };

        if descriptor.is_none() && record.is_none() {
            return Err(PluginRuntimeError::not_found(id));
        }

        let running = self.running_snapshot().await;
        Ok(build_status(id, descriptor.as_deref(), record, &running))
    }

    /// Whether a plugin is in the active table
    pub async fn is_active(&self, id: &str) -> bool {
        self.active.lock().await.contains_key(id)
    }

    /// Ids in the active table, sorted
    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Deactivate every running plugin, dependents first
    ///
    /// Registry `is_active` flags are left as they are so the next
    /// [`initialize`](Self::initialize) brings the same plugins back.
    pub async fn shutdown(&self) -> usize {
        let mut active = self.active.lock().await;

        let graph: BTreeMap<String, Vec<String>> = active
            .iter()
            .map(|(id, plugin)| (id.clone(), plugin.dependencies.clone()))
            .collect();
        let (order, blocked) = dependency_order(&graph);

        let mut stopped = Vec::new();
        for id in order.into_iter().rev().chain(blocked) {
            let Some(mut plugin) = active.remove(&id) else {
                continue;
            };
            plugin.context.release();
            if let Err(e) = plugin.instance.deactivate().await {
                warn!(plugin = %id, error = %e, "Plugin deactivate failed during shutdown");
            }
            debug!(plugin = %id, "Plugin stopped");
            stopped.push(id);
        }
        drop(active);

        for id in &stopped {
            self.emit(topics::PLUGIN_DEACTIVATED, id).await;
        }

        info!(stopped = stopped.len(), "Plugin manager shut down");
        stopped.len()
    }

    async fn install_locked(&self, id: &str) -> Result<()> {
        let descriptor = self
            .loader
            .get(id)
            .ok_or_else(|| PluginRuntimeError::not_found(id))?;

        for dependency in &descriptor.manifest.dependencies {
            let installed = self.loader.get(dependency).is_some()
                && self
                    .services
                    .store
                    .get_record(dependency)
                    .await?
                    .is_some_and(|r| r.is_installed);
            if !installed {
                return Err(PluginRuntimeError::dependency_missing(id, dependency));
            }
        }

        let LoadedPlugin {
            descriptor,
            instance,
        } = self.loader.load(id)?;

        let mut ctx = self.context_for(&descriptor, json!({}));
        let installed = instance.on_install(&mut ctx).await;
        ctx.release();
        installed?;

        self.services
            .store
            .sync_permissions(id, &descriptor.manifest.permissions)
            .await?;

        let mut record = self.record_or_new(id).await?;
        if !record.is_installed {
            record.installed_at = Some(Utc::now());
        }
        record.is_installed = true;
        self.services.store.upsert_record(&record).await?;

        info!(plugin = %id, version = %descriptor.manifest.version, "Plugin installed");
        Ok(())
    }

    async fn activate_locked(
        &self,
        active: &mut HashMap<String, ActivePlugin>,
        id: &str,
        config: Value,
    ) -> Result<()> {
        let descriptor = self
            .loader
            .get(id)
            .ok_or_else(|| PluginRuntimeError::not_found(id))?;

        if let Some(dependency) = descriptor
            .manifest
            .dependencies
            .iter()
            .find(|d| !active.contains_key(d.as_str()))
        {
            return Err(PluginRuntimeError::dependency_not_active(id, dependency));
        }

        let LoadedPlugin {
            descriptor,
            instance,
        } = self.loader.load(id)?;

        let config = merge_config(&descriptor.manifest, config);
        let mut ctx = self.context_for(&descriptor, config.clone());

        if let Err(e) = instance.activate(&mut ctx).await {
            ctx.release();
            return Err(e.into());
        }

        let routes = ctx.mount_routes();
        let activated_at = Utc::now();

        if let Err(e) = self.persist_activation(id, config, activated_at).await {
            ctx.release();
            if let Err(de) = instance.deactivate().await {
                warn!(plugin = %id, error = %de, "Plugin deactivate failed during rollback");
            }
            return Err(e);
        }

        active.insert(
            id.to_string(),
            ActivePlugin {
                instance,
                context: ctx,
                dependencies: descriptor.manifest.dependencies.clone(),
                activated_at,
            },
        );

        info!(plugin = %id, routes, "Plugin activated");
        Ok(())
    }

    async fn persist_activation(
        &self,
        id: &str,
        config: Value,
        activated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut record = self.record_or_new(id).await?;
        record.is_active = true;
        record.activated_at = Some(activated_at);
        record.config = config;
        self.services.store.upsert_record(&record).await?;
        Ok(())
    }

    /// Remove from the active table, unmount and deactivate
    ///
    /// Returns the plugin's own deactivate error, if any, after the registry
    /// has been updated.
    async fn deactivate_locked(
        &self,
        active: &mut HashMap<String, ActivePlugin>,
        id: &str,
    ) -> Result<Option<PluginError>> {
        let Some(mut plugin) = active.remove(id) else {
            return Err(PluginRuntimeError::not_active(id));
        };

        let mut dependents: Vec<&str> = active
            .iter()
            .filter(|(_, p)| p.dependencies.iter().any(|d| d == id))
            .map(|(other, _)| other.as_str())
            .collect();
        if !dependents.is_empty() {
            dependents.sort_unstable();
            warn!(plugin = %id, ?dependents, "Deactivating a plugin that active plugins depend on");
        }

        plugin.context.release();
        let failure = plugin.instance.deactivate().await.err();
        drop(plugin);

        let mut record = self.record_or_new(id).await?;
        record.is_active = false;
        self.services.store.upsert_record(&record).await?;

        info!(plugin = %id, "Plugin deactivated");
        Ok(failure)
    }

    async fn uninstall_locked(&self, id: &str, remove_data: bool) -> Result<()> {
        let descriptor = self
            .loader
            .get(id)
            .ok_or_else(|| PluginRuntimeError::not_found(id))?;

        if remove_data {
            let LoadedPlugin { instance, .. } = self.loader.load(id)?;
            let config = self
                .services
                .store
                .get_record(id)
                .await?
                .map(|r| r.config)
                .unwrap_or_else(|| json!({}));

            let mut ctx = self.context_for(&descriptor, config);
            let uninstalled = instance.on_uninstall(&mut ctx).await;
            ctx.release();
            uninstalled?;

            let removed = self.services.store.delete_migrations(id).await?;
            debug!(plugin = %id, removed, "Migration records deleted");
        }

        self.services.store.delete_permissions(id).await?;

        let mut record = self.record_or_new(id).await?;
        record.is_installed = false;
        record.is_active = false;
        self.services.store.upsert_record(&record).await?;

        info!(plugin = %id, remove_data, "Plugin uninstalled");
        Ok(())
    }

    fn context_for(&self, descriptor: &PluginDescriptor, config: Value) -> PluginContext {
        PluginContext::new(
            descriptor.id(),
            descriptor.path.clone(),
            config,
            self.services.clone(),
        )
    }

    fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.loader
            .get(id)
            .map(|d| d.manifest.dependencies.clone())
            .unwrap_or_default()
    }

    async fn record_or_new(&self, id: &str) -> Result<RegistryRecord> {
        Ok(self
            .services
            .store
            .get_record(id)
            .await?
            .unwrap_or_else(|| RegistryRecord::new(id)))
    }

    async fn records(&self) -> Result<HashMap<String, RegistryRecord>> {
        let records = match self.services.store.list_records().await {
            Ok(records) => records,
            Err(e) if e.is_missing_table() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(records
            .into_iter()
            .map(|r| (r.plugin_id.clone(), r))
            .collect())
    }

    async fn running_snapshot(&self) -> HashMap<String, (DateTime<Utc>, Vec<RouteEntry>)> {
        self.active
            .lock()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), (p.activated_at, p.context.routes().to_vec())))
            .collect()
    }

    async fn emit(&self, topic: &str, id: &str) {
        self.services
            .events
            .emit(topic, json!({ "pluginId": id }))
            .await;
    }
}

fn build_status(
    id: &str,
    descriptor: Option<&PluginDescriptor>,
    record: Option<RegistryRecord>,
    running: &HashMap<String, (DateTime<Utc>, Vec<RouteEntry>)>,
) -> PluginStatus {
    let record = record.unwrap_or_else(|| RegistryRecord::new(id));
    let live = running.get(id);
    let is_active = live.is_some();

    PluginStatus {
        id: id.to_string(),
        state: LifecycleState::from_flags(descriptor.is_some(), record.is_installed, is_active),
        is_installed: record.is_installed,
        is_active,
        config: record.config,
        installed_at: record.installed_at,
        activated_at: live.map(|(at, _)| *at).or(record.activated_at),
        origin: descriptor.map(|d| d.origin),
        path: descriptor.map(|d| d.path.clone()),
        manifest: descriptor.map(|d| d.manifest.clone()),
        routes: live.map(|(_, routes)| routes.clone()).unwrap_or_default(),
    }
}

/// Manifest defaults overlaid with the supplied configuration
fn merge_config(manifest: &Manifest, supplied: Value) -> Value {
    let mut merged: Map<String, Value> = manifest.default_config();
    if let Value::Object(supplied) = supplied {
        merged.extend(supplied);
    }
    Value::Object(merged)
}

/// Topological order over `graph` (id -> dependencies)
///
/// Dependencies outside the graph are ignored. Returns the ordered ids and
/// the ids left over because they sit in, or behind, a cycle.
fn dependency_order(graph: &BTreeMap<String, Vec<String>>) -> (Vec<String>, Vec<String>) {
    let mut pending: BTreeMap<&str, usize> = graph.keys().map(|id| (id.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (id, deps) in graph {
        for dep in deps.iter().filter(|d| graph.contains_key(d.as_str())) {
            if let Some(count) = pending.get_mut(id.as_str()) {
                *count += 1;
            }
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        pending.remove(id);
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    let blocked = pending.into_keys().map(str::to_string).collect();
    (order, blocked)
}
