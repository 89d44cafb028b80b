//! Per-activation plugin context
//!
//! A [`PluginContext`] is handed to a plugin on activation, install and
//! uninstall. It scopes everything the plugin touches to its own id: the
//! route namespace, the logger, migration bookkeeping and event
//! subscriptions.

use crate::error::{PluginError, Result};
use crate::events::{Event, EventHub, HandlerResult, Subscription};
use crate::migrations::{MigrationRunner, DEFAULT_MIGRATIONS_DIR};
use crate::routes::{
    inject_org_scope, route_prefix, routes_conflict, validate_route_path, RouteEntry, RouteMethod,
    RouteTable,
};
use atrium_store::PluginStore;
use axum::handler::Handler;
use axum::routing::MethodRouter;
use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, Span};

/// Shared services every context is bound to
#[derive(Debug, Clone)]
pub struct HostServices {
    /// Durable store shared by the runtime and all plugins
    pub store: Arc<dyn PluginStore>,

    /// Process-wide event hub
    pub events: EventHub,

    /// Route dispatch table
    pub routes: RouteTable,
}

impl HostServices {
    /// Bundle the shared services
    pub fn new(store: Arc<dyn PluginStore>, events: EventHub, routes: RouteTable) -> Self {
        Self {
            store,
            events,
            routes,
        }
    }
}

/// Logger that stamps every event with the owning plugin id
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
    span: Span,
}

impl PluginLogger {
    /// Create a logger for one plugin
    pub fn new(plugin_id: impl Into<String>) -> Self {
        let plugin_id = plugin_id.into();
        let span = tracing::info_span!("plugin", plugin = %plugin_id);
        Self { plugin_id, span }
    }

    /// Log at debug level
    pub fn debug(&self, message: &str) {
        self.span
            .in_scope(|| tracing::debug!(plugin = %self.plugin_id, "{message}"));
    }

    /// Log at info level
    pub fn info(&self, message: &str) {
        self.span
            .in_scope(|| tracing::info!(plugin = %self.plugin_id, "{message}"));
    }

    /// Log at warn level
    pub fn warn(&self, message: &str) {
        self.span
            .in_scope(|| tracing::warn!(plugin = %self.plugin_id, "{message}"));
    }

    /// Log at error level
    pub fn error(&self, message: &str) {
        self.span
            .in_scope(|| tracing::error!(plugin = %self.plugin_id, "{message}"));
    }

    /// Span covering this plugin's work, for instrumenting futures
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Execution context bound to one plugin instance
#[derive(Debug)]
pub struct PluginContext {
    plugin_id: String,
    plugin_dir: PathBuf,
    config: Value,
    services: HostServices,
    logger: PluginLogger,
    entries: Vec<RouteEntry>,
    routers: BTreeMap<String, MethodRouter>,
    subscriptions: Vec<Subscription>,
    mounted: bool,
}

impl PluginContext {
    /// Create a context for a plugin rooted at `plugin_dir`
    ///
    /// A non-object `config` is treated as empty.
    pub fn new(
        plugin_id: impl Into<String>,
        plugin_dir: impl Into<PathBuf>,
        config: Value,
        services: HostServices,
    ) -> Self {
        let plugin_id = plugin_id.into();
        let config = if config.is_object() {
            config
        } else {
            Value::Object(Default::default())
        };

        Self {
            logger: PluginLogger::new(plugin_id.clone()),
            plugin_id,
            plugin_dir: plugin_dir.into(),
            config,
            services,
            entries: Vec::new(),
            routers: BTreeMap::new(),
            subscriptions: Vec::new(),
            mounted: false,
        }
    }

    /// Owning plugin id
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Plugin root directory
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// URL prefix routes are served under
    pub fn route_prefix(&self) -> String {
        route_prefix(&self.plugin_id)
    }

    /// Plugin-scoped logger
    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Shared event hub
    pub fn events(&self) -> &EventHub {
        &self.services.events
    }

    /// Shared durable store
    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.services.store
    }

    /// Look up a configuration value, falling back to `default`
    ///
    /// A value that does not deserialize into `T` also yields `default`.
    pub fn config<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Raw configuration value
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// The whole bound configuration
    pub fn config_snapshot(&self) -> &Value {
        &self.config
    }

    /// Register a route inside the plugin namespace
    ///
    /// Routes are recorded, not served, until [`mount_routes`] runs.
    ///
    /// [`mount_routes`]: PluginContext::mount_routes
    pub fn register_route<H, T>(&mut self, method: &str, path: &str, handler: H) -> Result<()>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let method: RouteMethod = method.parse()?;

        validate_route_path(path)?;

        if let Some(existing) = self
            .routers
            .keys()
            .find(|existing| existing.as_str() != path && routes_conflict(existing, path))
        {
            return Err(PluginError::invalid_route(format!(
                "{path} (conflicts with {existing})"
            )));
        }

        if self
            .entries
            .iter()
            .any(|e| e.method == method && e.path == path)
        {
            return Err(PluginError::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        let router = self
            .routers
            .remove(path)
            .unwrap_or_else(MethodRouter::new)
            .on(method.filter(), handler);
        self.routers.insert(path.to_string(), router);

        self.entries.push(RouteEntry {
            method,
            path: path.to_string(),
        });

        debug!(plugin = %self.plugin_id, method = %method, path, "Route registered");
        Ok(())
    }

    /// Routes registered so far, in registration order
    pub fn routes(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Mount every registered route under the plugin prefix
    ///
    /// Returns the number of routes mounted. Contexts without routes mount
    /// nothing.
    pub fn mount_routes(&mut self) -> usize {
        if self.entries.is_empty() {
            return 0;
        }

        let router = self
            .routers
            .iter()
            .fold(Router::new(), |router, (path, method_router)| {
                router.route(path, method_router.clone())
            })
            .layer(axum::middleware::from_fn(inject_org_scope));

        self.services.routes.mount(&self.plugin_id, router);
        self.mounted = true;
        self.entries.len()
    }

    /// Detach this context's route namespace. Returns whether it was mounted.
    pub fn unmount_routes(&mut self) -> bool {
        if !self.mounted {
            return false;
        }
        self.mounted = false;
        self.services.routes.unmount(&self.plugin_id)
    }

    /// Whether this context's routes are being served
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Subscribe to a topic for the lifetime of this context
    ///
    /// Subscriptions made here are removed by [`release`].
    ///
    /// [`release`]: PluginContext::release
    pub fn subscribe<F, Fut>(&mut self, topic: impl Into<String>, handler: F) -> &Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let subscription = self.services.events.on(topic, handler);
        self.subscriptions.push(subscription);
        &self.subscriptions[self.subscriptions.len() - 1]
    }

    /// Apply unseen migration scripts
    ///
    /// Uses `<plugin_dir>/migrations` when `dir` is `None`. Relative paths
    /// resolve against the plugin directory.
    pub async fn run_migrations(&self, dir: Option<&Path>) -> Result<Vec<String>> {
        let dir = match dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.plugin_dir.join(dir),
            None => self.plugin_dir.join(DEFAULT_MIGRATIONS_DIR),
        };

        MigrationRunner::new(&self.plugin_id, self.services.store.as_ref())
            .run(&dir)
            .await
    }

    /// Unmount routes and drop subscriptions made through this context
    pub fn release(&mut self) {
        self.unmount_routes();
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}
