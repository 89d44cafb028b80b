//! Mock implementations for testing

use crate::context::PluginContext;
use crate::error::{PluginError, Result};
use crate::manifest::Manifest;
use crate::plugin::{EntryModule, Plugin, PluginInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Calls {
    activate: AtomicUsize,
    deactivate: AtomicUsize,
    install: AtomicUsize,
    uninstall: AtomicUsize,
    configs: Mutex<Vec<serde_json::Value>>,
}

/// Mock plugin for testing
///
/// Clones share call counters, so a test can keep one handle while the
/// runtime owns another.
#[derive(Debug, Clone)]
pub struct MockPlugin {
    info: PluginInfo,
    ping_route: bool,
    routes: Vec<(String, String)>,
    fail_activate: bool,
    calls: Arc<Calls>,
}

impl MockPlugin {
    /// Create a new mock plugin
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            info: PluginInfo {
                name: id.clone(),
                id,
                version: "1.0.0".to_string(),
                description: String::new(),
                author: String::new(),
            },
            ping_route: false,
            routes: Vec::new(),
            fail_activate: false,
            calls: Arc::new(Calls::default()),
        }
    }

    /// Register `GET /ping` answering `pong` on activation
    pub fn with_ping_route(mut self) -> Self {
        self.ping_route = true;
        self
    }

    /// Register an extra route on activation, answering with its path
    pub fn with_route(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.routes.push((method.into(), path.into()));
        self
    }

    /// Make activation fail
    pub fn failing_activation(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    /// Entry module sharing this mock's counters
    ///
    /// Every load gets a fresh instance built from the manifest.
    pub fn module(&self) -> EntryModule {
        let template = self.clone();
        EntryModule::constructor(move |manifest: &Manifest| {
            let mut plugin = template.clone();
            plugin.info = PluginInfo::from(manifest);
            Ok(Arc::new(plugin) as Arc<dyn Plugin>)
        })
    }

    /// Number of activate calls
    pub fn activate_call_count(&self) -> usize {
        self.calls.activate.load(Ordering::SeqCst)
    }

    /// Number of deactivate calls
    pub fn deactivate_call_count(&self) -> usize {
        self.calls.deactivate.load(Ordering::SeqCst)
    }

    /// Number of on_install calls
    pub fn install_call_count(&self) -> usize {
        self.calls.install.load(Ordering::SeqCst)
    }

    /// Number of on_uninstall calls
    pub fn uninstall_call_count(&self) -> usize {
        self.calls.uninstall.load(Ordering::SeqCst)
    }

    /// Configuration snapshots seen by activate, in call order
    pub fn activation_configs(&self) -> Vec<serde_json::Value> {
        self.calls.configs.lock().clone()
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    async fn activate(&self, ctx: &mut PluginContext) -> Result<()> {
        self.calls.activate.fetch_add(1, Ordering::SeqCst);
        self.calls.configs.lock().push(ctx.config_snapshot().clone());

        if self.fail_activate {
            return Err(PluginError::activation("mock activation failure"));
        }

        if self.ping_route {
            ctx.register_route("GET", "/ping", || async { "pong" })?;
        }
        for (method, path) in &self.routes {
            let body = path.clone();
            ctx.register_route(method, path, move || async move { body })?;
        }
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        self.calls.deactivate.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_install(&self, ctx: &mut PluginContext) -> Result<()> {
        self.calls.install.fetch_add(1, Ordering::SeqCst);
        ctx.run_migrations(None).await.map(|_| ())
    }

    async fn on_uninstall(&self, _ctx: &mut PluginContext) -> Result<()> {
        self.calls.uninstall.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
