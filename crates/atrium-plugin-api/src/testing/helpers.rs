//! Test helpers and harness for plugin testing

use crate::context::{HostServices, PluginContext};
use crate::error::Result;
use crate::events::EventHub;
use crate::plugin::Plugin;
use crate::routes::RouteTable;
use atrium_store::{InMemoryStore, PluginStore};
use axum::body::Body;
use axum::response::Response;
use http_body_util::BodyExt;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

/// Host services backed by a fresh in-memory store with its schema created
pub async fn in_memory_services() -> Result<HostServices> {
    let store = InMemoryStore::new();
    store.ensure_schema().await?;
    Ok(HostServices::new(
        Arc::new(store),
        EventHub::new(),
        RouteTable::new(),
    ))
}

/// Drives one plugin through its lifecycle without a runtime
///
/// Useful for testing a plugin crate in isolation: the harness owns the
/// context, mounts routes after activation and can issue requests against
/// the plugin namespace.
#[derive(Debug)]
pub struct PluginTestHarness<P: Plugin> {
    plugin: P,
    plugin_dir: PathBuf,
    services: HostServices,
    context: Option<PluginContext>,
}

impl<P: Plugin> PluginTestHarness<P> {
    /// Create a harness rooted at `plugin_dir`
    pub fn new(plugin: P, plugin_dir: impl Into<PathBuf>, services: HostServices) -> Self {
        Self {
            plugin,
            plugin_dir: plugin_dir.into(),
            services,
            context: None,
        }
    }

    /// Get a reference to the plugin
    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    /// Shared services the harness binds contexts to
    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Active context, if the plugin is activated
    pub fn context(&self) -> Option<&PluginContext> {
        self.context.as_ref()
    }

    /// Run `on_install` with an empty configuration
    pub async fn install(&self) -> Result<()> {
        let mut ctx = self.new_context(serde_json::json!({}));
        self.plugin.on_install(&mut ctx).await
    }

    /// Activate the plugin and mount its routes
    pub async fn activate(&mut self, config: serde_json::Value) -> Result<()> {
        let mut ctx = self.new_context(config);
        self.plugin.activate(&mut ctx).await?;
        ctx.mount_routes();
        self.context = Some(ctx);
        Ok(())
    }

    /// Unmount routes and deactivate the plugin
    pub async fn deactivate(&mut self) -> Result<()> {
        if let Some(mut ctx) = self.context.take() {
            ctx.release();
        }
        self.plugin.deactivate().await
    }

    /// Run `on_uninstall`
    pub async fn uninstall(&self) -> Result<()> {
        let mut ctx = self.new_context(serde_json::json!({}));
        self.plugin.on_uninstall(&mut ctx).await
    }

    /// Send a request through the host's plugin router
    pub async fn request(&self, req: http::Request<Body>) -> Response {
        match self.services.routes.router().oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Send a GET and return status and body text
    pub async fn get(&self, uri: &str) -> (http::StatusCode, String) {
        let req = match http::Request::builder().uri(uri).body(Body::empty()) {
            Ok(req) => req,
            Err(_) => return (http::StatusCode::BAD_REQUEST, String::new()),
        };
        let response = self.request(req).await;
        let status = response.status();
        let body = match response.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(_) => String::new(),
        };
        (status, body)
    }

    fn new_context(&self, config: serde_json::Value) -> PluginContext {
        let id = self.plugin.info().id;
        PluginContext::new(id, self.plugin_dir.clone(), config, self.services.clone())
    }
}
