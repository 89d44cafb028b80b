#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

//! Administrative HTTP surface for the Atrium plugin runtime
//!
//! Exposes the [`PluginManager`] lifecycle as a JSON API under
//! `/api/admin/plugins` and catalog maintenance under `/api/admin/catalog`.
//! Plugin routes themselves are served by [`PluginManager::router`]; merge
//! both into one application.

pub mod error;
pub mod handlers;
pub mod models;

pub use error::ApiError;
pub use handlers::AppState;
pub use models::*;

use atrium_plugin_runtime::PluginManager;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Mount point of the admin API
pub const ADMIN_PREFIX: &str = "/api/admin/plugins";

/// Mount point of catalog maintenance, kept out of the plugin id space
pub const CATALOG_PREFIX: &str = "/api/admin/catalog";

/// Build the admin router for a shared manager
pub fn router(manager: Arc<PluginManager>) -> Router {
    let state = AppState::new(manager);

    let plugins = Router::new()
        .route("/", get(handlers::list_plugins))
        .route(
            "/:id",
            get(handlers::plugin_status).delete(handlers::uninstall_plugin),
        )
        .route("/:id/install", post(handlers::install_plugin))
        .route("/:id/activate", post(handlers::activate_plugin))
        .route("/:id/deactivate", post(handlers::deactivate_plugin))
        .with_state(state.clone());

    let catalog = Router::new()
        .route("/refresh", post(handlers::refresh_catalog))
        .with_state(state);

    Router::new()
        .nest(ADMIN_PREFIX, plugins)
        .nest(CATALOG_PREFIX, catalog)
        .layer(TraceLayer::new_for_http())
}

/// Admin API and plugin routes in one application
pub fn app(manager: Arc<PluginManager>) -> Router {
    let plugins = manager.router();
    router(manager).merge(plugins)
}
