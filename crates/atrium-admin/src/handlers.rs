//! HTTP handlers for plugin administration

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

use atrium_plugin_runtime::{PluginManager, PluginStatus};

use crate::error::ApiError;
use crate::models::{
    ActivateRequest, ActivateResponse, PluginList, RefreshResponse, UninstallParams,
};

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    manager: Arc<PluginManager>,
}

impl AppState {
    /// Create state around a shared manager
    #[must_use]
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self { manager }
    }

    /// The plugin manager
    #[must_use]
    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }
}

/// List every cataloged or recorded plugin
/// GET /api/admin/plugins
pub async fn list_plugins(State(state): State<AppState>) -> Result<Json<PluginList>, ApiError> {
    let plugins = state.manager().list().await?;
    Ok(Json(PluginList { plugins }))
}

/// Status of one plugin
/// GET /api/admin/plugins/:id
pub async fn plugin_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginStatus>, ApiError> {
    Ok(Json(state.manager().status(&id).await?))
}

/// POST /api/admin/plugins/:id/install
pub async fn install_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginStatus>, ApiError> {
    state.manager().install(&id).await?;
    info!(plugin = %id, "Plugin installed via admin API");
    Ok(Json(state.manager().status(&id).await?))
}

/// Activate with an optional `{config}` body
/// POST /api/admin/plugins/:id/activate
pub async fn activate_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ActivateResponse>, ApiError> {
    let request = parse_activate(&body)?;
    let activation = state.manager().activate(&id, request.config).await?;
    info!(plugin = %id, ?activation, "Plugin activation requested via admin API");

    Ok(Json(ActivateResponse {
        activation,
        plugin: state.manager().status(&id).await?,
    }))
}

/// POST /api/admin/plugins/:id/deactivate
pub async fn deactivate_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginStatus>, ApiError> {
    state.manager().deactivate(&id).await?;
    info!(plugin = %id, "Plugin deactivated via admin API");
    Ok(Json(state.manager().status(&id).await?))
}

/// DELETE /api/admin/plugins/:id?remove_data=bool
pub async fn uninstall_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UninstallParams>,
) -> Result<StatusCode, ApiError> {
    state.manager().uninstall(&id, params.remove_data).await?;
    info!(plugin = %id, remove_data = params.remove_data, "Plugin uninstalled via admin API");
    Ok(StatusCode::NO_CONTENT)
}

/// Re-run discovery
/// POST /api/admin/catalog/refresh
pub async fn refresh_catalog(State(state): State<AppState>) -> Json<RefreshResponse> {
    let discovered = state.manager().refresh().await;
    Json(RefreshResponse { discovered })
}

fn parse_activate(body: &[u8]) -> Result<ActivateRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ActivateRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_activates_with_defaults() {
        assert_eq!(parse_activate(b"").unwrap().config, serde_json::json!({}));
        assert_eq!(parse_activate(b"  \n").unwrap().config, serde_json::json!({}));
    }

    #[test]
    fn test_malformed_body_rejected() {
        let err = parse_activate(b"{config:").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
