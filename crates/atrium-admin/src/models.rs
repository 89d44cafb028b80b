//! Request and response bodies for the admin API

use atrium_plugin_runtime::{Activation, PluginStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /api/admin/plugins`
#[derive(Debug, Clone, Serialize)]
pub struct PluginList {
    pub plugins: Vec<PluginStatus>,
}

/// Body of `POST /api/admin/plugins/:id/activate`
#[derive(Debug, Clone, Deserialize)]
pub struct ActivateRequest {
    /// Supplied configuration, merged over the manifest defaults
    #[serde(default = "empty_config")]
    pub config: Value,
}

impl Default for ActivateRequest {
    fn default() -> Self {
        Self {
            config: empty_config(),
        }
    }
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Response of an activate call
#[derive(Debug, Clone, Serialize)]
pub struct ActivateResponse {
    pub activation: Activation,
    pub plugin: PluginStatus,
}

/// Query of `DELETE /api/admin/plugins/:id`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UninstallParams {
    #[serde(default)]
    pub remove_data: bool,
}

/// Response of `POST /api/admin/plugins/refresh`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub discovered: usize,
}

/// JSON error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
