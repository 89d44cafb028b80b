//! Mapping of runtime errors onto HTTP responses

use crate::models::ErrorBody;
use atrium_plugin_runtime::{PluginError, PluginRuntimeError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

/// Error returned by admin handlers
#[derive(Debug)]
pub enum ApiError {
    /// Lifecycle call failed
    Runtime(PluginRuntimeError),

    /// Request could not be understood
    BadRequest(String),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Runtime(err) => runtime_status(err),
        }
    }
}

fn runtime_status(err: &PluginRuntimeError) -> StatusCode {
    if err.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    if err.is_dependency_error() {
        return StatusCode::CONFLICT;
    }

    match err {
        PluginRuntimeError::NotActive(_) | PluginRuntimeError::DuplicatePlugin { .. } => {
            StatusCode::CONFLICT
        }
        PluginRuntimeError::ManifestInvalid { .. }
        | PluginRuntimeError::Plugin(
            PluginError::InvalidMethod(_)
            | PluginError::InvalidRoute(_)
            | PluginError::DuplicateRoute { .. },
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime(err) => write!(f, "{err}"),
            Self::BadRequest(msg) => write!(f, "Bad request: {msg}"),
        }
    }
}

impl From<PluginRuntimeError> for ApiError {
    fn from(err: PluginRuntimeError) -> Self {
        Self::Runtime(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Admin request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
