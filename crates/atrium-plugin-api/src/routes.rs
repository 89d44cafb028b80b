//! Per-plugin route namespaces and the host-facing dispatcher
//!
//! Every active plugin owns one axum [`Router`] mounted under
//! `/api/plugins/{id}`. The [`RouteTable`] maps plugin ids to those routers;
//! mounting and unmounting are map insert and remove, so the host router is
//! never mutated after startup.

use crate::error::{PluginError, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, MethodFilter};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::{debug, trace};

/// Base path all plugin namespaces live under
pub const PLUGIN_ROUTE_BASE: &str = "/api/plugins";

/// Request header carrying the caller's organization
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Namespace prefix for one plugin
pub fn route_prefix(plugin_id: &str) -> String {
    format!("{PLUGIN_ROUTE_BASE}/{plugin_id}")
}

/// Organization scope of a request, stored as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgScope(pub String);

/// Middleware that copies the organization header into an [`OrgScope`]
/// extension unless an upstream layer already set one
pub async fn inject_org_scope(mut req: Request, next: Next) -> Response {
    if req.extensions().get::<OrgScope>().is_none() {
        let scope = req
            .headers()
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| OrgScope(v.to_string()));

        if let Some(scope) = scope {
            req.extensions_mut().insert(scope);
        }
    }

    next.run(req).await
}

/// HTTP verbs plugins may register routes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl RouteMethod {
    /// Method filter used when building the axum route
    pub fn filter(self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Patch => MethodFilter::PATCH,
            Self::Delete => MethodFilter::DELETE,
        }
    }

    /// Upper-case verb
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl FromStr for RouteMethod {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "patch" => Ok(Self::Patch),
            "delete" => Ok(Self::Delete),
            _ => Err(PluginError::invalid_method(s)),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered (method, path) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// HTTP method
    pub method: RouteMethod,

    /// Path relative to the plugin namespace
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Static(&'a str),
    Param(&'a str),
    CatchAll(&'a str),
}

fn segments(path: &str) -> impl Iterator<Item = Segment<'_>> {
    path.trim_start_matches('/').split('/').map(|s| {
        if let Some(name) = s.strip_prefix(':') {
            Segment::Param(name)
        } else if let Some(name) = s.strip_prefix('*') {
            Segment::CatchAll(name)
        } else {
            Segment::Static(s)
        }
    })
}

/// Check that a plugin-relative path can be mounted
///
/// Parameters (`:name`) and catch-alls (`*name`) must fill a whole segment
/// and be named; a catch-all must be the last segment.
pub fn validate_route_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(PluginError::invalid_route(format!(
            "{path} (must start with '/')"
        )));
    }

    let all: Vec<Segment<'_>> = segments(path).collect();
    for (idx, segment) in all.iter().enumerate() {
        match segment {
            Segment::Param("") | Segment::CatchAll("") => {
                return Err(PluginError::invalid_route(format!(
                    "{path} (unnamed parameter)"
                )));
            }
            Segment::CatchAll(_) if idx + 1 != all.len() => {
                return Err(PluginError::invalid_route(format!(
                    "{path} (catch-all must be the last segment)"
                )));
            }
            Segment::Static(s) if s.contains(&[':', '*'][..]) => {
                return Err(PluginError::invalid_route(format!(
                    "{path} (parameters must fill a whole segment)"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Whether two distinct paths cannot share one router
///
/// Static segments win over parameters, so `/items/new` and `/items/:id`
/// coexist. Two parameters at the same position must share a name, and a
/// catch-all cannot sit beside any other segment.
pub fn routes_conflict(a: &str, b: &str) -> bool {
    for pair in segments(a).zip(segments(b)) {
        match pair {
            (Segment::Static(x), Segment::Static(y)) if x == y => {}
            (Segment::Param(x), Segment::Param(y)) if x == y => {}
            (Segment::CatchAll(x), Segment::CatchAll(y)) => return x != y,
            (Segment::Param(_), Segment::Param(_))
            | (Segment::CatchAll(_), _)
            | (_, Segment::CatchAll(_)) => return true,
            _ => return false,
        }
    }
    false
}

/// Dispatch table from plugin id to its mounted router
#[derive(Clone, Default)]
pub struct RouteTable {
    mounts: Arc<DashMap<String, Router>>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("mounted", &self.mounted_ids())
            .finish()
    }
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a plugin's router, replacing any previous mount for the id
    pub fn mount(&self, plugin_id: &str, router: Router) -> bool {
        let replaced = self.mounts.insert(plugin_id.to_string(), router).is_some();
        debug!(plugin = plugin_id, prefix = %route_prefix(plugin_id), replaced, "Plugin routes mounted");
        replaced
    }

    /// Unmount a plugin's router. Returns whether it was mounted.
    pub fn unmount(&self, plugin_id: &str) -> bool {
        let removed = self.mounts.remove(plugin_id).is_some();
        if removed {
            debug!(plugin = plugin_id, "Plugin routes unmounted");
        }
        removed
    }

    /// Whether a plugin currently has routes mounted
    pub fn is_mounted(&self, plugin_id: &str) -> bool {
        self.mounts.contains_key(plugin_id)
    }

    /// Ids with mounted routes, sorted
    pub fn mounted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Host router forwarding `/api/plugins/{id}/...` into mounted routers
    pub fn router(&self) -> Router {
        Router::new()
            .route(&format!("{PLUGIN_ROUTE_BASE}/*rest"), any(dispatch))
            .with_state(self.clone())
    }

    /// Forward one request to the owning plugin's router
    pub async fn dispatch(&self, mut req: Request) -> Response {
        let path = req.uri().path().to_string();
        let Some((plugin_id, rest)) = split_plugin_path(&path) else {
            return not_found(&path);
        };

        let Some(router) = self.mounts.get(plugin_id).map(|r| r.value().clone()) else {
            trace!(plugin = plugin_id, "No routes mounted");
            return not_found(&path);
        };

        let path_and_query = match req.uri().query() {
            Some(query) => format!("{rest}?{query}"),
            None => rest.to_string(),
        };

        let mut parts = req.uri().clone().into_parts();
        parts.path_and_query = match path_and_query.parse() {
            Ok(pq) => Some(pq),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        *req.uri_mut() = match Uri::from_parts(parts) {
            Ok(uri) => uri,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };

        match router.oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

async fn dispatch(State(table): State<RouteTable>, req: Request<Body>) -> Response {
    table.dispatch(req).await
}

/// Split `/api/plugins/{id}/rest` into `(id, "/rest")`
fn split_plugin_path(path: &str) -> Option<(&str, &str)> {
    let remainder = path.strip_prefix(PLUGIN_ROUTE_BASE)?.strip_prefix('/')?;
    let (plugin_id, rest) = match remainder.find('/') {
        Some(idx) => remainder.split_at(idx),
        None => (remainder, "/"),
    };

    if plugin_id.is_empty() {
        None
    } else {
        Some((plugin_id, rest))
    }
}

fn not_found(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("No plugin route for {path}") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use http_body_util::BodyExt;

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request(uri: &str) -> Request {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_route_method_parsing() {
        assert_eq!("get".parse::<RouteMethod>().unwrap(), RouteMethod::Get);
        assert_eq!("DELETE".parse::<RouteMethod>().unwrap(), RouteMethod::Delete);
        assert!(matches!(
            "TRACE".parse::<RouteMethod>(),
            Err(PluginError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_split_plugin_path() {
        assert_eq!(
            split_plugin_path("/api/plugins/hello-world/greet/1"),
            Some(("hello-world", "/greet/1"))
        );
        assert_eq!(
            split_plugin_path("/api/plugins/hello-world"),
            Some(("hello-world", "/"))
        );
        assert_eq!(split_plugin_path("/api/plugins/"), None);
        assert_eq!(split_plugin_path("/api/other/x"), None);
    }

    #[test]
    fn test_route_path_shapes() {
        assert!(validate_route_path("/items/:id").is_ok());
        assert!(validate_route_path("/files/*rest").is_ok());
        assert!(validate_route_path("/").is_ok());

        for bad in ["items", "/items/:", "/files/*", "/files/*rest/meta", "/items/id:x"] {
            assert!(
                matches!(validate_route_path(bad), Err(PluginError::InvalidRoute(_))),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_route_conflicts() {
        assert!(routes_conflict("/items/:id", "/items/:item_id"));
        assert!(routes_conflict("/items/:id/tags", "/items/:item_id"));
        assert!(routes_conflict("/files/*rest", "/files/latest"));
        assert!(routes_conflict("/files/:name", "/files/*rest"));

        assert!(!routes_conflict("/items/:id", "/items/new"));
        assert!(!routes_conflict("/items/:id", "/items/:id/tags"));
        assert!(!routes_conflict("/items/:id", "/orders/:order_id"));
        assert!(!routes_conflict("/hello", "/greet"));
    }

    #[tokio::test]
    async fn test_dispatch_to_mounted_router() {
        let table = RouteTable::new();
        table.mount(
            "hello-world",
            Router::new().route("/hello", get(|| async { "hi" })),
        );

        let response = table
            .router()
            .oneshot(request("/api/plugins/hello-world/hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "hi");
    }

    #[tokio::test]
    async fn test_unmount_removes_only_that_namespace() {
        let table = RouteTable::new();
        table.mount("a", Router::new().route("/x", get(|| async { "a" })));
        table.mount("b", Router::new().route("/x", get(|| async { "b" })));

        assert!(table.unmount("a"));
        assert!(!table.unmount("a"));

        let gone = table
            .router()
            .oneshot(request("/api/plugins/a/x"))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);

        let kept = table
            .router()
            .oneshot(request("/api/plugins/b/x"))
            .await
            .unwrap();
        assert_eq!(body_string(kept).await, "b");
        assert_eq!(table.mounted_ids(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_query_string_preserved() {
        let table = RouteTable::new();
        table.mount(
            "search",
            Router::new().route(
                "/find",
                get(|req: Request| async move { req.uri().query().unwrap_or("").to_string() }),
            ),
        );

        let response = table
            .router()
            .oneshot(request("/api/plugins/search/find?q=payroll"))
            .await
            .unwrap();
        assert_eq!(body_string(response).await, "q=payroll");
    }

    #[tokio::test]
    async fn test_org_scope_injected_from_header() {
        let router = Router::new()
            .route(
                "/whoami",
                get(|req: Request| async move {
                    req.extensions()
                        .get::<OrgScope>()
                        .map(|s| s.0.clone())
                        .unwrap_or_default()
                }),
            )
            .layer(axum::middleware::from_fn(inject_org_scope));

        let req = http::Request::builder()
            .uri("/whoami")
            .header(ORGANIZATION_HEADER, "org-42")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(req).await.unwrap();
        assert_eq!(body_string(response).await, "org-42");
    }
}
