//! Admin API tests against a real manager

use atrium_admin::{app, ErrorBody, RefreshResponse};
use atrium_plugin_api::testing::MockPlugin;
use atrium_plugin_runtime::{LoaderConfig, ModuleTable, PluginLoader, PluginManager};
use atrium_store::InMemoryStore;
use axum::body::Body;
use axum::Router;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn stage(root: &Path, id: &str, dependencies: &[&str]) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = json!({
        "id": id,
        "name": id,
        "version": "1.0.0",
        "entryPoint": "mock",
        "dependencies": dependencies,
        "config": {
            "level": { "type": "select", "options": ["low", "high"], "default": "low" }
        }
    });
    std::fs::write(dir.join("plugin.json"), manifest.to_string()).unwrap();
}

async fn setup(root: &Path, mock: &MockPlugin) -> (Arc<PluginManager>, Router) {
    let modules = ModuleTable::new().with("mock", mock.module());
    let loader = PluginLoader::new(LoaderConfig::local(root), modules);
    let manager = Arc::new(PluginManager::new(loader, Arc::new(InMemoryStore::new())));
    manager.initialize().await.unwrap();
    let app = app(Arc::clone(&manager));
    (manager, app)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_list_and_status() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "payroll", &[]);
    stage(root.path(), "reports", &["payroll"]);
    let (_manager, app) = setup(root.path(), &MockPlugin::new("mock")).await;

    let (status, body) = send(&app, Method::GET, "/api/admin/plugins", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = body["plugins"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["payroll", "reports"]);

    let (status, body) = send(&app, Method::GET, "/api/admin/plugins/payroll", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "discovered");
    assert_eq!(body["isInstalled"], false);
    assert_eq!(body["isActive"], false);
}

#[tokio::test]
async fn test_full_lifecycle_over_http() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "payroll", &[]);
    let mock = MockPlugin::new("mock").with_ping_route();
    let (manager, app) = setup(root.path(), &mock).await;

    let (status, body) = send(&app, Method::POST, "/api/admin/plugins/payroll/install", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "installed");
    assert_eq!(mock.install_call_count(), 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/admin/plugins/payroll/activate",
        Some(json!({ "config": { "level": "high" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activation"], "activated");
    assert_eq!(body["plugin"]["isActive"], true);
    assert_eq!(body["plugin"]["config"], json!({ "level": "high" }));

    // Plugin route served by the same application
    let (status, _) = send(&app, Method::GET, "/api/plugins/payroll/ping", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::POST, "/api/admin/plugins/payroll/activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activation"], "already_active");
    assert_eq!(mock.activate_call_count(), 1);

    let (status, body) = send(&app, Method::POST, "/api/admin/plugins/payroll/deactivate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isActive"], false);
    assert!(!manager.is_active("payroll").await);

    let (status, _) = send(&app, Method::GET, "/api/plugins/payroll/ping", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::DELETE,
        "/api/admin/plugins/payroll?remove_data=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(mock.uninstall_call_count(), 1);

    let (_, body) = send(&app, Method::GET, "/api/admin/plugins/payroll", None).await;
    assert_eq!(body["isInstalled"], false);
}

#[tokio::test]
async fn test_errors_map_to_status_codes() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "payroll", &[]);
    stage(root.path(), "reports", &["payroll"]);
    let (_manager, app) = setup(root.path(), &MockPlugin::new("mock")).await;

    let (status, body) = send(&app, Method::GET, "/api/admin/plugins/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorBody = serde_json::from_value(body).unwrap();
    assert!(error.error.contains("ghost"));

    let (status, _) = send(&app, Method::POST, "/api/admin/plugins/payroll/deactivate", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, Method::POST, "/api/admin/plugins/reports/activate", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, Method::POST, "/api/admin/plugins/reports/install", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let req = http::Request::builder()
        .method(Method::POST)
        .uri("/api/admin/plugins/payroll/activate")
        .body(Body::from("{config:"))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failed_activation_is_server_error() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "payroll", &[]);
    let (manager, app) = setup(root.path(), &MockPlugin::new("mock").failing_activation()).await;

    let (status, body) = send(&app, Method::POST, "/api/admin/plugins/payroll/activate", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
    assert!(manager.active_ids().await.is_empty());
}

#[tokio::test]
async fn test_refresh_picks_up_new_plugins() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "payroll", &[]);
    let (_manager, app) = setup(root.path(), &MockPlugin::new("mock")).await;

    stage(root.path(), "reports", &["payroll"]);
    let (status, body) = send(&app, Method::POST, "/api/admin/catalog/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    let refresh: RefreshResponse = serde_json::from_value(body).unwrap();
    assert_eq!(refresh.discovered, 2);

    let (status, _) = send(&app, Method::GET, "/api/admin/plugins/reports", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_plugin_named_refresh_is_addressable() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "refresh", &[]);
    let mock = MockPlugin::new("mock").with_ping_route();
    let (manager, app) = setup(root.path(), &mock).await;

    let (status, body) = send(&app, Method::GET, "/api/admin/plugins/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "refresh");
    assert_eq!(body["state"], "discovered");

    let (status, _) = send(&app, Method::POST, "/api/admin/plugins/refresh/install", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::POST, "/api/admin/plugins/refresh/activate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(manager.is_active("refresh").await);

    let (status, body) = send(&app, Method::GET, "/api/admin/plugins/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");

    // Catalog refresh lives outside the id space
    let (status, body) = send(&app, Method::POST, "/api/admin/catalog/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["discovered"], 1);
    assert!(manager.is_active("refresh").await);
}

#[tokio::test]
async fn test_conflicting_plugin_routes_rejected() {
    let root = tempfile::tempdir().unwrap();
    stage(root.path(), "inventory", &[]);
    let mock = MockPlugin::new("mock")
        .with_route("GET", "/items/:id")
        .with_route("PUT", "/items/:sku");
    let (manager, app) = setup(root.path(), &mock).await;

    let (status, body) = send(&app, Method::POST, "/api/admin/plugins/inventory/activate", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorBody = serde_json::from_value(body).unwrap();
    assert!(error.error.contains("/items/:sku"));
    assert!(manager.active_ids().await.is_empty());

    // The host is still serving requests
    let (status, _) = send(&app, Method::GET, "/api/admin/plugins/inventory", None).await;
    assert_eq!(status, StatusCode::OK);
}
