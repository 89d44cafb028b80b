//! # Hello World Plugin
//!
//! Reference plugin for the Atrium plugin runtime.
//!
//! ## Routes
//!
//! Served under `/api/plugins/hello-world`:
//!
//! - `GET /hello`: the configured greeting, scoped to the caller's organization
//! - `POST /greet`: greet someone by name, record the greeting in
//!   `hw_greetings` and publish `hello-world:greeted`
//!
//! ## Configuration
//!
//! - `greeting` (string, default `Hello`)
//! - `shout` (boolean, default `false`)
//!
//! ## Example
//!
//! ```rust,no_run
//! // Register the compiled module under the manifest's entry point
//! let module = hello_world::module();
//! assert!(matches!(module, atrium_plugin_api::EntryModule::Constructor(_)));
//! ```

use async_trait::async_trait;
use atrium_plugin_api::prelude::*;
use atrium_plugin_api::topics;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Entry point string declared in `plugin.json`
pub const ENTRY_POINT: &str = "hello_world";

/// Topic published for every greeting sent through `POST /greet`
pub const GREETED_TOPIC: &str = "hello-world:greeted";

const DEFAULT_GREETING: &str = "Hello";

/// Directory holding this plugin's manifest and migrations
pub fn plugin_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Entry module for registration with the runtime's module table
pub fn module() -> EntryModule {
    EntryModule::constructor(|manifest: &Manifest| {
        Ok(Arc::new(HelloWorldPlugin::from_manifest(manifest)) as Arc<dyn Plugin>)
    })
}

/// Hello World plugin
#[derive(Debug, Clone)]
pub struct HelloWorldPlugin {
    info: PluginInfo,
}

impl HelloWorldPlugin {
    /// Create the plugin from its manifest
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            info: PluginInfo::from(manifest),
        }
    }
}

/// Greeting settings bound at activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingSettings {
    /// Greeting word
    pub greeting: String,

    /// Upper-case every message
    pub shout: bool,
}

impl GreetingSettings {
    fn from_context(ctx: &PluginContext) -> Self {
        Self {
            greeting: ctx.config("greeting", DEFAULT_GREETING.to_string()),
            shout: ctx.config("shout", false),
        }
    }

    /// Message for an optional recipient
    pub fn message(&self, name: Option<&str>) -> String {
        let message = match name {
            Some(name) => format!("{}, {}!", self.greeting, name),
            None => format!("{}!", self.greeting),
        };
        if self.shout {
            message.to_uppercase()
        } else {
            message
        }
    }
}

/// Response body of the greeting routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// Rendered message
    pub message: String,

    /// Caller's organization, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// Statement recording one greeting in `hw_greetings`
///
/// Values are inlined as SQL string literals because the store only accepts
/// whole scripts.
pub fn insert_greeting_sql(name: &str, message: &str, organization: Option<&str>) -> String {
    format!(
        "INSERT INTO hw_greetings (name, message, organization_id) VALUES ({}, {}, {});",
        sql_text(name),
        sql_text(message),
        organization.map_or_else(|| "NULL".to_string(), sql_text),
    )
}

fn sql_text(value: &str) -> String {
    format!("'{}'", value.replace('\0', "").replace('\'', "''"))
}

/// Body of `POST /greet`
#[derive(Debug, Clone, Deserialize)]
pub struct GreetRequest {
    /// Who to greet
    pub name: String,
}

#[async_trait]
impl Plugin for HelloWorldPlugin {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    async fn activate(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let settings = GreetingSettings::from_context(ctx);

        let hello = settings.clone();
        ctx.register_route("GET", "/hello", move |org: Option<Extension<OrgScope>>| {
            let settings = hello.clone();
            async move {
                Json(Greeting {
                    message: settings.message(None),
                    organization: org.map(|Extension(scope)| scope.0),
                })
            }
        })?;

        let events = ctx.events().clone();
        let store = Arc::clone(ctx.store());
        let logger = ctx.logger().clone();
        let greet = settings.clone();
        ctx.register_route(
            "POST",
            "/greet",
            move |org: Option<Extension<OrgScope>>, Json(req): Json<GreetRequest>| {
                let events = events.clone();
                let store = Arc::clone(&store);
                let logger = logger.clone();
                let settings = greet.clone();
                async move {
                    let greeting = Greeting {
                        message: settings.message(Some(&req.name)),
                        organization: org.map(|Extension(scope)| scope.0),
                    };

                    let insert = insert_greeting_sql(
                        &req.name,
                        &greeting.message,
                        greeting.organization.as_deref(),
                    );
                    if let Err(e) = store.execute_script(&insert).await {
                        logger.error(&format!("failed to record greeting: {e}"));
                        return Err((
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(serde_json::json!({ "error": "failed to record greeting" })),
                        ));
                    }

                    events
                        .emit(
                            GREETED_TOPIC,
                            serde_json::json!({
                                "name": req.name,
                                "message": greeting.message,
                                "organization": greeting.organization,
                            }),
                        )
                        .await;
                    Ok(Json(greeting))
                }
            },
        )?;

        let logger = ctx.logger().clone();
        ctx.subscribe(topics::PLUGIN_ACTIVATED, move |event: Event| {
            let logger = logger.clone();
            async move {
                if let Some(id) = event.payload.get("pluginId").and_then(|v| v.as_str()) {
                    logger.debug(&format!("plugin {id} activated"));
                }
                HandlerResult::Ok(())
            }
        });

        ctx.logger()
            .info(&format!("greeting with \"{}\"", settings.greeting));
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), PluginError> {
        info!(plugin = %self.info.id, "Hello World deactivated");
        Ok(())
    }

    async fn on_uninstall(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        ctx.store()
            .execute_script("DROP TABLE IF EXISTS hw_greetings;")
            .await?;
        ctx.logger().info("greetings table dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_plugin_api::testing::{in_memory_services, PluginTestHarness};
    use atrium_plugin_api::routes::ORGANIZATION_HEADER;
    use atrium_plugin_api::{EventHub, HostServices, RouteTable};
    use atrium_store::InMemoryStore;
    use axum::body::Body;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manifest() -> Manifest {
        Manifest::from_file(&plugin_dir().join("plugin.json")).unwrap()
    }

    #[test]
    fn test_manifest_is_valid() {
        let manifest = manifest();
        assert_eq!(manifest.id, "hello-world");
        assert_eq!(manifest.entry_point, ENTRY_POINT);
        assert_eq!(manifest.default_config()["greeting"], "Hello");
    }

    #[test]
    fn test_message_rendering() {
        let settings = GreetingSettings {
            greeting: "Hola".to_string(),
            shout: false,
        };
        assert_eq!(settings.message(None), "Hola!");
        assert_eq!(settings.message(Some("Ana")), "Hola, Ana!");

        let loud = GreetingSettings {
            shout: true,
            ..settings
        };
        assert_eq!(loud.message(Some("Ana")), "HOLA, ANA!");
    }

    #[tokio::test]
    async fn test_hello_route_uses_config() {
        let services = in_memory_services().await.unwrap();
        let plugin = HelloWorldPlugin::from_manifest(&manifest());
        let mut harness = PluginTestHarness::new(plugin, plugin_dir(), services);

        harness
            .activate(serde_json::json!({ "greeting": "Welcome" }))
            .await
            .unwrap();

        let (status, body) = harness.get("/api/plugins/hello-world/hello").await;
        assert_eq!(status, http::StatusCode::OK);
        let greeting: Greeting = serde_json::from_str(&body).unwrap();
        assert_eq!(greeting.message, "Welcome!");
        assert_eq!(greeting.organization, None);
    }

    #[tokio::test]
    async fn test_greet_publishes_event() {
        let services = in_memory_services().await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        services.events.on(GREETED_TOPIC, move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { HandlerResult::Ok(()) }
        });

        let plugin = HelloWorldPlugin::from_manifest(&manifest());
        let mut harness = PluginTestHarness::new(plugin, plugin_dir(), services);
        harness.activate(serde_json::json!({})).await.unwrap();

        let req = http::Request::builder()
            .method("POST")
            .uri("/api/plugins/hello-world/greet")
            .header("content-type", "application/json")
            .header(ORGANIZATION_HEADER, "acme")
            .body(Body::from(r#"{"name":"Ana"}"#))
            .unwrap();
        let response = harness.request(req).await;
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_insert_statement_quotes_values() {
        assert_eq!(
            insert_greeting_sql("Ana", "Hello, Ana!", Some("acme")),
            "INSERT INTO hw_greetings (name, message, organization_id) \
             VALUES ('Ana', 'Hello, Ana!', 'acme');"
        );
        assert_eq!(
            insert_greeting_sql("O'Brien'); DROP TABLE hw_greetings; --", "Hi", None),
            "INSERT INTO hw_greetings (name, message, organization_id) \
             VALUES ('O''Brien''); DROP TABLE hw_greetings; --', 'Hi', NULL);"
        );
    }

    #[tokio::test]
    async fn test_greet_records_greeting() {
        let store = InMemoryStore::new();
        store.ensure_schema().await.unwrap();
        let services = HostServices::new(
            Arc::new(store.clone()),
            EventHub::new(),
            RouteTable::new(),
        );

        let plugin = HelloWorldPlugin::from_manifest(&manifest());
        let mut harness = PluginTestHarness::new(plugin, plugin_dir(), services);
        harness
            .activate(serde_json::json!({ "greeting": "Hola" }))
            .await
            .unwrap();

        let req = http::Request::builder()
            .method("POST")
            .uri("/api/plugins/hello-world/greet")
            .header("content-type", "application/json")
            .header(ORGANIZATION_HEADER, "acme")
            .body(Body::from(r#"{"name":"Ana"}"#))
            .unwrap();
        let response = harness.request(req).await;
        assert_eq!(response.status(), http::StatusCode::OK);

        assert_eq!(
            store.executed_scripts(),
            vec![insert_greeting_sql("Ana", "Hola, Ana!", Some("acme"))]
        );
    }

    #[tokio::test]
    async fn test_install_runs_bundled_migrations() {
        let services = in_memory_services().await.unwrap();
        let store = Arc::clone(&services.store);
        let plugin = HelloWorldPlugin::from_manifest(&manifest());
        let harness = PluginTestHarness::new(plugin, plugin_dir(), services);

        harness.install().await.unwrap();

        let applied = store.list_migrations("hello-world").await.unwrap();
        let names: Vec<_> = applied.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["001_create_greetings.sql", "002_index_greetings.sql"]);
    }
}
