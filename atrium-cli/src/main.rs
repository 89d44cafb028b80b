//! Atrium CLI

mod shutdown;

use anyhow::{Context, Result};
use atrium_config::{load_config, HostConfig, PluginsConfig};
use atrium_plugin_runtime::{
    CatalogWatcher, LoaderConfig, ModuleTable, PluginLoader, PluginManager,
};
use atrium_store::SqliteStore;
use clap::{Parser, Subcommand};
use shutdown::ShutdownSignal;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "atrium")]
#[command(about = "Atrium plugin host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the admin API and plugin routes
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "atrium.yaml", env = "ATRIUM_CONFIG")]
        config: PathBuf,

        /// Log level, overriding the configuration (trace, debug, info, warn, error)
        #[arg(short, long)]
        log_level: Option<String>,

        /// Refresh the catalog when manifests change on disk
        #[arg(short, long)]
        watch: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "atrium.yaml", env = "ATRIUM_CONFIG")]
        config: PathBuf,
    },

    /// Discover plugins and print the catalog
    Plugins {
        /// Path to configuration file
        #[arg(short, long, default_value = "atrium.yaml", env = "ATRIUM_CONFIG")]
        config: PathBuf,

        /// Print manifests as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            log_level,
            watch,
        } => {
            let path = config;
            let config = load_config(&path)
                .with_context(|| format!("loading {}", path.display()))?;

            let level = log_level.as_deref().unwrap_or(&config.logging.level);
            init_tracing(level, config.logging.json)?;

            tracing::info!(config = %path.display(), "Starting Atrium");
            serve(config, watch).await
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.server.listen);
                    tracing::info!("  Plugins: {}", cfg.plugins.dir.display());
                    if let Some(packages) = &cfg.plugins.packages_dir {
                        tracing::info!("  Packages: {}", packages.display());
                    }
                    tracing::info!("  Database: {}", cfg.database.url);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Plugins { config, json } => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_env_filter(EnvFilter::new("warn"))
                .init();

            let config = load_config(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            list_plugins(&config.plugins, json).await
        }

        Commands::Version => {
            println!("Atrium plugin host");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

/// Entry modules compiled into this binary
fn modules() -> ModuleTable {
    ModuleTable::new().with(hello_world::ENTRY_POINT, hello_world::module())
}

fn loader(plugins: &PluginsConfig) -> PluginLoader {
    let config = LoaderConfig {
        plugins_dir: plugins.dir.clone(),
        packages_dir: plugins.packages_dir.clone(),
        package_prefix: plugins.package_prefix.clone(),
    };
    PluginLoader::new(config, modules())
}

async fn serve(config: HostConfig, watch: bool) -> Result<()> {
    let store = SqliteStore::connect(&config.database.url, config.database.pool_size)
        .await
        .context("connecting registry database")?;

    let manager = Arc::new(PluginManager::new(
        loader(&config.plugins),
        Arc::new(store),
    ));

    let report = manager.initialize().await?;
    tracing::info!(
        discovered = report.discovered,
        reactivated = report.reactivated.len(),
        skipped = report.skipped.len(),
        "Plugin manager initialized"
    );

    let _watcher = if watch || config.plugins.watch {
        Some(CatalogWatcher::new(Arc::clone(&manager)).spawn()?)
    } else {
        None
    };

    let listener = tokio::net::TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    tracing::info!(listen = %config.server.listen, "Server listening");

    let signal = ShutdownSignal::new();
    let app = atrium_admin::app(Arc::clone(&manager));
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(signal.wait())
            .into_future(),
    );

    tokio::select! {
        () = shutdown::os_signal() => {
            signal.trigger();
            match tokio::time::timeout(config.server.shutdown_timeout(), &mut server).await {
                Ok(joined) => joined??,
                Err(_) => {
                    tracing::warn!("In-flight requests did not finish in time");
                    server.abort();
                }
            }
        }
        joined = &mut server => joined??,
    }

    let stopped = manager.shutdown().await;
    tracing::info!(plugins = stopped, "Server stopped");
    Ok(())
}

async fn list_plugins(plugins: &PluginsConfig, json: bool) -> Result<()> {
    let loader = loader(plugins);
    let report = loader.discover().await;

    for rejected in &report.rejected {
        eprintln!("skipped: {rejected}");
    }

    let catalog = loader.all();
    if json {
        let manifests: Vec<_> = catalog.iter().map(|d| &d.manifest).collect();
        println!("{}", serde_json::to_string_pretty(&manifests)?);
        return Ok(());
    }

    if catalog.is_empty() {
        println!("No plugins found in {}", plugins.dir.display());
        return Ok(());
    }

    println!("{:<24} {:<10} {:<8} PATH", "ID", "VERSION", "ORIGIN");
    for descriptor in catalog {
        let resolvable = loader.modules().resolve(&descriptor.manifest.entry_point).is_some();
        println!(
            "{:<24} {:<10} {:<8} {}{}",
            descriptor.id(),
            descriptor.manifest.version,
            descriptor.origin,
            descriptor.path.display(),
            if resolvable { "" } else { "  (entry point not compiled in)" },
        );
    }
    Ok(())
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;

    let text = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_level(true)
    });
    let json = json.then(|| tracing_subscriber::fmt::layer().json());

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();

    Ok(())
}
