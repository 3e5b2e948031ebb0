//! tbo-vl (Video Library) - entitlement and watch-progress service
//!
//! Serves playback access decisions, accepts confirmed payments and
//! progress reports, and streams entitlement events over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tbo_common::api::load_shared_secret;
use tbo_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use tbo_common::db::init_database;
use tbo_common::events::EventBus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tbo_vl::config::EngineSettings;
use tbo_vl::{build_router, AppState, EntitlementEngine};

const DEFAULT_PORT: u16 = 5820;
const DEFAULT_LOG_FILTER: &str = "tbo_vl=info,tbo_common=info,tower_http=info";

/// Command-line arguments for tbo-vl
#[derive(Parser, Debug)]
#[command(name = "tbo-vl")]
#[command(about = "Video library entitlement and watch-progress service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "TBO_VL_PORT")]
    port: Option<u16>,

    /// Root folder holding tbo.db
    #[arg(short, long, env = "TBO_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed or refresh the catalog from a TOML file before serving
    #[arg(long)]
    import_catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default(args.config.as_deref());

    init_tracing(&toml_config)?;

    info!(
        "Starting TBO Video Library (tbo-vl) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new("video-library")
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    if let Some(catalog_path) = &args.import_catalog {
        tbo_vl::db::import_catalog_file(&pool, catalog_path)
            .await
            .with_context(|| format!("Failed to import catalog {}", catalog_path.display()))?;
    }

    let shared_secret = load_shared_secret(&pool)
        .await
        .context("Failed to load API shared secret")?;
    if shared_secret == 0 {
        info!("API authentication disabled (shared_secret = 0)");
    } else {
        info!("Loaded shared secret for API authentication");
    }

    let settings = EngineSettings::load(&pool)
        .await
        .context("Failed to load engine settings")?;
    let event_bus = EventBus::new(settings.event_bus_capacity);
    let engine = EntitlementEngine::new(pool, event_bus, settings);

    let app = build_router(AppState::new(engine, shared_secret));

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("tbo-vl listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the config file's `[logging] level`
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.logging.level.trim();
        if level.is_empty() || level.eq_ignore_ascii_case("info") {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        } else {
            EnvFilter::new(level)
        }
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
