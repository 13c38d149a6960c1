//! JamQ Host (jamq-host) - Main entry point
//!
//! The daemon a party host runs: guests submit track suggestions from
//! their phones, the host approves them into a play queue, and the host
//! page's embedded player gets driven over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jamq_common::events::ChangeFeed;

use jamq_host::api::{build_router, AppContext};
use jamq_host::catalog::CatalogClient;
use jamq_host::config::{Config, ConfigOverrides, StoreBackend};
use jamq_host::engine::SessionRegistry;
use jamq_host::resolver::MediaResolver;
use jamq_host::store::{self, MemoryTrackStore, SqliteTrackStore, TrackStore};
use jamq_host::submit::SubmissionGateway;

/// Command-line arguments for jamq-host
#[derive(Parser, Debug)]
#[command(name = "jamq-host")]
#[command(about = "Party queue host daemon for JamQ")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "JAMQ_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "JAMQ_PORT")]
    port: Option<u16>,

    /// Database file path (overrides the config file)
    #[arg(long, env = "JAMQ_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Run against the in-memory store; nothing survives a restart
    #[arg(long, env = "JAMQ_MEMORY_STORE")]
    memory_store: bool,

    /// YouTube Data API key for the primary resolution provider
    #[arg(long, env = "JAMQ_YOUTUBE_API_KEY", hide_env_values = true)]
    youtube_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jamq_host=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting JamQ Host (jamq-host) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config =
        Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(ConfigOverrides {
        port: args.port,
        db_path: args.db_path,
        memory_store: args.memory_store,
        youtube_api_key: args.youtube_api_key,
    });

    let feed = ChangeFeed::new(config.store.change_feed_capacity);
    let track_store: Arc<dyn TrackStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory track store (nothing survives a restart)");
            Arc::new(MemoryTrackStore::new(feed))
        }
        StoreBackend::Sqlite => {
            config
                .store
                .ensure_db_dir()
                .context("Failed to create database directory")?;
            let db_path = config.store.resolved_db_path();
            info!("Database path: {}", db_path.display());

            let pool = store::sqlite::connect(&db_path)
                .await
                .context("Failed to open database")?;
            store::sqlite::init_schema(&pool)
                .await
                .context("Failed to initialize database schema")?;
            Arc::new(SqliteTrackStore::new(pool, feed))
        }
    };

    let resolver = Arc::new(
        MediaResolver::from_config(&config.resolver)
            .context("Failed to build media resolution chain")?,
    );
    if config.resolver.youtube_api_key.is_some() {
        info!("Media resolution: official API plus mirror fallbacks");
    } else {
        info!("Media resolution: no API key configured, mirrors only");
    }

    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&track_store),
        resolver,
        config.engine.clone(),
    ));
    let gateway = SubmissionGateway::new(Arc::clone(&track_store));
    let catalog = CatalogClient::new().context("Failed to build catalog client")?;

    let app = build_router(AppContext {
        store: track_store,
        registry,
        gateway,
        catalog,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("jamq-host listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
