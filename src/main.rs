use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use softzen::api::cache::spawn_cleanup_task;
use softzen::config::Config;
use softzen::AppState;

#[derive(Parser, Debug)]
#[command(name = "softzen")]
#[command(author, version, about = "Therapeutic yoga practice tracker", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "softzen.toml", env = "SOFTZEN_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SoftZen v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!("Failed to create data directory: {}", config.server.data_dir.display())
    })?;

    let db = softzen::db::init(&config.server.data_dir, config.database.max_connections).await?;

    let state = Arc::new(AppState::new(config.clone(), db));

    spawn_cleanup_task(state.cache.clone(), config.cache.cleanup_interval_secs);

    let mut app = softzen::api::create_router(state.clone());

    // Browser client with SPA fallback, when shipped alongside the binary
    let static_dir = &config.server.static_dir;
    if static_dir.is_dir() {
        let serve_static = ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));
        app = app.fallback_service(serve_static);
        tracing::info!("Serving static files from {}", static_dir.display());
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.db.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
