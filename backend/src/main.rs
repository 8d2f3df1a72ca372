//! Sluice server.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use sluice::{
    config::{Config, ConfigOverrides},
    create_app_with_config,
    logging::init_logging,
    resources::{DirectoryProvider, ResourceProvider, StaticCatalog},
    state::AppState,
    tls,
};

/// How long open streams get to finish after a shutdown signal.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Sluice - session-bound resource streaming over Server-Sent Events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SLUICE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Additional TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve the files of this directory instead of the bundled sample catalog
    #[arg(long)]
    resources_dir: Option<PathBuf>,

    /// Log level or filter directives (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            config_file: self.config.clone(),
            resources_dir: self.resources_dir.clone(),
            log_level: self.log_level.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(&args.overrides())?;
    let _log_guard = init_logging(config.log_level.as_deref(), config.log_file.as_deref())?;

    info!("Starting Sluice server...");
    info!("Configuration loaded");

    let provider: Arc<dyn ResourceProvider> = match &config.resources_dir {
        Some(dir) => {
            info!("Serving resources from {}", dir.display());
            Arc::new(DirectoryProvider::new(dir)?)
        }
        None => {
            let catalog = StaticCatalog::sample();
            info!("Serving bundled sample catalog ({} resources)", catalog.len());
            Arc::new(catalog)
        }
    };

    let state = AppState::new(provider, config.session.registry_settings());
    let sweeper = state
        .service()
        .spawn_sweeper(config.session.sweep_interval);
    let app = create_app_with_config(state.clone(), config.cors_allowed_origins.clone());

    let addr = config.socket_addr()?;
    let handle = axum_server::Handle::new();

    // Set up graceful shutdown handler
    let shutdown_handle = handle.clone();
    let shutdown_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down gracefully...");

        // Closing the sessions ends every open event stream.
        shutdown_state.service().shutdown();
        shutdown_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
    });

    match &config.tls {
        Some(tls_config) => {
            let rustls_config = tls::load_rustls_config(tls_config).await?;
            info!("Server listening on https://{}", addr);
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Server listening on http://{}", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    sweeper.abort();
    info!("Server shut down");
    Ok(())
}
