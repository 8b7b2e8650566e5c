//! Lumen Stream Relay - main entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumen_sr::api::{self, AppContext};
use lumen_sr::cache::ResolutionCache;
use lumen_sr::config::{default_root_folder, Config};
use lumen_sr::events::EventBus;
use lumen_sr::player::PlayerClient;
use lumen_sr::renderer::RendererMonitor;
use lumen_sr::resolver::CommandResolver;
use lumen_sr::sequencer::Sequencer;
use lumen_sr::state::SharedState;

/// Command-line arguments for lumen-sr
#[derive(Parser, Debug)]
#[command(name = "lumen-sr")]
#[command(about = "Local stream relay and playback sequencer")]
#[command(version)]
struct Args {
    /// Control-surface port
    #[arg(short, long, env = "LUMEN_SR_PORT")]
    port: Option<u16>,

    /// Local stream endpoint port
    #[arg(short, long, env = "LUMEN_SR_STREAM_PORT")]
    stream_port: Option<u16>,

    /// Folder holding the reference log and resolution cache
    #[arg(short, long, env = "LUMEN_SR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumen_sr=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let root_folder = args.root_folder.unwrap_or_else(default_root_folder);
    let config = Config::load(root_folder, args.port, args.stream_port)
        .context("Failed to load configuration")?;

    info!(
        "Starting Lumen Stream Relay on port {} (stream port {})",
        config.control_port, config.stream_port
    );
    info!("Root folder: {}", config.root_folder.display());

    let state = SharedState::new();
    let events = EventBus::new(64);
    let cache = Arc::new(ResolutionCache::open(config.cache_path()));
    let resolver = Arc::new(CommandResolver::new(
        config.resolver_command.clone(),
        config.active_profile().selector.clone(),
    ));
    let renderer = Arc::new(RendererMonitor::connect(config.system_db.as_deref()).await);
    let player = Arc::new(PlayerClient::new(
        config.player_host.clone(),
        config.player_port,
        config.player_source.clone(),
    ));

    let control_port = config.control_port;
    let sequencer = Sequencer::start(
        config,
        state,
        events.clone(),
        resolver,
        cache,
        renderer,
        player,
    );
    info!("Sequencer initialized");

    let ctx = AppContext { sequencer, events };
    api::run(control_port, ctx, shutdown_signal()).await?;

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
