use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use wagate::broadcast::Broadcaster;
use wagate::config::Config;
use wagate::gateway::Gateway;
use wagate::scheduler::Scheduler;
use wagate::{cli, logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything else (silently ignore if missing)
    dotenvy::dotenv().ok();

    let cli_args = cli::Cli::parse();

    let mut config = match &cli_args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli_args.port {
        config.server.port = port;
    }

    let mut log_config = logging::LogConfig::new()
        .with_debug_mode(cli_args.debug)
        .with_filter(config.logging.level.clone());
    if cli_args.debug {
        log_config = log_config.with_log_dir(config.whatsapp.log_dir());
    }
    let _guard = logging::init_logging(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    tracing::info!("wagate v{} starting", wagate::VERSION);

    let broadcaster = Arc::new(Broadcaster::new());
    let gateway = Gateway::new(config.whatsapp.clone(), broadcaster.clone());
    let scheduler = Scheduler::new(gateway.clone(), broadcaster.clone());
    gateway.attach_scheduler(scheduler.clone());

    // Bring the WhatsApp session up in the background; the HTTP API is
    // reachable immediately and reports status while pairing/connecting.
    let connecting = gateway.clone();
    let _ = tokio::spawn(async move {
        connecting.connect().await;
    });

    let state = server::AppState {
        gateway,
        scheduler,
        broadcaster,
    };
    server::run(state, &config.server).await
}
