//! Binary entry point: load the catalog and state, connect the gateway,
//! and run the event loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use hornbill::config::Config;
use hornbill::gateway::events::spawn_event_listener;
use hornbill::gateway::HttpGateway;
use hornbill::logging::{self, LogMode};
use hornbill::router::MessageRouter;
use hornbill::services;
use hornbill::state::{SqliteStore, StateManager, StateStore};

/// Buffer size for the gateway event channel.
const EVENT_CHANNEL_SIZE: usize = 100;

#[derive(Parser)]
#[command(name = "hornbill", about = "Declarative WhatsApp bot framework")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "hornbill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot.
    Start,
    /// Write a starter configuration file and exit.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Init => {
            logging::init(LogMode::Cli)?;
            if cli.config.exists() {
                anyhow::bail!("{} already exists", cli.config.display());
            }
            std::fs::write(&cli.config, Config::example_toml())
                .with_context(|| format!("failed to write {}", cli.config.display()))?;
            info!(path = %cli.config.display(), "starter config written");
            Ok(())
        }
        Command::Start => start(&cli.config).await,
    }
}

async fn start(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let _logging = logging::init(LogMode::Production {
        logs_dir: std::path::Path::new(&config.storage.logs_dir),
    })?;
    info!("hornbill starting");

    // Environment overrides for deployments.
    let database_url =
        std::env::var("HORNBILL_DATABASE_URL").unwrap_or_else(|_| config.storage.database_url.clone());
    let gateway_url =
        std::env::var("HORNBILL_GATEWAY_URL").unwrap_or_else(|_| config.gateway.base_url.clone());

    let loader = Arc::new(services::default_loader().context("failed to load command catalog")?);
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStore::open(&database_url)
            .await
            .context("failed to open state database")?,
    );
    let state = Arc::new(
        StateManager::load(store, &config.bot.initial_root_user)
            .await
            .context("failed to load bot state")?,
    );
    let gateway = Arc::new(HttpGateway::new(
        gateway_url.clone(),
        config.gateway.request_timeout_secs,
    ));
    let router = MessageRouter::new(loader, state, gateway, config.router_options()?);

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let listener = spawn_event_listener(gateway_url, event_tx);
    info!("event listener running, waiting for messages");

    // Events are processed strictly in arrival order; the router's per-chat
    // locks keep that safe even if callers dispatch concurrently.
    while let Some(event) = event_rx.recv().await {
        router.handle_event(&event).await;
    }

    warn!("event stream ended, shutting down");
    listener.abort();
    Ok(())
}
