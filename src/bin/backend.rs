use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vodhot::{
    api::{self, AppState},
    config::{self, ScoreBackend},
    hotness::{HotnessLedger, MemoryScoreStore, ScoreStore, SqliteScoreStore},
    metadata::MetadataStore,
};

#[derive(Parser, Debug)]
#[command(name = "vodhot-backend", about = "Video engagement API with hotness ranking")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides the configured listen host
    #[arg(long)]
    host: Option<String>,

    /// Overrides the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut cfg = config::load_server_config_from(&cli.config)?;
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }

    let store: Arc<dyn ScoreStore> = match cfg.score_store {
        ScoreBackend::Memory => Arc::new(MemoryScoreStore::new()),
        ScoreBackend::Sqlite => Arc::new(
            SqliteScoreStore::open(&cfg.hot_db).context("initializing hotness store")?,
        ),
    };
    info!(backend = ?cfg.score_store, timeout = ?cfg.store_timeout, "hotness ledger ready");
    let ledger = HotnessLedger::with_timeout(store, cfg.store_timeout);

    let metadata =
        MetadataStore::open(&cfg.metadata_db).context("initializing metadata store")?;
    let app = api::router(AppState::new(metadata, ledger));

    let addr = cfg.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}
