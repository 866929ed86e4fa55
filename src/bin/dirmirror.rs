//! Dirmirror Binary
//!
//! Mirrors one directory in memory and serves it to WebSocket observers.

use anyhow::Context;
use clap::Parser;
use dirmirror::collaborators::{AllowAll, Authorizer, FsPersister, TokenAuthorizer};
use dirmirror::config::ConfigLoader;
use dirmirror::logging::init_logging;
use dirmirror::server::{router, ServerState};
use dirmirror::watch::MirrorDaemon;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "dirmirror", version, about = "Live in-memory directory mirror")]
struct Cli {
    /// Directory to mirror (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Configuration file path (default: ./dirmirror.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8080 (overrides config)
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(Some(&config.logging), Some(&config.root))?;

    let (handle, control_loop) = MirrorDaemon::start(&config, Arc::new(FsPersister)).await?;
    let authorizer: Arc<dyn Authorizer> = match &config.auth_token {
        Some(token) => Arc::new(TokenAuthorizer::new(token.clone())),
        None => Arc::new(AllowAll),
    };
    let app = router(ServerState::new(
        handle.clone(),
        authorizer,
        config.delivery.channel_capacity,
    ));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(listen = %config.listen, root = ?config.root, "Serving mirror");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    handle.shutdown()?;
    control_loop.await.context("Control loop panicked")?;
    Ok(())
}
