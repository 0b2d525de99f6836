#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use smb2_engine::clock::SystemClock;
use smb2_engine::config;
use smb2_engine::server::{self, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(flag) if flag == "--config" => args.next().context("--config needs a path")?,
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    let config = config::load_config(&config_path)?;
    let addr = format!("{}:{}", config.bind_address, config.port);
    info!(
        "Shares: {}",
        config
            .shares
            .iter()
            .map(|s| match &s.path {
                Some(path) => format!("{}={}", s.name, path.display()),
                None => format!("{}=<memory>", s.name),
            })
            .collect::<Vec<_>>()
            .join(", ")
    );

    let engine = Arc::new(Engine::new(config, Arc::new(SystemClock))?);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = server::serve(listener, engine, shutdown_rx);
    tokio::pin!(server);

    // Handle graceful shutdown
    tokio::select! {
        result = &mut server => return result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            let _ = shutdown_tx.send(true);
        }
    }
    server.await?;
    Ok(())
}
