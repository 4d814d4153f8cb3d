//! Diminish Game Server
//!
//! Authoritative WebSocket server binary. Configuration comes from
//! the environment; see [`diminish::ServerConfig::from_env`].

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use diminish::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env().context("failed to read configuration")?;
    info!("diminish server v{VERSION}");
    info!(
        "bind {}, connection limit {}, records {}",
        config.bind_addr,
        config.max_connections,
        config
            .record_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "disabled".to_string()),
    );

    let server = GameServer::new(config);
    server.run().await.context("server failed")?;
    Ok(())
}
