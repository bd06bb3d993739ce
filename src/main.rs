use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pong_gameserver::config::ServerConfig;
use pong_gameserver::game::match_result::ResultStore;
use pong_gameserver::matchmaking::manager::SessionManager;
use pong_gameserver::net::connection::RouteTable;
use pong_gameserver::net::transport::GameServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {e}");
    }
    info!(
        "starting game server on {}:{} at {} Hz",
        config.bind_address, config.port, config.tick_rate
    );

    let routes = Arc::new(RouteTable::new());
    let (manager_tx, manager_rx) = mpsc::unbounded_channel();
    let (ended_tx, ended_rx) = mpsc::unbounded_channel();

    let manager = SessionManager::new(
        config.tick_rate,
        routes.clone(),
        ended_tx,
        ResultStore::new(config.result_store_url.clone()),
    );
    tokio::spawn(manager.run(manager_rx, ended_rx));

    let server = GameServer::bind(&config, routes, manager_tx).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}
