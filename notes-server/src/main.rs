//! Notes relay server.
//!
//! Reads configuration from the environment (`NOTES_BIND_ADDR`, `PORT`,
//! `NOTES_BROADCAST_CAPACITY`, `NOTES_MAX_ROOMS_PER_CONNECTION`) and serves
//! the real-time relay until killed. The relay never touches note storage.

use log::info;

use notes_collab::server::{RelayServer, ServerConfig, ServerResult};

#[tokio::main]
async fn main() -> ServerResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    info!("Starting notes relay with {config:?}");

    RelayServer::new(config).run().await
}
