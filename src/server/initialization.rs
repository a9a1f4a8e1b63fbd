// src/server/initialization.rs

//! Handles server initialization, from binding the listener to publishing the
//! bound port.

use super::context::ServerContext;
use super::port_file::write_port_file;
use crate::config::Config;
use crate::core::collaborators::Handlers;
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config, handlers: Handlers) -> Result<ServerContext> {
    log_startup_info(&config);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let local_addr = listener.local_addr()?;
    info!("Nexus listening on {}", local_addr);

    if let Some(path) = &config.port_filename {
        write_port_file(path, local_addr.port())?;
        info!("Wrote port file to {}", path.display());
    }

    let connection_permits = Arc::new(Semaphore::new(config.max_connections));
    let state = ServerState::new(config, handlers);
    info!("Server state initialized.");

    Ok(ServerContext {
        state,
        listener,
        local_addr,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}

fn log_startup_info(config: &Config) {
    info!("Nexus version {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Streams: inbound capacity {}, drain timeout {:?}, duplicate init policy {:?}.",
        config.stream.inbound_capacity, config.stream.drain_timeout, config.stream.duplicate_init
    );
}
