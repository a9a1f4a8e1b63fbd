// src/server/mod.rs

use crate::config::Config;
use crate::core::collaborators::Handlers;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod port_file;
mod shutdown;
mod spawner;

pub use context::ServerContext;
pub use initialization::setup;
pub use port_file::{read_port_file, write_port_file};
pub use shutdown::{ServerControl, ServerShutdown};

/// The main server startup function, using the in-memory run tracker as the
/// record collaborators.
pub async fn run(config: Config) -> Result<()> {
    run_with_handlers(config, Handlers::default()).await
}

/// Starts the server with caller-supplied collaborators and runs until shutdown.
pub async fn run_with_handlers(config: Config, handlers: Handlers) -> Result<()> {
    // 1. Bind the listener, publish the port, build shared state.
    let server_context = setup(config, handlers).await?;

    // 2. Accept connections until a signal or a teardown closes the listener.
    serve(server_context).await
}

/// Spawns background tasks and runs the accept loop on an already initialized
/// context. Returns once every connection has been closed.
pub async fn serve(mut server_context: ServerContext) -> Result<()> {
    spawner::spawn_all(&mut server_context);
    connection_loop::run(server_context).await
}
