// src/server/spawner.rs

//! Spawns the server's background tasks.

use super::context::ServerContext;
use super::metrics_server::run_metrics_server;
use tracing::info;

/// Spawns every background task the configuration asks for.
pub fn spawn_all(ctx: &mut ServerContext) {
    if ctx.state.config.metrics.enabled {
        let state = ctx.state.clone();
        let shutdown = ctx.state.shutdown_token.clone();
        ctx.background_tasks
            .spawn(async move { run_metrics_server(state, shutdown).await });
        info!("Metrics server task spawned.");
    }
}
