// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use super::shutdown::ServerControl;
use crate::connection::ConnectionHandler;
use crate::core::metrics;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();
    let shutdown = ctx.state.shutdown.clone();

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = shutdown.listener_closed() => {
                info!("Listener closed by a connection teardown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                if shutdown.is_shutting_down() {
                    info!("Refusing connection from {} during shutdown.", addr);
                    continue;
                }
                let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                    warn!(
                        "Refusing connection from {}: max_connections ({}) reached.",
                        addr, ctx.state.config.max_connections
                    );
                    continue;
                };

                info!("Accepted new connection from: {}", addr);
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                session_id_counter = session_id_counter.wrapping_add(1);
                let session_id = session_id_counter;
                let handler = ConnectionHandler::new(socket, addr, ctx.state.clone(), session_id);

                client_tasks.spawn(
                    async move {
                        if let Err(e) = handler.run().await {
                            warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                        }
                        drop(permit);
                    }
                    .instrument(info_span!("connection", session_id, %addr)),
                );
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    // No connection may be accepted past this point.
    drop(ctx.listener);
    shutdown.mark_shutdown();
    shutdown.close_listener();

    info!("Shutting down. Tearing down all connections.");
    ctx.state.teardown_all();

    let grace = ctx.state.config.shutdown_grace;
    if tokio::time::timeout(grace, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!(
            "{} connection(s) still open after {:?}; aborting them.",
            client_tasks.len(),
            grace
        );
    }
    ctx.state.shutdown_token.cancel();
    client_tasks.shutdown().await;
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
    Ok(())
}
