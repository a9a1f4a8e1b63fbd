// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use crate::config::Config;
use crate::connection::{ConnectionSignals, TeardownOrigin};
use crate::core::collaborators::Handlers;
use crate::server::ServerShutdown;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The state shared by the accept loop and every connection task.
#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    /// The shutdown flag and listener close guard. Every connection holds a
    /// reference to it for teardown.
    pub shutdown: Arc<ServerShutdown>,
    /// Parent of every connection's cancellation token.
    pub shutdown_token: CancellationToken,
    /// Live connections, keyed by session id.
    pub connections: DashMap<u64, Arc<ConnectionSignals>>,
    /// The collaborators every stream routes records into.
    pub handlers: Handlers,
}

impl ServerState {
    pub fn new(config: Config, handlers: Handlers) -> Arc<Self> {
        Arc::new(Self {
            config,
            shutdown: Arc::new(ServerShutdown::new()),
            shutdown_token: CancellationToken::new(),
            connections: DashMap::new(),
            handlers,
        })
    }

    /// Creates the signals for a newly accepted connection and registers them.
    pub fn register_connection(&self, session_id: u64) -> Arc<ConnectionSignals> {
        let signals = Arc::new(ConnectionSignals::new(
            session_id,
            self.shutdown_token.child_token(),
            self.shutdown.clone(),
        ));
        self.connections.insert(session_id, signals.clone());
        signals
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Tears down every live connection from the server side. Returns how many
    /// connections this call actually tore down.
    pub fn teardown_all(&self) -> usize {
        let live: Vec<Arc<ConnectionSignals>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let torn_down = live
            .iter()
            .filter(|signals| signals.teardown(TeardownOrigin::Server))
            .count();
        if torn_down > 0 {
            info!("Server-initiated teardown of {} connection(s).", torn_down);
        }
        torn_down
    }
}
