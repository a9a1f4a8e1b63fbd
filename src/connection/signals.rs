// src/connection/signals.rs

//! Defines `ConnectionSignals`, the shareable part of a connection that
//! coordinates its shutdown.

use crate::server::ServerControl;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Who asked for a connection to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOrigin {
    /// The client sent `InformTeardown`.
    Client,
    /// The server is stopping and tears down every live connection.
    Server,
}

impl fmt::Display for TeardownOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownOrigin::Client => f.write_str("client"),
            TeardownOrigin::Server => f.write_str("server"),
        }
    }
}

/// The completion signal, cancellation token and server back-reference of one
/// connection. Held by the connection itself and by the server's registry, so
/// a teardown can be triggered from either side.
pub struct ConnectionSignals {
    session_id: u64,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    torn_down: AtomicBool,
    server: Arc<dyn ServerControl>,
}

impl ConnectionSignals {
    /// `cancel` is created once per connection and shared with every task that
    /// must observe the teardown, the stream responder in particular.
    pub fn new(session_id: u64, cancel: CancellationToken, server: Arc<dyn ServerControl>) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            session_id,
            cancel,
            done_tx,
            torn_down: AtomicBool::new(false),
            server,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Waits until the connection's completion signal fires.
    pub async fn wait_done(&self) {
        let mut done_rx = self.subscribe_done();
        let _ = done_rx.wait_for(|done| *done).await;
    }

    /// Runs the teardown sequence: signal completion, cancel the connection's
    /// token, mark the server as shutting down, close its listener.
    ///
    /// Only the first call has any effect. Returns `false` for every later call.
    pub fn teardown(&self, origin: TeardownOrigin) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!(
                "Session {}: {} teardown ignored, already torn down.",
                self.session_id, origin
            );
            return false;
        }

        info!("Session {}: tearing down ({}).", self.session_id, origin);
        self.done_tx.send_replace(true);
        self.cancel.cancel();
        self.server.mark_shutdown();
        self.server.close_listener();
        true
    }
}

impl fmt::Debug for ConnectionSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSignals")
            .field("session_id", &self.session_id)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
