// src/server/shutdown.rs

//! Server-wide shutdown state shared by every connection task.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The operations a connection's teardown may invoke on its owning server.
pub trait ServerControl: Send + Sync + 'static {
    fn mark_shutdown(&self);

    /// Stops the server from accepting connections. Must be safe to call from
    /// several connections at once; the listener is closed only once.
    fn close_listener(&self);

    fn is_shutting_down(&self) -> bool;
}

/// The server's shutdown flag and the once-only listener close guard.
///
/// The listener itself is owned by the accept loop, which drops it as soon as
/// `listener_closed` resolves.
#[derive(Debug, Default)]
pub struct ServerShutdown {
    shutting_down: AtomicBool,
    listener_closed: AtomicBool,
    listener_token: CancellationToken,
}

impl ServerShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listener_closed(&self) -> bool {
        self.listener_closed.load(Ordering::Acquire)
    }

    /// Resolves once `close_listener` has been called.
    pub async fn listener_closed(&self) {
        self.listener_token.cancelled().await;
    }
}

impl ServerControl for ServerShutdown {
    fn mark_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("Server marked as shutting down.");
        }
    }

    fn close_listener(&self) {
        if self
            .listener_closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Closing listener; no further connections will be accepted.");
            self.listener_token.cancel();
        } else {
            debug!("Listener already closed.");
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}
