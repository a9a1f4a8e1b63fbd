// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::state::ConnectionState;
use crate::core::dispatch;
use crate::core::metrics;
use crate::core::protocol::{NexusFrameCodec, ServerRequest};
use crate::core::state::ServerState;
use crate::core::NexusError;
use futures::StreamExt;
use futures::future;
use futures::stream::SplitStream;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type FramedReader<S> = SplitStream<Framed<S, NexusFrameCodec<ServerRequest>>>;

/// Reads frames from one client and runs them through the dispatchers, one at
/// a time, on the connection's own task.
pub struct ConnectionHandler<S> {
    reader: FramedReader<S>,
    conn: ConnectionState,
    state: Arc<ServerState>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a new `ConnectionHandler` and registers the connection with the server.
    pub fn new(socket: S, addr: SocketAddr, state: Arc<ServerState>, session_id: u64) -> Self {
        let (writer, reader) = Framed::new(socket, NexusFrameCodec::new()).split();
        let signals = state.register_connection(session_id);
        let conn = ConnectionState::new(
            addr,
            Box::new(writer),
            signals,
            state.handlers.clone(),
            state.config.stream.clone(),
        );
        Self {
            reader,
            conn,
            state,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.conn.session_id()
    }

    /// The main event loop for the connection. Returns once the peer hangs up,
    /// the connection is torn down, or a fatal error ends it.
    pub async fn run(mut self) -> Result<(), NexusError> {
        let _guard = ConnectionGuard::new(self.state.clone(), self.conn.session_id(), self.conn.addr());
        let signals = self.conn.signals().clone();

        let result = loop {
            let transport_lost = self.conn.transport_lost();
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = signals.wait_done() => {
                    info!("Connection {} completed teardown.", self.conn.addr());
                    break Ok(());
                }
                _ = signals.cancellation().cancelled() => {
                    info!("Connection handler for {} received cancellation.", self.conn.addr());
                    break Ok(());
                }
                _ = lost(transport_lost.as_ref()) => {
                    warn!("Connection {}: responder lost the transport, closing.", self.conn.addr());
                    break Err(NexusError::TransportClosed);
                }
                frame = self.reader.next() => {
                    match frame {
                        Some(Ok(request)) => {
                            if let Err(e) = dispatch::handle_server_request(&mut self.conn, request).await {
                                if !e.is_fatal() {
                                    warn!("Session {}: {}", self.conn.session_id(), e);
                                    continue;
                                }
                                self.report_fatal(&e).await;
                                break Err(e);
                            }
                        }
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.conn.addr(), e);
                                break Ok(());
                            }
                            self.report_fatal(&e).await;
                            break Err(e);
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.conn.addr());
                            break Ok(());
                        }
                    }
                }
            }
        };

        self.conn.close().await;
        result
    }

    /// Reports an error that ends this connection only. The rest of the server
    /// keeps running.
    async fn report_fatal(&mut self, e: &NexusError) {
        if e.is_protocol_violation() {
            metrics::PROTOCOL_VIOLATIONS_TOTAL.inc();
        }
        warn!(
            "Session {}: closing connection from {}: {}",
            self.conn.session_id(),
            self.conn.addr(),
            e
        );
        self.conn.report_error(e).await;
    }
}

/// Resolves once the stream's responder lost the transport. Never resolves
/// before `InformInit`.
async fn lost(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => future::pending().await,
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &NexusError) -> bool {
    matches!(e, NexusError::Io(io_err) if matches!(
        io_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
