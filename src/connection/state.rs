// src/connection/state.rs

//! Defines the state held for a single client connection.

use super::signals::ConnectionSignals;
use crate::config::{DuplicateInitPolicy, StreamConfig};
use crate::core::NexusError;
use crate::core::collaborators::Handlers;
use crate::core::protocol::ServerResponse;
use crate::core::stream::{BoxedTransport, Stream};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Holds everything the dispatchers act on for one connection.
///
/// Before `InformInit` the connection owns the write half of its transport.
/// `InformInit` moves the transport into the new stream's responder; closing
/// the stream hands it back.
pub struct ConnectionState {
    session_id: u64,
    addr: SocketAddr,
    signals: Arc<ConnectionSignals>,
    stream: Option<Stream>,
    transport: Option<BoxedTransport>,
    handlers: Handlers,
    stream_config: StreamConfig,
    started: bool,
    finishing: bool,
}

impl ConnectionState {
    pub fn new(
        addr: SocketAddr,
        transport: BoxedTransport,
        signals: Arc<ConnectionSignals>,
        handlers: Handlers,
        stream_config: StreamConfig,
    ) -> Self {
        Self {
            session_id: signals.session_id(),
            addr,
            signals,
            stream: None,
            transport: Some(transport),
            handlers,
            stream_config,
            started: false,
            finishing: false,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn signals(&self) -> &Arc<ConnectionSignals> {
        &self.signals
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.stream_config
    }

    pub fn duplicate_init_policy(&self) -> DuplicateInitPolicy {
        self.stream_config.duplicate_init
    }

    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    /// The stream's transport-loss token, once a stream exists.
    pub fn transport_lost(&self) -> Option<CancellationToken> {
        self.stream.as_ref().map(Stream::transport_lost)
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// True once the client sent `InformStart`.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// True once the client sent `InformFinish`.
    pub fn is_finishing(&self) -> bool {
        self.finishing
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    pub(crate) fn mark_finishing(&mut self) {
        self.finishing = true;
    }

    pub(crate) fn attach_stream(&mut self, stream: Stream) {
        debug_assert!(self.stream.is_none(), "a stream may only be attached once");
        self.stream = Some(stream);
    }

    pub(crate) fn detach_stream(&mut self) -> Option<Stream> {
        self.stream.take()
    }

    pub(crate) fn take_transport(&mut self) -> Option<BoxedTransport> {
        self.transport.take()
    }

    pub(crate) fn restore_transport(&mut self, transport: BoxedTransport) {
        self.transport = Some(transport);
    }

    /// Sends an error frame to the client, best effort. Goes through the stream
    /// when one exists so the frame is ordered after earlier responses.
    pub async fn report_error(&mut self, error: &NexusError) {
        let frame = ServerResponse::Error {
            message: error.to_string(),
        };
        let sent = match (self.stream.as_ref(), self.transport.as_mut()) {
            (Some(stream), _) => stream.respond(frame),
            (None, Some(transport)) => transport.deliver(frame).await,
            (None, None) => Err(NexusError::TransportClosed),
        };
        if let Err(e) = sent {
            debug!(
                "Session {}: could not send error frame to client: {}",
                self.session_id, e
            );
        }
    }

    /// Stops the stream, waiting for it to drain, then closes the transport.
    pub async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            match stream.stop().await {
                Ok(Some(transport)) => self.transport = Some(transport),
                Ok(None) => {}
                Err(e) => warn!("Session {}: {}", self.session_id, e),
            }
        }
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            debug!(
                "Session {}: error while closing transport: {}",
                self.session_id, e
            );
        }
    }
}
