// src/core/stream/mod.rs

//! The per-connection stream: an inbound work queue, an outbound response
//! queue, and one responder task that drains both.
//!
//! The connection task only ever enqueues. Record processing and response
//! delivery happen on the responder, so a slow client or a slow collaborator
//! never blocks the dispatch of the next inbound message beyond the inbound
//! queue's backpressure. Responses leave in the order they were queued.

mod responder;
pub mod transport;

pub use transport::{BoxedTransport, FramedWriter, Transport};

use crate::config::StreamConfig;
use crate::core::NexusError;
use crate::core::collaborators::{Handlers, StreamContext};
use crate::core::dispatch::{DeliveryMode, post_teardown};
use crate::core::metrics;
use crate::core::protocol::{Record, ServerResponse};
use responder::Responder;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Running,
    /// Stop was signalled; work queued before it is still being processed.
    Draining,
    Stopped,
}

/// One classified record waiting on the inbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamWork {
    pub mode: DeliveryMode,
    pub record: Record,
}

/// The active processing pipeline for one connection.
pub struct Stream {
    context: StreamContext,
    config: StreamConfig,
    handlers: Handlers,
    cancel: CancellationToken,
    /// Fired by the responder when a write to the client fails.
    transport_lost: CancellationToken,
    state_tx: Arc<watch::Sender<StreamState>>,
    inbound_tx: Option<mpsc::Sender<StreamWork>>,
    outbound_tx: Option<mpsc::UnboundedSender<ServerResponse>>,
    pending: Option<Responder>,
    responder: Option<JoinHandle<BoxedTransport>>,
}

impl Stream {
    /// Creates an uninitialized stream. `cancel` must be derived from the owning
    /// connection's token so that a teardown reaches the responder.
    pub fn new(
        context: StreamContext,
        config: StreamConfig,
        handlers: Handlers,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Uninitialized);
        Self {
            context,
            config,
            handlers,
            cancel,
            transport_lost: CancellationToken::new(),
            state_tx: Arc::new(state_tx),
            inbound_tx: None,
            outbound_tx: None,
            pending: None,
            responder: None,
        }
    }

    pub fn context(&self) -> &StreamContext {
        &self.context
    }

    pub fn state(&self) -> StreamState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    /// True once the responder failed to write to the client. The stream stops
    /// on its own after that and the connection must close.
    pub fn is_transport_lost(&self) -> bool {
        self.transport_lost.is_cancelled()
    }

    /// A token that fires when the responder loses the transport.
    pub fn transport_lost(&self) -> CancellationToken {
        self.transport_lost.clone()
    }

    /// Creates the queues and the responder. May only succeed once per stream.
    pub fn init(&mut self) -> Result<(), NexusError> {
        if self.state() != StreamState::Uninitialized {
            return Err(NexusError::Internal(format!(
                "stream {} is already initialized",
                self.context
            )));
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        self.pending = Some(Responder {
            context: self.context.clone(),
            handlers: self.handlers.clone(),
            inbound_rx,
            outbound_rx,
            outbound_tx: outbound_tx.clone(),
            state_tx: self.state_tx.clone(),
            cancel: self.cancel.clone(),
            transport_lost: self.transport_lost.clone(),
            drain_timeout: self.config.drain_timeout,
        });
        self.inbound_tx = Some(inbound_tx);
        self.outbound_tx = Some(outbound_tx);
        self.state_tx.send_replace(StreamState::Running);
        debug!("Stream {}: initialized.", self.context);
        Ok(())
    }

    /// Spawns the responder with exclusive ownership of `transport`. The task is
    /// not awaited here; `stop` collects it.
    pub fn start_responder(&mut self, transport: BoxedTransport) -> Result<(), NexusError> {
        let responder = self.pending.take().ok_or_else(|| {
            NexusError::Internal(format!(
                "stream {} has no responder to start",
                self.context
            ))
        })?;
        metrics::ACTIVE_STREAMS.inc();
        self.responder = Some(tokio::spawn(responder.run(transport)));
        Ok(())
    }

    /// Places classified work on the inbound queue, waiting only if the queue is full.
    ///
    /// Fails with `TransportClosed` once the responder lost the client, and with
    /// `PostTeardownMessage` once the stream was stopped.
    pub async fn enqueue(&self, work: StreamWork) -> Result<(), NexusError> {
        if self.is_transport_lost() {
            return Err(NexusError::TransportClosed);
        }
        match self.state() {
            StreamState::Running if !self.cancel.is_cancelled() => {}
            StreamState::Uninitialized => return Err(NexusError::StreamNotInitialized),
            _ => return Err(post_teardown(work.record.kind())),
        }
        let tx = self
            .inbound_tx
            .as_ref()
            .ok_or(NexusError::StreamNotInitialized)?;
        match tx.send(work).await {
            Ok(()) => Ok(()),
            Err(_) if self.is_transport_lost() => Err(NexusError::TransportClosed),
            Err(rejected) => Err(post_teardown(rejected.0.record.kind())),
        }
    }

    /// Queues a response for delivery without going through a collaborator.
    /// Never waits.
    pub fn respond(&self, response: ServerResponse) -> Result<(), NexusError> {
        if self.is_transport_lost() {
            return Err(NexusError::TransportClosed);
        }
        let tx = self
            .outbound_tx
            .as_ref()
            .ok_or(NexusError::StreamNotInitialized)?;
        tx.send(response).map_err(|_| NexusError::TransportClosed)
    }

    /// Signals the responder to drain and exit without waiting for it.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Signals the responder, waits for it to drain, and returns the transport
    /// it owned so the connection can reuse or close it.
    pub async fn stop(mut self) -> Result<Option<BoxedTransport>, NexusError> {
        self.cancel.cancel();
        self.inbound_tx.take();

        if self.pending.take().is_some() {
            self.state_tx.send_replace(StreamState::Stopped);
            return Ok(None);
        }

        match self.responder.take() {
            Some(handle) => handle.await.map(Some).map_err(|e| {
                NexusError::Internal(format!(
                    "responder for stream {} failed: {e}",
                    self.context
                ))
            }),
            None => Ok(None),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
