// src/core/stream/responder.rs

//! The single concurrent task behind every stream.

use super::{StreamState, StreamWork};
use super::transport::BoxedTransport;
use crate::core::NexusError;
use crate::core::collaborators::{Handlers, StreamContext};
use crate::core::dispatch::data;
use crate::core::metrics;
use crate::core::protocol::ServerResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drains a stream's inbound queue through the collaborators and delivers
/// every resulting response, in queue order, to the connection's transport.
pub(crate) struct Responder {
    pub(super) context: StreamContext,
    pub(super) handlers: Handlers,
    pub(super) inbound_rx: mpsc::Receiver<StreamWork>,
    pub(super) outbound_rx: mpsc::UnboundedReceiver<ServerResponse>,
    pub(super) outbound_tx: mpsc::UnboundedSender<ServerResponse>,
    pub(super) state_tx: Arc<watch::Sender<StreamState>>,
    pub(super) cancel: CancellationToken,
    pub(super) transport_lost: CancellationToken,
    pub(super) drain_timeout: Duration,
}

impl Responder {
    /// Runs until the stream's cancellation token fires or the transport fails,
    /// then drains and hands the transport back to whoever stops the stream.
    pub(crate) async fn run(mut self, mut transport: BoxedTransport) -> BoxedTransport {
        debug!("Stream {}: responder started.", self.context);
        let mut transport_ok = true;

        let deadline = loop {
            tokio::select! {
                // Outbound before inbound: a reply is written before the next record is processed.
                biased;
                _ = self.cancel.cancelled() => break Instant::now() + self.drain_timeout,
                Some(response) = self.outbound_rx.recv() => {
                    let (delivered, stopped) = self.deliver_until_stopped(&mut transport, response).await;
                    if !delivered {
                        transport_ok = false;
                        break stopped.unwrap_or_else(|| Instant::now() + self.drain_timeout);
                    }
                    if let Some(deadline) = stopped {
                        break deadline;
                    }
                }
                Some(work) = self.inbound_rx.recv() => {
                    if let Some(deadline) = self.process_until_stopped(work).await {
                        break deadline;
                    }
                }
            }
        };

        self.state_tx.send_replace(StreamState::Draining);
        if tokio::time::timeout_at(deadline, self.drain(&mut transport, transport_ok))
            .await
            .is_err()
        {
            let dropped = self.inbound_rx.len() + self.outbound_rx.len();
            warn!(
                "Stream {}: drain timed out after {:?}, dropping {} pending item(s).",
                self.context, self.drain_timeout, dropped
            );
        }

        self.handlers.run_manager.on_stream_stopped(&self.context).await;
        self.state_tx.send_replace(StreamState::Stopped);
        metrics::ACTIVE_STREAMS.dec();
        info!("Stream {}: responder stopped.", self.context);
        transport
    }

    /// Processes one record. If the stop signal arrives while the record is in
    /// flight, the record may finish until the drain deadline, which is returned.
    async fn process_until_stopped(&mut self, work: StreamWork) -> Option<Instant> {
        let cancel = self.cancel.clone();
        let drain_timeout = self.drain_timeout;
        let processing = self.process(work);
        tokio::pin!(processing);

        tokio::select! {
            biased;
            _ = &mut processing => return None,
            _ = cancel.cancelled() => {}
        }

        let deadline = Instant::now() + drain_timeout;
        let _ = tokio::time::timeout_at(deadline, processing).await;
        Some(deadline)
    }

    /// Delivers one response. If the stop signal arrives while the write is
    /// pending, the write may finish until the drain deadline, which is returned.
    /// A failed or timed out write marks the transport as lost.
    async fn deliver_until_stopped(
        &self,
        transport: &mut BoxedTransport,
        response: ServerResponse,
    ) -> (bool, Option<Instant>) {
        let delivery = transport.deliver(response);
        tokio::pin!(delivery);

        tokio::select! {
            biased;
            result = &mut delivery => return (self.delivered(result), None),
            _ = self.cancel.cancelled() => {}
        }

        let deadline = Instant::now() + self.drain_timeout;
        let result = tokio::time::timeout_at(deadline, delivery)
            .await
            .unwrap_or(Err(NexusError::TransportClosed));
        (self.delivered(result), Some(deadline))
    }

    fn delivered(&self, result: Result<(), NexusError>) -> bool {
        match result {
            Ok(()) => {
                metrics::RESPONSES_DELIVERED_TOTAL.inc();
                true
            }
            Err(e) => {
                warn!("Stream {}: failed to deliver response: {}", self.context, e);
                self.transport_lost.cancel();
                false
            }
        }
    }

    /// Processes everything enqueued before the stop signal. New work is refused
    /// from here on because the inbound queue is closed first.
    async fn drain(&mut self, transport: &mut BoxedTransport, mut transport_ok: bool) {
        self.inbound_rx.close();
        loop {
            while let Ok(response) = self.outbound_rx.try_recv() {
                transport_ok = self.deliver_if(transport, transport_ok, response).await;
            }
            match self.inbound_rx.recv().await {
                Some(work) => self.process(work).await,
                None => break,
            }
        }
        while let Ok(response) = self.outbound_rx.try_recv() {
            transport_ok = self.deliver_if(transport, transport_ok, response).await;
        }
    }

    async fn deliver_if(
        &self,
        transport: &mut BoxedTransport,
        transport_ok: bool,
        response: ServerResponse,
    ) -> bool {
        if !transport_ok {
            debug!(
                "Stream {}: transport is gone, dropping response.",
                self.context
            );
            return false;
        }
        self.delivered(transport.deliver(response).await)
    }

    async fn process(&mut self, work: StreamWork) {
        let started = Instant::now();
        let kind = work.record.kind();
        match data::execute(&self.handlers, &self.context, work).await {
            Ok(Some(response)) => self.queue(response),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Stream {}: failed to process {} record: {}",
                    self.context, kind, e
                );
                self.queue(ServerResponse::Error {
                    message: e.to_string(),
                });
            }
        }
        metrics::RECORD_PROCESSING_SECONDS.observe(started.elapsed().as_secs_f64());
    }

    fn queue(&self, response: ServerResponse) {
        // The receiver lives in this task, so the send cannot fail while we run.
        let _ = self.outbound_tx.send(response);
    }
}
