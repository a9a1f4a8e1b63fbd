// src/core/stream/transport.rs

//! The write side of a client connection, as seen by a stream's responder.

use crate::core::NexusError;
use crate::core::protocol::{NexusFrameCodec, ServerRequest, ServerResponse};
use async_trait::async_trait;
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Accepts outbound responses for delivery to the client. Exactly one
/// responder owns a transport at a time.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn deliver(&mut self, response: ServerResponse) -> Result<(), NexusError>;

    /// Flushes and closes the underlying connection, if it has one.
    async fn close(&mut self) -> Result<(), NexusError> {
        Ok(())
    }
}

pub type BoxedTransport = Box<dyn Transport>;

/// The write half of a framed client socket.
pub type FramedWriter<S> = SplitSink<Framed<S, NexusFrameCodec<ServerRequest>>, ServerResponse>;

#[async_trait]
impl<S> Transport for FramedWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn deliver(&mut self, response: ServerResponse) -> Result<(), NexusError> {
        self.send(response).await
    }

    async fn close(&mut self) -> Result<(), NexusError> {
        SinkExt::close(self).await
    }
}

/// In-process transport, used when the peer lives in the same process.
#[async_trait]
impl Transport for mpsc::Sender<ServerResponse> {
    async fn deliver(&mut self, response: ServerResponse) -> Result<(), NexusError> {
        self.send(response)
            .await
            .map_err(|_| NexusError::TransportClosed)
    }
}

#[async_trait]
impl Transport for mpsc::UnboundedSender<ServerResponse> {
    async fn deliver(&mut self, response: ServerResponse) -> Result<(), NexusError> {
        self.send(response).map_err(|_| NexusError::TransportClosed)
    }
}
