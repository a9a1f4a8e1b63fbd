// src/core/errors.rs

//! Defines the primary error type for the daemon.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure a connection can run into
/// while its messages are classified, dispatched, framed or delivered.
#[derive(Error, Debug)]
pub enum NexusError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// An inbound tagged union carried no recognised variant, or a message
    /// arrived on a delivery path that cannot carry it.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A second `InformInit` arrived while the connection already owns a stream.
    #[error("Stream already initialized for this connection")]
    DuplicateInit,

    /// A message arrived after the connection was torn down. The payload names
    /// the message kind that was discarded.
    #[error("Message discarded after teardown: {0}")]
    PostTeardownMessage(&'static str),

    #[error("Record received before InformInit")]
    StreamNotInitialized,

    #[error("Transport closed")]
    TransportClosed,

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("Bad frame magic byte 0x{0:02x}")]
    BadMagic(u8),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl NexusError {
    /// Returns true if this error must end the connection that produced it.
    /// Post-teardown messages are reported and dropped; everything else is a
    /// protocol or transport failure the connection cannot recover from.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NexusError::PostTeardownMessage(_))
    }

    /// True for the classification failures that are counted as protocol violations.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            NexusError::ProtocolViolation(_)
                | NexusError::DuplicateInit
                | NexusError::StreamNotInitialized
                | NexusError::BadMagic(_)
                | NexusError::FrameTooLarge(_)
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for NexusError {
    fn clone(&self) -> Self {
        match self {
            NexusError::Io(e) => NexusError::Io(Arc::clone(e)),
            NexusError::ProtocolViolation(s) => NexusError::ProtocolViolation(s.clone()),
            NexusError::DuplicateInit => NexusError::DuplicateInit,
            NexusError::PostTeardownMessage(kind) => NexusError::PostTeardownMessage(kind),
            NexusError::StreamNotInitialized => NexusError::StreamNotInitialized,
            NexusError::TransportClosed => NexusError::TransportClosed,
            NexusError::FrameTooLarge(n) => NexusError::FrameTooLarge(*n),
            NexusError::BadMagic(b) => NexusError::BadMagic(*b),
            NexusError::Codec(s) => NexusError::Codec(s.clone()),
            NexusError::Internal(s) => NexusError::Internal(s.clone()),
        }
    }
}

impl PartialEq for NexusError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NexusError::Io(e1), NexusError::Io(e2)) => e1.kind() == e2.kind(),
            (NexusError::ProtocolViolation(s1), NexusError::ProtocolViolation(s2)) => s1 == s2,
            (NexusError::PostTeardownMessage(k1), NexusError::PostTeardownMessage(k2)) => k1 == k2,
            (NexusError::FrameTooLarge(n1), NexusError::FrameTooLarge(n2)) => n1 == n2,
            (NexusError::BadMagic(b1), NexusError::BadMagic(b2)) => b1 == b2,
            (NexusError::Codec(s1), NexusError::Codec(s2)) => s1 == s2,
            (NexusError::Internal(s1), NexusError::Internal(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for NexusError {
    fn from(e: std::io::Error) -> Self {
        NexusError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for NexusError {
    fn from(e: serde_json::Error) -> Self {
        NexusError::Codec(format!("JSON serialization/deserialization error: {e}"))
    }
}
