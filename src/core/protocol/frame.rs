// src/core/protocol/frame.rs

//! Implements the length-prefixed frame used on client connections and the
//! corresponding `Encoder` and `Decoder` for network communication.
//!
//! A frame is one magic byte, a little-endian `u32` body length, and a JSON body.

use crate::core::NexusError;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// The first byte of every frame.
pub const FRAME_MAGIC: u8 = b'W';
/// Magic byte plus the `u32` length prefix.
pub const FRAME_HEADER_LEN: usize = 5;
// Protocol-level limit to keep a single malformed header from forcing a huge allocation.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// A `tokio_util::codec` implementation that decodes frames into `D` and encodes
/// any serializable value. The server uses `NexusFrameCodec<ServerRequest>`; a
/// client uses `NexusFrameCodec<ServerResponse>`.
pub struct NexusFrameCodec<D> {
    _decoded: PhantomData<fn() -> D>,
}

impl<D> NexusFrameCodec<D> {
    pub fn new() -> Self {
        Self {
            _decoded: PhantomData,
        }
    }
}

impl<D> Default for NexusFrameCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for NexusFrameCodec<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NexusFrameCodec").finish()
    }
}

impl<D, E: Serialize> Encoder<E> for NexusFrameCodec<D> {
    type Error = NexusError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(NexusError::FrameTooLarge(body.len()));
        }
        dst.reserve(FRAME_HEADER_LEN + body.len());
        dst.put_u8(FRAME_MAGIC);
        dst.put_u32_le(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl<D: DeserializeOwned> Decoder for NexusFrameCodec<D> {
    type Item = D;
    type Error = NexusError;

    /// Decodes one frame. Returns `Ok(None)` until the whole frame is buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        if src[0] != FRAME_MAGIC {
            return Err(NexusError::BadMagic(src[0]));
        }

        let body_len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if body_len > MAX_FRAME_SIZE {
            return Err(NexusError::FrameTooLarge(body_len));
        }

        let frame_len = FRAME_HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let body = src.split_to(body_len);
        let item = serde_json::from_slice(&body)?;
        Ok(Some(item))
    }
}
