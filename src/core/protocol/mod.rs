// src/core/protocol/mod.rs

//! Message shapes and wire framing for client connections.

pub mod frame;
pub mod message;

pub use frame::{FRAME_HEADER_LEN, FRAME_MAGIC, MAX_FRAME_SIZE, NexusFrameCodec};
pub use message::*;
