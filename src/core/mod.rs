// src/core/mod.rs

//! The central module containing message classification, dispatch and the
//! per-connection stream.

pub mod collaborators;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod state;
pub mod stream;

pub use errors::NexusError;
