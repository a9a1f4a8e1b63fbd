// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: reading frames,
//! running the dispatchers, and coordinating teardown.

mod guard;
mod handler;
mod signals;
mod state;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use signals::{ConnectionSignals, TeardownOrigin};
pub use state::ConnectionState;
