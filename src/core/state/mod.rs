// src/core/state/mod.rs

mod core;

pub use self::core::ServerState;
