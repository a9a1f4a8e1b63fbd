// src/core/dispatch/mod.rs

//! Routes every inbound message on a connection: control messages are executed
//! against the connection state, records are classified and handed to the
//! connection's stream.

pub mod classifier;
pub mod control;
pub mod data;

pub use classifier::{
    ControlMessage, DeliveryMode, Inbound, RecordRoute, classify, classify_record,
};

use crate::connection::ConnectionState;
use crate::core::NexusError;
use crate::core::metrics;
use crate::core::protocol::ServerRequest;

/// Classifies one server request and runs its handler to completion on the
/// caller's task.
pub async fn handle_server_request(
    conn: &mut ConnectionState,
    request: ServerRequest,
) -> Result<(), NexusError> {
    let inbound = match classify(request) {
        Ok(inbound) => inbound,
        Err(_) if conn.signals().is_torn_down() => return Err(post_teardown("unclassified")),
        Err(e) => return Err(e),
    };

    match inbound {
        Inbound::Control(message) => control::handle_control(conn, message).await,
        Inbound::Data(DeliveryMode::Publish, record) => data::handle_publish(conn, record).await,
        Inbound::Data(DeliveryMode::Communicate, record) => {
            data::handle_communicate(conn, record).await
        }
    }
}

/// Counts a message discarded after teardown and builds the error reported for it.
pub(crate) fn post_teardown(kind: &'static str) -> NexusError {
    metrics::POST_TEARDOWN_DISCARDED_TOTAL.inc();
    NexusError::PostTeardownMessage(kind)
}
