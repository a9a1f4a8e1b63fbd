// src/core/dispatch/control.rs

//! Executes the four inform messages against a connection.

use super::classifier::ControlMessage;
use super::post_teardown;
use crate::config::DuplicateInitPolicy;
use crate::connection::{ConnectionState, TeardownOrigin};
use crate::core::NexusError;
use crate::core::collaborators::StreamContext;
use crate::core::metrics;
use crate::core::protocol::{
    InformFinishRequest, InformInitRequest, InformStartRequest, InformTeardownRequest,
};
use crate::core::stream::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs exactly one handler for `message`. Effects on the connection are
/// complete when this returns; the only work left running is the responder
/// started by `InformInit`.
pub async fn handle_control(
    conn: &mut ConnectionState,
    message: ControlMessage,
) -> Result<(), NexusError> {
    if conn.signals().is_torn_down() {
        if let ControlMessage::InformTeardown(_) = message {
            debug!(
                "Session {}: teardown already handled, ignoring repeat.",
                conn.session_id()
            );
            return Ok(());
        }
        return Err(post_teardown(message.kind()));
    }

    metrics::CONTROL_MESSAGES_TOTAL
        .with_label_values(&[message.kind()])
        .inc();

    match message {
        ControlMessage::InformInit(m) => handle_inform_init(conn, m).await,
        ControlMessage::InformStart(m) => {
            handle_inform_start(conn, m);
            Ok(())
        }
        ControlMessage::InformFinish(m) => {
            handle_inform_finish(conn, m);
            Ok(())
        }
        ControlMessage::InformTeardown(m) => {
            handle_inform_teardown(conn, m);
            Ok(())
        }
    }
}

async fn handle_inform_init(
    conn: &mut ConnectionState,
    msg: InformInitRequest,
) -> Result<(), NexusError> {
    if conn.has_stream() {
        match conn.duplicate_init_policy() {
            DuplicateInitPolicy::Reject => return Err(NexusError::DuplicateInit),
            DuplicateInitPolicy::Replace => replace_stream(conn).await?,
        }
    }

    let stream_id = if msg.stream_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        msg.stream_id
    };
    let transport = conn.take_transport().ok_or_else(|| {
        NexusError::Internal(format!(
            "session {} has no transport for a new stream",
            conn.session_id()
        ))
    })?;

    let mut stream = Stream::new(
        StreamContext::new(conn.session_id(), stream_id),
        conn.stream_config().clone(),
        conn.handlers().clone(),
        conn.signals().cancellation().child_token(),
    );
    if let Err(e) = stream.init() {
        conn.restore_transport(transport);
        return Err(e);
    }
    stream.start_responder(transport)?;

    info!(
        "Session {}: stream {} initialized.",
        conn.session_id(),
        stream.context().stream_id
    );
    conn.attach_stream(stream);
    Ok(())
}

/// Stops and drains the current stream, and takes its transport back so the
/// next stream can own it.
async fn replace_stream(conn: &mut ConnectionState) -> Result<(), NexusError> {
    let Some(previous) = conn.detach_stream() else {
        return Ok(());
    };
    let previous_id = previous.context().stream_id.clone();
    warn!(
        "Session {}: duplicate InformInit, replacing stream {}.",
        conn.session_id(),
        previous_id
    );

    match previous.stop().await? {
        Some(transport) => {
            conn.restore_transport(transport);
            Ok(())
        }
        None => Err(NexusError::Internal(format!(
            "stream {previous_id} did not return its transport"
        ))),
    }
}

fn handle_inform_start(conn: &mut ConnectionState, msg: InformStartRequest) {
    info!(
        "Session {}: start acknowledged for stream '{}'.",
        conn.session_id(),
        msg.stream_id
    );
    conn.mark_started();
}

fn handle_inform_finish(conn: &mut ConnectionState, msg: InformFinishRequest) {
    info!(
        "Session {}: finish acknowledged for stream '{}'.",
        conn.session_id(),
        msg.stream_id
    );
    conn.mark_finishing();
}

fn handle_inform_teardown(conn: &mut ConnectionState, msg: InformTeardownRequest) {
    info!(
        "Session {}: teardown requested (exit code {}).",
        conn.session_id(),
        msg.exit_code
    );
    conn.signals().teardown(TeardownOrigin::Client);
}
