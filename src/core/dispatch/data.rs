// src/core/dispatch/data.rs

//! The two record delivery operations, and the routing of a classified record
//! into its collaborator.
//!
//! `handle_publish` and `handle_communicate` run on the connection task and only
//! classify and enqueue. `execute` runs on the stream's responder.

use super::classifier::{DeliveryMode, classify_record};
use super::post_teardown;
use crate::connection::ConnectionState;
use crate::core::NexusError;
use crate::core::collaborators::{Handlers, StreamContext};
use crate::core::metrics;
use crate::core::protocol::{Record, RecordResult, RecordType, Response, ServerResponse};
use crate::core::stream::StreamWork;
use tracing::debug;

/// Fire-and-forget delivery. Accepts every record variant.
pub async fn handle_publish(conn: &ConnectionState, record: Record) -> Result<(), NexusError> {
    dispatch_record(conn, DeliveryMode::Publish, record).await
}

/// Request/response delivery. Accepts only request records.
pub async fn handle_communicate(conn: &ConnectionState, record: Record) -> Result<(), NexusError> {
    dispatch_record(conn, DeliveryMode::Communicate, record).await
}

async fn dispatch_record(
    conn: &ConnectionState,
    mode: DeliveryMode,
    record: Record,
) -> Result<(), NexusError> {
    if conn.signals().is_torn_down() {
        return Err(post_teardown(record.kind()));
    }

    let route = classify_record(&record, mode)?;
    let stream = conn.stream().ok_or(NexusError::StreamNotInitialized)?;

    debug!(
        "Session {}: {} {} record {} to {:?}",
        conn.session_id(),
        mode.as_str(),
        record.kind(),
        record.num,
        route
    );
    metrics::RECORDS_RECEIVED_TOTAL
        .with_label_values(&[record.kind(), mode.as_str()])
        .inc();

    stream.enqueue(StreamWork { mode, record }).await
}

/// Forwards one record to its collaborator and returns the response the stream
/// must deliver, if any.
pub async fn execute(
    handlers: &Handlers,
    ctx: &StreamContext,
    work: StreamWork,
) -> Result<Option<ServerResponse>, NexusError> {
    let StreamWork { mode, record } = work;

    let Some(record_type) = record.record_type.as_ref() else {
        return Err(NexusError::ProtocolViolation(format!(
            "record {} carries no record_type",
            record.num
        )));
    };

    match record_type {
        RecordType::Header(header) => handlers.records.on_header(ctx, header).await,
        RecordType::Run(run) => handlers.run_manager.on_run(ctx, run).await,
        RecordType::Summary(summary) => handlers.records.on_summary(ctx, summary).await,
        RecordType::History(history) => handlers.records.on_history(ctx, history).await,
        RecordType::Telemetry(telemetry) => handlers.records.on_telemetry(ctx, telemetry).await,
        RecordType::OutputRaw(output) => handlers.records.on_output_raw(ctx, output).await,
        RecordType::Exit(exit) => handlers.run_manager.on_exit(ctx, exit).await,
        RecordType::Request(request) => {
            let Some(request_type) = request.request_type.as_ref() else {
                return Err(NexusError::ProtocolViolation(format!(
                    "request record {} carries no request_type",
                    record.num
                )));
            };
            let response = handlers.requests.handle_request(ctx, request_type).await?;
            return Ok(correlate(mode, &record, response));
        }
    }
    Ok(None)
}

/// Communicate always answers, with an empty result if the handler had nothing
/// to say. Publish answers only when the handler produced a response.
fn correlate(
    mode: DeliveryMode,
    record: &Record,
    response: Option<Response>,
) -> Option<ServerResponse> {
    match (mode, response) {
        (DeliveryMode::Publish, None) => None,
        (_, response) => Some(ServerResponse::ResultCommunicate(
            RecordResult::for_record(record, response),
        )),
    }
}
