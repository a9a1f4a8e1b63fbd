// src/core/dispatch/classifier.rs

//! Pure classification of inbound messages. No state, no I/O: each function
//! maps a decoded tagged union to the handler that must run for it, or to a
//! protocol violation when the tag is absent or not allowed on its path.

use crate::core::NexusError;
use crate::core::protocol::{
    InformFinishRequest, InformInitRequest, InformStartRequest, InformTeardownRequest, Record,
    RecordType, ServerRequest, ServerRequestType,
};

/// Whether the client expects a correlated reply for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Fire-and-forget. Only requests may still produce a reply.
    Publish,
    /// The client waits for a correlated `RecordResult`.
    Communicate,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Publish => "publish",
            DeliveryMode::Communicate => "communicate",
        }
    }
}

/// A connection-lifecycle ("inform") message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    InformInit(InformInitRequest),
    InformStart(InformStartRequest),
    InformFinish(InformFinishRequest),
    InformTeardown(InformTeardownRequest),
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::InformInit(_) => "inform_init",
            ControlMessage::InformStart(_) => "inform_start",
            ControlMessage::InformFinish(_) => "inform_finish",
            ControlMessage::InformTeardown(_) => "inform_teardown",
        }
    }
}

/// The result of classifying a `ServerRequest`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlMessage),
    Data(DeliveryMode, Record),
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Control(message) => message.kind(),
            Inbound::Data(DeliveryMode::Publish, _) => "record_publish",
            Inbound::Data(DeliveryMode::Communicate, _) => "record_communicate",
        }
    }
}

/// The collaborator a record is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordRoute {
    Header,
    Run,
    Summary,
    History,
    Telemetry,
    OutputRaw,
    Exit,
    Request,
}

impl RecordRoute {
    /// True for the routes that mutate run state through the run manager.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, RecordRoute::Run | RecordRoute::Exit)
    }
}

/// Splits a server request into a control message or a record delivery.
pub fn classify(request: ServerRequest) -> Result<Inbound, NexusError> {
    let inbound = match request.request_type {
        Some(ServerRequestType::InformInit(m)) => Inbound::Control(ControlMessage::InformInit(m)),
        Some(ServerRequestType::InformStart(m)) => {
            Inbound::Control(ControlMessage::InformStart(m))
        }
        Some(ServerRequestType::InformFinish(m)) => {
            Inbound::Control(ControlMessage::InformFinish(m))
        }
        Some(ServerRequestType::InformTeardown(m)) => {
            Inbound::Control(ControlMessage::InformTeardown(m))
        }
        Some(ServerRequestType::RecordPublish(r)) => Inbound::Data(DeliveryMode::Publish, r),
        Some(ServerRequestType::RecordCommunicate(r)) => {
            Inbound::Data(DeliveryMode::Communicate, r)
        }
        None => {
            return Err(NexusError::ProtocolViolation(
                "server request carries no request_type".into(),
            ));
        }
    };
    Ok(inbound)
}

/// Picks the collaborator for a record delivered under `mode`.
///
/// `Publish` accepts every record variant. `Communicate` accepts only requests,
/// since no other record produces the reply the caller waits for. A request
/// whose own tag is absent is rejected on both paths.
pub fn classify_record(record: &Record, mode: DeliveryMode) -> Result<RecordRoute, NexusError> {
    let Some(record_type) = record.record_type.as_ref() else {
        return Err(NexusError::ProtocolViolation(format!(
            "record {} carries no record_type",
            record.num
        )));
    };

    let route = match record_type {
        RecordType::Header(_) => RecordRoute::Header,
        RecordType::Run(_) => RecordRoute::Run,
        RecordType::Summary(_) => RecordRoute::Summary,
        RecordType::History(_) => RecordRoute::History,
        RecordType::Telemetry(_) => RecordRoute::Telemetry,
        RecordType::OutputRaw(_) => RecordRoute::OutputRaw,
        RecordType::Exit(_) => RecordRoute::Exit,
        RecordType::Request(request) => {
            if request.request_type.is_none() {
                return Err(NexusError::ProtocolViolation(format!(
                    "request record {} carries no request_type",
                    record.num
                )));
            }
            RecordRoute::Request
        }
    };

    if mode == DeliveryMode::Communicate && route != RecordRoute::Request {
        return Err(NexusError::ProtocolViolation(format!(
            "record type '{}' cannot be delivered via communicate",
            record_type.kind()
        )));
    }

    Ok(route)
}
