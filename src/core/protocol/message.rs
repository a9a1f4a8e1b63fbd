// src/core/protocol/message.rs

//! The decoded message shapes exchanged with a client library.
//!
//! Every tagged union that can arrive from the wire is carried as an `Option`,
//! so a message whose tag is absent decodes successfully and is rejected by
//! the classifier as a protocol violation instead of failing inside the codec.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The top-level inbound message on a connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ServerRequest {
    #[serde(default)]
    pub request_type: Option<ServerRequestType>,
}

/// Connection-lifecycle control messages and the two record delivery operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ServerRequestType {
    InformInit(InformInitRequest),
    InformStart(InformStartRequest),
    InformFinish(InformFinishRequest),
    InformTeardown(InformTeardownRequest),
    RecordPublish(Record),
    RecordCommunicate(Record),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InformInitRequest {
    #[serde(default)]
    pub stream_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InformStartRequest {
    #[serde(default)]
    pub stream_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InformFinishRequest {
    #[serde(default)]
    pub stream_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InformTeardownRequest {
    #[serde(default)]
    pub exit_code: i32,
}

impl ServerRequest {
    pub fn new(request_type: ServerRequestType) -> Self {
        Self {
            request_type: Some(request_type),
        }
    }

    pub fn inform_init(stream_id: impl Into<String>) -> Self {
        Self::new(ServerRequestType::InformInit(InformInitRequest {
            stream_id: stream_id.into(),
        }))
    }

    pub fn inform_start(stream_id: impl Into<String>) -> Self {
        Self::new(ServerRequestType::InformStart(InformStartRequest {
            stream_id: stream_id.into(),
        }))
    }

    pub fn inform_finish(stream_id: impl Into<String>) -> Self {
        Self::new(ServerRequestType::InformFinish(InformFinishRequest {
            stream_id: stream_id.into(),
        }))
    }

    pub fn inform_teardown(exit_code: i32) -> Self {
        Self::new(ServerRequestType::InformTeardown(InformTeardownRequest {
            exit_code,
        }))
    }

    pub fn publish(record: Record) -> Self {
        Self::new(ServerRequestType::RecordPublish(record))
    }

    pub fn communicate(record: Record) -> Self {
        Self::new(ServerRequestType::RecordCommunicate(record))
    }
}

/// A single unit of telemetry or lifecycle data sent by a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// The client-assigned sequence number of the record.
    #[serde(default)]
    pub num: i64,
    /// Correlation id echoed back on any result produced for this record.
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub record_type: Option<RecordType>,
}

impl Record {
    pub fn new(num: i64, uuid: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            num,
            uuid: uuid.into(),
            record_type: Some(record_type),
        }
    }

    /// A short name for the record variant, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        self.record_type.as_ref().map_or("none", RecordType::kind)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Header(HeaderRecord),
    Run(RunRecord),
    Summary(SummaryRecord),
    History(HistoryRecord),
    Telemetry(TelemetryRecord),
    OutputRaw(OutputRawRecord),
    Exit(ExitRecord),
    Request(Request),
}

impl RecordType {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordType::Header(_) => "header",
            RecordType::Run(_) => "run",
            RecordType::Summary(_) => "summary",
            RecordType::History(_) => "history",
            RecordType::Telemetry(_) => "telemetry",
            RecordType::OutputRaw(_) => "output_raw",
            RecordType::Exit(_) => "exit",
            RecordType::Request(_) => "request",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HeaderRecord {
    #[serde(default)]
    pub version_info: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RunRecord {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

/// A key/value pair whose value is an arbitrary JSON document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SummaryRecord {
    #[serde(default)]
    pub update: Vec<KeyValue>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HistoryRecord {
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default)]
    pub item: Vec<KeyValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TelemetryRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct OutputRawRecord {
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ExitRecord {
    #[serde(default)]
    pub exit_code: i32,
    /// Wall-clock runtime of the run in seconds.
    #[serde(default)]
    pub runtime: i64,
}

/// The request/response sub-channel carried inside a `Record`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Request {
    #[serde(default)]
    pub request_type: Option<RequestType>,
}

impl Request {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type: Some(request_type),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Ping,
    Status,
    RunStart,
    PollExit,
    GetSummary,
    Defer(DeferRequest),
    Keepalive,
}

impl RequestType {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestType::Ping => "ping",
            RequestType::Status => "status",
            RequestType::RunStart => "run_start",
            RequestType::PollExit => "poll_exit",
            RequestType::GetSummary => "get_summary",
            RequestType::Defer(_) => "defer",
            RequestType::Keepalive => "keepalive",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DeferRequest {
    #[serde(default)]
    pub state: i32,
}

/// The top-level outbound message on a connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ServerResponse {
    ResultCommunicate(RecordResult),
    Error { message: String },
}

/// A reply correlated to the record that produced it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RecordResult {
    #[serde(default)]
    pub num: i64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub response: Option<Response>,
}

impl RecordResult {
    /// Builds a result that echoes the correlation fields of `record`.
    pub fn for_record(record: &Record, response: Option<Response>) -> Self {
        Self {
            num: record.num,
            uuid: record.uuid.clone(),
            response,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Pong,
    Status(StatusResponse),
    RunStart(RunStartResponse),
    PollExit(PollExitResponse),
    GetSummary(GetSummaryResponse),
    Defer,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StatusResponse {
    #[serde(default)]
    pub run_id: Option<String>,
    /// Number of records the stream has processed so far.
    #[serde(default)]
    pub records: u64,
    #[serde(default)]
    pub run_exited: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RunStartResponse {
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PollExitResponse {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub exit_result: Option<ExitRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GetSummaryResponse {
    #[serde(default)]
    pub item: Vec<KeyValue>,
}
