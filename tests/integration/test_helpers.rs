// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use async_trait::async_trait;
use nexus::NexusError;
use nexus::config::StreamConfig;
use nexus::connection::{ConnectionSignals, ConnectionState};
use nexus::core::collaborators::{
    Handlers, RecordSink, RequestHandler, RunManager, StreamContext,
};
use nexus::core::dispatch;
use nexus::core::protocol::{
    ExitRecord, HeaderRecord, HistoryRecord, KeyValue, OutputRawRecord, OutputType, Record,
    RecordType, Request, RequestType, Response, RunRecord, ServerRequest, ServerResponse,
    SummaryRecord, TelemetryRecord,
};
use nexus::server::ServerControl;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Installs a quiet subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

pub fn test_addr() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// A `ServerControl` that only counts how often a teardown reached it.
#[derive(Debug, Default)]
pub struct CountingServer {
    pub mark_shutdown_calls: AtomicUsize,
    pub close_listener_calls: AtomicUsize,
}

impl CountingServer {
    pub fn mark_shutdown_count(&self) -> usize {
        self.mark_shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn close_listener_count(&self) -> usize {
        self.close_listener_calls.load(Ordering::SeqCst)
    }
}

impl ServerControl for CountingServer {
    fn mark_shutdown(&self) {
        self.mark_shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn close_listener(&self) {
        self.close_listener_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.mark_shutdown_count() > 0
    }
}

/// Records every collaborator call as a short event string.
///
/// Requests: `Ping` answers `Pong`, `Keepalive` has no answer, `Defer` answers
/// `Defer`, and everything else fails with an internal error. A gated recorder
/// blocks each record callback until `release` hands out a permit.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    stopped: Mutex<Vec<StreamContext>>,
    gate: Option<Arc<Semaphore>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn handlers(self: &Arc<Self>) -> Handlers {
        Handlers::new(self.clone(), self.clone(), self.clone())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<StreamContext> {
        self.stopped.lock().unwrap().clone()
    }

    async fn record(&self, event: String) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl RunManager for Recorder {
    async fn on_run(&self, _ctx: &StreamContext, run: &RunRecord) {
        self.record(format!("run:{}", run.run_id)).await;
    }

    async fn on_exit(&self, _ctx: &StreamContext, exit: &ExitRecord) {
        self.record(format!("exit:{}", exit.exit_code)).await;
    }

    async fn on_stream_stopped(&self, ctx: &StreamContext) {
        self.stopped.lock().unwrap().push(ctx.clone());
    }
}

#[async_trait]
impl RecordSink for Recorder {
    async fn on_header(&self, _ctx: &StreamContext, _header: &HeaderRecord) {
        self.record("header".to_string()).await;
    }

    async fn on_summary(&self, _ctx: &StreamContext, summary: &SummaryRecord) {
        self.record(format!("summary:{}", summary.update.len())).await;
    }

    async fn on_history(&self, _ctx: &StreamContext, history: &HistoryRecord) {
        self.record(format!("history:{}", history.step.unwrap_or(-1)))
            .await;
    }

    async fn on_telemetry(&self, _ctx: &StreamContext, _telemetry: &TelemetryRecord) {
        self.record("telemetry".to_string()).await;
    }

    async fn on_output_raw(&self, _ctx: &StreamContext, output: &OutputRawRecord) {
        self.record(format!("output:{}", output.line)).await;
    }
}

#[async_trait]
impl RequestHandler for Recorder {
    async fn handle_request(
        &self,
        _ctx: &StreamContext,
        request: &RequestType,
    ) -> Result<Option<Response>, NexusError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("request:{}", request.kind()));
        match request {
            RequestType::Ping => Ok(Some(Response::Pong)),
            RequestType::Keepalive => Ok(None),
            RequestType::Defer(_) => Ok(Some(Response::Defer)),
            other => Err(NexusError::Internal(format!(
                "recorder cannot answer {}",
                other.kind()
            ))),
        }
    }
}

/// A connection driven directly through the dispatcher, with an in-memory
/// transport in place of a socket.
pub struct TestConnection {
    pub conn: ConnectionState,
    pub responses: mpsc::UnboundedReceiver<ServerResponse>,
    pub server: Arc<CountingServer>,
    pub recorder: Arc<Recorder>,
}

impl TestConnection {
    pub fn new() -> Self {
        Self::build(StreamConfig::default(), Recorder::new())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        Self::build(config, Recorder::new())
    }

    pub fn build(config: StreamConfig, recorder: Arc<Recorder>) -> Self {
        init_tracing();
        let server = Arc::new(CountingServer::default());
        let signals = Arc::new(ConnectionSignals::new(
            1,
            CancellationToken::new(),
            server.clone(),
        ));
        let (tx, responses) = mpsc::unbounded_channel();
        let conn = ConnectionState::new(
            test_addr(),
            Box::new(tx),
            signals,
            recorder.handlers(),
            config,
        );
        Self {
            conn,
            responses,
            server,
            recorder,
        }
    }

    /// Dispatches one request exactly as the connection task would.
    pub async fn send(&mut self, request: ServerRequest) -> Result<(), NexusError> {
        dispatch::handle_server_request(&mut self.conn, request).await
    }

    pub async fn init(&mut self, stream_id: &str) {
        self.send(ServerRequest::inform_init(stream_id))
            .await
            .expect("InformInit should succeed");
    }

    pub async fn next_response(&mut self) -> ServerResponse {
        tokio::time::timeout(Duration::from_secs(5), self.responses.recv())
            .await
            .expect("timed out waiting for a response")
            .expect("transport closed before a response arrived")
    }

    /// Communicates a ping and waits for its pong, which proves every record
    /// enqueued before it has been processed.
    pub async fn sync(&mut self, num: i64) {
        self.send(ServerRequest::communicate(ping(num)))
            .await
            .expect("ping should be accepted");
        let response = self.next_response().await;
        assert_eq!(response, pong(num));
    }
}

// ===== Record builders =====

pub fn request(num: i64, request_type: RequestType) -> Record {
    Record::new(
        num,
        format!("uuid-{num}"),
        RecordType::Request(Request::new(request_type)),
    )
}

pub fn ping(num: i64) -> Record {
    request(num, RequestType::Ping)
}

/// The response a communicated `ping(num)` produces.
pub fn pong(num: i64) -> ServerResponse {
    ServerResponse::ResultCommunicate(nexus::core::protocol::RecordResult {
        num,
        uuid: format!("uuid-{num}"),
        response: Some(Response::Pong),
    })
}

pub fn header(num: i64) -> Record {
    Record::new(
        num,
        "",
        RecordType::Header(HeaderRecord {
            version_info: Some("test".into()),
        }),
    )
}

pub fn run(num: i64, run_id: &str) -> Record {
    Record::new(
        num,
        "",
        RecordType::Run(RunRecord {
            run_id: run_id.into(),
            ..RunRecord::default()
        }),
    )
}

pub fn summary(num: i64, key: &str, value: Value) -> Record {
    Record::new(
        num,
        "",
        RecordType::Summary(SummaryRecord {
            update: vec![KeyValue::new(key, value)],
            remove: vec![],
        }),
    )
}

pub fn history(num: i64, step: Option<i64>) -> Record {
    Record::new(
        num,
        "",
        RecordType::History(HistoryRecord {
            step,
            item: vec![KeyValue::new("loss", serde_json::json!(0.5))],
        }),
    )
}

pub fn telemetry(num: i64) -> Record {
    let mut fields = Map::new();
    fields.insert("python_version".into(), Value::from("3.12"));
    Record::new(num, "", RecordType::Telemetry(TelemetryRecord { fields }))
}

pub fn output(num: i64, line: &str) -> Record {
    Record::new(
        num,
        "",
        RecordType::OutputRaw(OutputRawRecord {
            output_type: OutputType::Stdout,
            line: line.into(),
            timestamp: None,
        }),
    )
}

pub fn exit(num: i64, exit_code: i32) -> Record {
    Record::new(
        num,
        "",
        RecordType::Exit(ExitRecord {
            exit_code,
            runtime: 3,
        }),
    )
}
