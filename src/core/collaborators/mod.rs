// src/core/collaborators/mod.rs

//! The seams between the dispatcher and the components that give records
//! their meaning: the run manager, the telemetry record sink and the
//! request handler. The dispatcher only routes; these traits decide what a
//! record does to run state.

mod run_tracker;

pub use run_tracker::{RunSnapshot, RunTracker};

use crate::core::NexusError;
use crate::core::protocol::{
    ExitRecord, HeaderRecord, HistoryRecord, OutputRawRecord, RequestType, Response, RunRecord,
    SummaryRecord, TelemetryRecord,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Identifies the stream (and therefore the connection) a record arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamContext {
    pub session_id: u64,
    pub stream_id: String,
}

impl StreamContext {
    pub fn new(session_id: u64, stream_id: impl Into<String>) -> Self {
        Self {
            session_id,
            stream_id: stream_id.into(),
        }
    }
}

impl fmt::Display for StreamContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.stream_id)
    }
}

/// Receives the records that mutate run lifecycle state.
#[async_trait]
pub trait RunManager: Send + Sync + 'static {
    async fn on_run(&self, ctx: &StreamContext, run: &RunRecord);

    async fn on_exit(&self, ctx: &StreamContext, exit: &ExitRecord);

    /// Called once by the responder after its stream has stopped.
    async fn on_stream_stopped(&self, _ctx: &StreamContext) {}
}

/// Receives the telemetry records that carry no lifecycle meaning.
#[async_trait]
pub trait RecordSink: Send + Sync + 'static {
    async fn on_header(&self, ctx: &StreamContext, header: &HeaderRecord);

    async fn on_summary(&self, ctx: &StreamContext, summary: &SummaryRecord);

    async fn on_history(&self, ctx: &StreamContext, history: &HistoryRecord);

    async fn on_telemetry(&self, ctx: &StreamContext, telemetry: &TelemetryRecord);

    async fn on_output_raw(&self, ctx: &StreamContext, output: &OutputRawRecord);
}

/// Answers the request/response sub-channel. Returning `Ok(None)` means the
/// request has no reply of its own; under `Communicate` delivery the stream
/// still sends an empty correlated result.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle_request(
        &self,
        ctx: &StreamContext,
        request: &RequestType,
    ) -> Result<Option<Response>, NexusError>;
}

/// The set of collaborators every stream routes into.
#[derive(Clone)]
pub struct Handlers {
    pub run_manager: Arc<dyn RunManager>,
    pub records: Arc<dyn RecordSink>,
    pub requests: Arc<dyn RequestHandler>,
}

impl Handlers {
    pub fn new(
        run_manager: Arc<dyn RunManager>,
        records: Arc<dyn RecordSink>,
        requests: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            run_manager,
            records,
            requests,
        }
    }

    /// Uses one `RunTracker` for all three roles.
    pub fn from_tracker(tracker: Arc<RunTracker>) -> Self {
        Self {
            run_manager: tracker.clone(),
            records: tracker.clone(),
            requests: tracker,
        }
    }
}

impl Default for Handlers {
    fn default() -> Self {
        Self::from_tracker(Arc::new(RunTracker::new()))
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}
