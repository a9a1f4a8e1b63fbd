// src/core/collaborators/run_tracker.rs

//! The default collaborator: keeps an in-memory snapshot of each stream's run
//! so that requests like `GetSummary` and `PollExit` can be answered.

use super::{RecordSink, RequestHandler, RunManager, StreamContext};
use crate::core::NexusError;
use crate::core::protocol::{
    ExitRecord, GetSummaryResponse, HeaderRecord, HistoryRecord, KeyValue, OutputRawRecord,
    PollExitResponse, RequestType, Response, RunRecord, RunStartResponse, StatusResponse,
    SummaryRecord, TelemetryRecord,
};
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Everything the tracker knows about one stream's run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSnapshot {
    pub header: Option<HeaderRecord>,
    pub run: Option<RunRecord>,
    /// Summary keys in first-write order.
    pub summary: IndexMap<String, Value>,
    pub last_step: Option<i64>,
    pub history_rows: u64,
    pub telemetry: Map<String, Value>,
    pub output_lines: u64,
    pub exit: Option<ExitRecord>,
    /// Non-request records applied to this snapshot.
    pub records: u64,
}

impl RunSnapshot {
    fn run_id(&self) -> Option<String> {
        self.run.as_ref().map(|run| run.run_id.clone())
    }
}

/// Tracks run state per stream. Snapshots are discarded when their stream stops.
#[derive(Debug, Default)]
pub struct RunTracker {
    runs: DashMap<StreamContext, RunSnapshot>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the snapshot for `ctx`, if the stream has sent anything.
    pub fn snapshot(&self, ctx: &StreamContext) -> Option<RunSnapshot> {
        self.runs.get(ctx).map(|entry| entry.value().clone())
    }

    /// The number of streams currently tracked.
    pub fn tracked_streams(&self) -> usize {
        self.runs.len()
    }

    fn apply(&self, ctx: &StreamContext, f: impl FnOnce(&mut RunSnapshot)) {
        let mut entry = self.runs.entry(ctx.clone()).or_default();
        let snapshot = entry.value_mut();
        snapshot.records += 1;
        f(snapshot);
    }

    fn read<T>(&self, ctx: &StreamContext, f: impl FnOnce(&RunSnapshot) -> T) -> T {
        match self.runs.get(ctx) {
            Some(entry) => f(entry.value()),
            None => f(&RunSnapshot::default()),
        }
    }
}

#[async_trait]
impl RunManager for RunTracker {
    async fn on_run(&self, ctx: &StreamContext, run: &RunRecord) {
        info!("Stream {}: run '{}' registered.", ctx, run.run_id);
        self.apply(ctx, |snapshot| snapshot.run = Some(run.clone()));
    }

    async fn on_exit(&self, ctx: &StreamContext, exit: &ExitRecord) {
        info!(
            "Stream {}: run exited with code {} after {}s.",
            ctx, exit.exit_code, exit.runtime
        );
        self.apply(ctx, |snapshot| snapshot.exit = Some(exit.clone()));
    }

    async fn on_stream_stopped(&self, ctx: &StreamContext) {
        if self.runs.remove(ctx).is_some() {
            debug!("Stream {}: run snapshot released.", ctx);
        }
    }
}

#[async_trait]
impl RecordSink for RunTracker {
    async fn on_header(&self, ctx: &StreamContext, header: &HeaderRecord) {
        self.apply(ctx, |snapshot| snapshot.header = Some(header.clone()));
    }

    async fn on_summary(&self, ctx: &StreamContext, summary: &SummaryRecord) {
        self.apply(ctx, |snapshot| {
            for item in &summary.update {
                snapshot.summary.insert(item.key.clone(), item.value.clone());
            }
            for key in &summary.remove {
                snapshot.summary.shift_remove(key);
            }
        });
    }

    async fn on_history(&self, ctx: &StreamContext, history: &HistoryRecord) {
        self.apply(ctx, |snapshot| {
            let step = history
                .step
                .unwrap_or_else(|| snapshot.last_step.map_or(0, |s| s + 1));
            snapshot.last_step = Some(step);
            snapshot.history_rows += 1;
        });
    }

    async fn on_telemetry(&self, ctx: &StreamContext, telemetry: &TelemetryRecord) {
        self.apply(ctx, |snapshot| {
            for (key, value) in &telemetry.fields {
                snapshot.telemetry.insert(key.clone(), value.clone());
            }
        });
    }

    async fn on_output_raw(&self, ctx: &StreamContext, _output: &OutputRawRecord) {
        self.apply(ctx, |snapshot| snapshot.output_lines += 1);
    }
}

#[async_trait]
impl RequestHandler for RunTracker {
    async fn handle_request(
        &self,
        ctx: &StreamContext,
        request: &RequestType,
    ) -> Result<Option<Response>, NexusError> {
        let response = match request {
            RequestType::Ping => Some(Response::Pong),
            RequestType::Keepalive => None,
            RequestType::Defer(defer) => {
                debug!("Stream {}: defer state {}.", ctx, defer.state);
                Some(Response::Defer)
            }
            RequestType::Status => Some(self.read(ctx, |snapshot| {
                Response::Status(StatusResponse {
                    run_id: snapshot.run_id(),
                    records: snapshot.records,
                    run_exited: snapshot.exit.is_some(),
                })
            })),
            RequestType::RunStart => Some(self.read(ctx, |snapshot| {
                Response::RunStart(RunStartResponse {
                    run_id: snapshot.run_id(),
                })
            })),
            RequestType::PollExit => Some(self.read(ctx, |snapshot| {
                Response::PollExit(PollExitResponse {
                    done: snapshot.exit.is_some(),
                    exit_result: snapshot.exit.clone(),
                })
            })),
            RequestType::GetSummary => Some(self.read(ctx, |snapshot| {
                Response::GetSummary(GetSummaryResponse {
                    item: snapshot
                        .summary
                        .iter()
                        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
                        .collect(),
                })
            })),
        };
        Ok(response)
    }
}
