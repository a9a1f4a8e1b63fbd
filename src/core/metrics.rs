// src/core/metrics.rs

//! Defines and registers Prometheus metrics for daemon monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected to the daemon.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("nexus_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of streams whose responder is currently running.
    pub static ref ACTIVE_STREAMS: Gauge =
        register_gauge!("nexus_active_streams", "Number of streams with a running responder.").unwrap();

    // --- Counters ---
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("nexus_connections_received_total", "Total number of connections received.").unwrap();
    /// Inform messages handled, labeled by message kind.
    pub static ref CONTROL_MESSAGES_TOTAL: CounterVec =
        register_counter_vec!("nexus_control_messages_total", "Total number of inform messages handled, labeled by kind.", &["kind"]).unwrap();
    /// Records accepted onto a stream, labeled by record kind and delivery mode.
    pub static ref RECORDS_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!("nexus_records_received_total", "Total number of records accepted, labeled by kind and mode.", &["kind", "mode"]).unwrap();
    /// Responses written back to clients by stream responders.
    pub static ref RESPONSES_DELIVERED_TOTAL: Counter =
        register_counter!("nexus_responses_delivered_total", "Total number of responses delivered to clients.").unwrap();
    /// Connections closed because of a protocol violation.
    pub static ref PROTOCOL_VIOLATIONS_TOTAL: Counter =
        register_counter!("nexus_protocol_violations_total", "Total number of protocol violations reported.").unwrap();
    /// Messages discarded because they arrived after teardown.
    pub static ref POST_TEARDOWN_DISCARDED_TOTAL: Counter =
        register_counter!("nexus_post_teardown_discarded_total", "Total number of messages discarded after teardown.").unwrap();

    // --- Histograms ---
    /// Time spent routing one record through its collaborator on the responder.
    pub static ref RECORD_PROCESSING_SECONDS: Histogram =
        register_histogram!("nexus_record_processing_seconds", "Latency of record processing on the stream responder in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
