// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder can collect these metrics.
//! Without an installed recorder every call is a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Zapdesk metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "zapdesk_inbound_messages_total",
        "Inbound messages accepted by the pipeline"
    );
    describe_counter!(
        "zapdesk_duplicates_total",
        "Inbound messages skipped as already processed"
    );
    describe_counter!("zapdesk_tickets_created_total", "Tickets created");
    describe_counter!(
        "zapdesk_realtime_batches_total",
        "Realtime envelopes emitted by the batcher"
    );
    describe_counter!(
        "zapdesk_realtime_events_dropped_total",
        "Realtime events dropped after exhausting retries"
    );
    describe_counter!(
        "zapdesk_channel_errors_total",
        "Transport errors reported by channels"
    );
    describe_gauge!("zapdesk_ws_connections", "Open UI WebSocket connections");
    describe_gauge!("zapdesk_heap_used_bytes", "Allocator heap in use");
    describe_histogram!(
        "zapdesk_pipeline_latency_seconds",
        "Time spent processing one inbound message"
    );
}

/// Record an inbound message accepted for processing.
pub fn record_inbound(kind: &str) {
    metrics::counter!("zapdesk_inbound_messages_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_duplicate() {
    metrics::counter!("zapdesk_duplicates_total").increment(1);
}

pub fn record_ticket_created() {
    metrics::counter!("zapdesk_tickets_created_total").increment(1);
}

/// Record one emitted realtime envelope.
pub fn record_batch(size: usize, compressed: bool) {
    let compressed = if compressed { "true" } else { "false" };
    metrics::counter!("zapdesk_realtime_batches_total", "compressed" => compressed).increment(1);
    metrics::histogram!("zapdesk_realtime_batch_size").record(size as f64);
}

pub fn record_dropped_events(count: usize) {
    metrics::counter!("zapdesk_realtime_events_dropped_total").increment(count as u64);
}

pub fn record_channel_error(code: i64) {
    metrics::counter!("zapdesk_channel_errors_total", "code" => code.to_string()).increment(1);
}

pub fn set_ws_connections(count: usize) {
    metrics::gauge!("zapdesk_ws_connections").set(count as f64);
}

pub fn set_heap_used(bytes: u64) {
    metrics::gauge!("zapdesk_heap_used_bytes").set(bytes as f64);
}

/// Record pipeline latency.
pub fn record_latency(seconds: f64) {
    metrics::histogram!("zapdesk_pipeline_latency_seconds").record(seconds);
}
