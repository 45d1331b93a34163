//! The `verifyq.*` metric instruments.
//!
//! Instruments are built once, from whichever `MeterProvider` is global at
//! first use. [`init_telemetry`](super::init_telemetry) registers them right
//! after installing the OTLP provider; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

pub const METER_NAME: &str = "verifyq";

static INSTRUMENTS: OnceLock<SyncMetrics> = OnceLock::new();

pub struct SyncMetrics {
    /// Queue messages posted for new pending items.
    pub messages_posted: Counter<u64>,
    /// Queue messages deleted. Labels: `reason` ("stale" | "duplicate").
    pub messages_retired: Counter<u64>,
    /// Missing marker reactions restored by a pass.
    pub markers_added: Counter<u64>,
    /// Completed claim transitions. Labels: `kind` ("claim" | "unclaim").
    pub claim_transitions: Counter<u64>,
    /// Writes abandoned because the message changed after it was read.
    /// Labels: `path` ("claim" | "remark").
    pub dropped_transitions: Counter<u64>,
    /// Tracked pairs whose pass failed.
    /// Labels: `kind` ("transient" | "unauthorized" | "chat" | "other").
    pub pair_tick_failures: Counter<u64>,
    /// Wall time of one tick across every pair.
    pub tick_duration_ms: Histogram<f64>,
}

impl SyncMetrics {
    fn build(meter: &Meter) -> Self {
        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).build()
        };
        Self {
            messages_posted: counter("verifyq.messages.posted", "Queue messages posted"),
            messages_retired: counter("verifyq.messages.retired", "Queue messages deleted"),
            markers_added: counter("verifyq.markers.added", "Marker reactions restored"),
            claim_transitions: counter("verifyq.claims.transitions", "Completed claim transitions"),
            dropped_transitions: counter(
                "verifyq.claims.dropped",
                "Writes dropped by the compare-before-write guard",
            ),
            pair_tick_failures: counter("verifyq.tick.failures", "Tracked-pair passes that failed"),
            tick_duration_ms: meter
                .f64_histogram("verifyq.tick.duration_ms")
                .with_description("Duration of one reconciliation tick")
                .with_unit("ms")
                .build(),
        }
    }
}

/// The crate's instruments, built on first call.
pub fn instruments() -> &'static SyncMetrics {
    INSTRUMENTS.get_or_init(|| SyncMetrics::build(&opentelemetry::global::meter(METER_NAME)))
}
