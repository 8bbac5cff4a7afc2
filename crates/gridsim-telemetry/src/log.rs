//! Structured-log sink.

use std::collections::BTreeMap;

use gridsim_core::Telemetry;
use gridsim_kernel::SimTime;

/// Emits every measurement as a `tracing` event. Lossless enough for
/// eyeballing a run; use [`crate::JsonlSink`] for analysis.
#[derive(Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        LogSink
    }
}

impl Telemetry for LogSink {
    fn record(
        &self,
        measurement: &str,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, f64>,
        time: SimTime,
    ) {
        tracing::info!(
            target: "gridsim::telemetry",
            %time,
            measurement,
            tags = ?tags,
            fields = ?fields,
            "record"
        );
    }
}
