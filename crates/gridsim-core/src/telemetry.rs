//! Telemetry sink interface.
//!
//! The core emits one record per completed request plus 1 Hz gauges from
//! the monitoring loops; durability and transport are a sink concern.
//! `record_ended_request` derives the standard request measurements here so
//! every sink reports the same shapes.

use std::collections::BTreeMap;

use gridsim_kernel::SimTime;

use crate::request::RequestContext;

/// Where measurements go. One sink per simulation run.
pub trait Telemetry {
    /// Record one measurement with its tags and numeric fields.
    fn record(
        &self,
        measurement: &str,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, f64>,
        time: SimTime,
    );

    /// Emit the derived measurements for a finished request: a count plus
    /// queue/computation/response durations where the timestamps exist.
    fn record_ended_request(&self, rc: &RequestContext) {
        let Some(sent) = rc.sent() else {
            return;
        };

        let mut tags = BTreeMap::new();
        if let Some(host) = rc.host_name() {
            tags.insert("host_name".to_string(), host);
        }
        if let Some(instance) = rc.instance_name() {
            tags.insert("instance_name".to_string(), instance);
        }
        if let Some(endpoint) = rc.endpoint_name() {
            tags.insert("endpoint_name".to_string(), endpoint);
        }
        let status = if rc.is_timeout() {
            "TIMEOUT".to_string()
        } else {
            rc.status().map(|s| s.to_string()).unwrap_or_default()
        };
        tags.insert("status".to_string(), status);
        tags.insert("timestamp_type".to_string(), "req_sent".to_string());

        let field = |v: f64| BTreeMap::from([("value".to_string(), v)]);

        self.record("count", tags.clone(), field(1.0), sent);
        if let (Some(arrived), Some(started)) = (rc.arrived(), rc.proc_started()) {
            self.record(
                "queue_time",
                tags.clone(),
                field((started - arrived).as_secs_f64()),
                sent,
            );
        }
        if let (Some(started), Some(completed)) = (rc.proc_started(), rc.proc_completed()) {
            self.record(
                "computation_time",
                tags.clone(),
                field((completed - started).as_secs_f64()),
                sent,
            );
        }
        if let Some(resp) = rc.resp_arrived() {
            self.record("response_time", tags, field((resp - sent).as_secs_f64()), sent);
        }
    }

    /// Flush buffered records. Called at the end of `simulate`.
    fn flush(&self) {}

    /// Release sink resources. Called once when the run is closed.
    fn close(&self) {}
}

/// Discards everything. The default sink until the builder installs one.
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn record(
        &self,
        _measurement: &str,
        _tags: BTreeMap<String, String>,
        _fields: BTreeMap<String, f64>,
        _time: SimTime,
    ) {
    }
}
