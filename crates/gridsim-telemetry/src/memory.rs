//! In-memory sink.

use std::cell::RefCell;
use std::collections::BTreeMap;

use gridsim_core::Telemetry;
use gridsim_kernel::SimTime;

/// One captured measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub time: SimTime,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
}

/// Retains every record in memory. Ended requests land through the
/// standard derived measurements, so a request shows up as one `count`
/// record plus its duration records.
#[derive(Default)]
pub struct MemorySink {
    records: RefCell<Vec<MetricRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// All captured records, in emission order.
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.borrow().clone()
    }

    /// Records for one measurement name.
    pub fn records_for(&self, measurement: &str) -> Vec<MetricRecord> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.measurement == measurement)
            .cloned()
            .collect()
    }

    /// Number of ended-request records (one per completed request).
    pub fn request_count(&self) -> usize {
        self.records_for("count").len()
    }

    /// Status tags of the ended-request records, in order.
    pub fn request_statuses(&self) -> Vec<String> {
        self.records_for("count")
            .iter()
            .filter_map(|r| r.tags.get("status").cloned())
            .collect()
    }
}

impl Telemetry for MemorySink {
    fn record(
        &self,
        measurement: &str,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, f64>,
        time: SimTime,
    ) {
        self.records.borrow_mut().push(MetricRecord {
            time,
            measurement: measurement.to_string(),
            tags,
            fields,
        });
    }
}
