//! JSONL file sink.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde_json::json;

use gridsim_core::Telemetry;
use gridsim_kernel::SimTime;

/// Appends one JSON object per record to a file. The timestamp is the
/// virtual time in seconds; tags and fields come through verbatim, so the
/// output loads straight into dataframe tooling.
pub struct JsonlSink {
    writer: RefCell<Option<BufWriter<File>>>,
}

impl JsonlSink {
    /// Create (truncating) the output file.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(JsonlSink {
            writer: RefCell::new(Some(BufWriter::new(file))),
        })
    }
}

impl Telemetry for JsonlSink {
    fn record(
        &self,
        measurement: &str,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, f64>,
        time: SimTime,
    ) {
        let mut writer = self.writer.borrow_mut();
        let Some(writer) = writer.as_mut() else {
            return; // closed
        };
        let line = json!({
            "time": time.as_secs_f64(),
            "measurement": measurement,
            "tags": tags,
            "fields": fields,
        });
        if let Err(error) = writeln!(writer, "{line}") {
            tracing::error!(%error, "failed to write telemetry record");
        }
    }

    fn flush(&self) {
        if let Some(writer) = self.writer.borrow_mut().as_mut() {
            if let Err(error) = writer.flush() {
                tracing::error!(%error, "failed to flush telemetry sink");
            }
        }
    }

    fn close(&self) {
        self.flush();
        self.writer.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_round_trip_through_the_file() {
        let dir = std::env::temp_dir().join("gridsim-jsonl-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("records.jsonl");

        let sink = JsonlSink::create(&path).unwrap();
        sink.record(
            "count",
            BTreeMap::from([("status".to_string(), "SUCCEED".to_string())]),
            BTreeMap::from([("value".to_string(), 1.0)]),
            SimTime::from_secs_f64(2.5),
        );
        sink.close();

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["measurement"], "count");
        assert_eq!(line["time"], 2.5);
        assert_eq!(line["tags"]["status"], "SUCCEED");
        assert_eq!(line["fields"]["value"], 1.0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn records_after_close_are_dropped() {
        let dir = std::env::temp_dir().join("gridsim-jsonl-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("closed.jsonl");

        let sink = JsonlSink::create(&path).unwrap();
        sink.close();
        sink.record(
            "count",
            BTreeMap::new(),
            BTreeMap::new(),
            SimTime::ZERO,
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        std::fs::remove_file(&path).ok();
    }
}
