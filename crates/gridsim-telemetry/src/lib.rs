//! gridsim-telemetry — sinks for simulation measurements.
//!
//! The core emits request records and periodic gauges through the
//! `Telemetry` trait; this crate provides the concrete sinks:
//!
//! - [`LogSink`] — structured `tracing` events (the default for CLI runs)
//! - [`MemorySink`] — in-memory retention for tests and programmatic
//!   inspection
//! - [`JsonlSink`] — one JSON object per record appended to a file, for
//!   loading into external analysis tooling

pub mod jsonl;
pub mod log;
pub mod memory;

pub use jsonl::JsonlSink;
pub use log::LogSink;
pub use memory::{MemorySink, MetricRecord};
