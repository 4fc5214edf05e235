//! IO modules - external system interfaces
//!
//! - `telemetry` - Time-ordered vehicle samples (JSONL file or in-memory)
//! - `sink` - Idempotent trip persistence (JSONL file or in-memory)

pub mod sink;
pub mod telemetry;

// Re-export commonly used types
pub use sink::{load_records, JsonlTripSink, MemoryTripSink, SinkError, TripSink};
pub use telemetry::{
    JsonlTelemetrySource, MemoryTelemetrySource, SourceError, TelemetrySource,
};
