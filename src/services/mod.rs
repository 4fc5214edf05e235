//! Services - trip segmentation and batch processing
//!
//! Per-vehicle algorithm, leaves first:
//! - `distance` - Great-circle distance
//! - `kinematics` - Per-sample movement evidence
//! - `jitter` - Adaptive per-day GPS noise radius
//! - `window` - Trailing evidence window
//! - `segmenter` - Hysteresis state machine emitting raw trips
//! - `segment_metrics` - Duration/distance/speed per raw trip
//! - `filter` - Minimum duration and distance
//! - `merger` - Coalescing of trips split by short gaps
//! - `pipeline` - The steps above wired together
//!
//! Around it:
//! - `batch` - Concurrent multi-vehicle driver
//! - `trip_stats` - Aggregation over stored trips
//! - `waypoints` - Recorded route of a stored trip

pub mod batch;
pub mod distance;
pub mod filter;
pub mod jitter;
pub mod kinematics;
pub mod merger;
pub mod pipeline;
pub mod segment_metrics;
pub mod segmenter;
pub mod trip_stats;
pub mod waypoints;
pub mod window;

// Re-export commonly used types
pub use batch::{BatchRequest, BatchRunner, BatchSummary, VehicleResult, VehicleStatus};
pub use jitter::JitterTable;
pub use pipeline::{SegmentationOutcome, SegmentationReport, TripPipeline};
pub use segmenter::TripStateMachine;
pub use trip_stats::{summarize, TripQuery, VehicleTripStats};
pub use waypoints::{find_trip, trip_waypoints, Waypoint, WaypointError};
