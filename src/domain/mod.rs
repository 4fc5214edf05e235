//! Domain models - core business types and trip model
//!
//! This module contains the canonical data types used throughout the system:
//! - `Sample` - one telemetry reading for a vehicle
//! - `VehicleId` / `GeoPoint` - identity and position newtypes
//! - `RawTrip` - a movement episode detected by the state machine
//! - `TripRecord` - a final trip as written to the sink

pub mod trip;
pub mod types;

// Re-export commonly used types at module level
pub use trip::{OpenTrip, RawTrip, TripEndpoint, TripKey, TripRecord};
pub use types::{seconds_between, GeoPoint, Sample, VehicleId};
