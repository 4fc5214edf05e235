//! Trip data model: raw segments from the state machine and final records

use crate::domain::types::{GeoPoint, Sample, VehicleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One end of a trip, pinned to the sample it was anchored on
#[derive(Debug, Clone, PartialEq)]
pub struct TripEndpoint {
    /// Index of the sample within the vehicle's batch
    pub index: usize,
    pub ts: DateTime<Utc>,
    pub position: Option<GeoPoint>,
    pub soc: Option<f64>,
}

impl TripEndpoint {
    pub fn from_sample(index: usize, sample: &Sample) -> Self {
        Self { index, ts: sample.ts, position: sample.position, soc: sample.soc }
    }
}

/// A trip the state machine has opened but not yet closed
#[derive(Debug, Clone, PartialEq)]
pub struct OpenTrip {
    start: TripEndpoint,
}

impl OpenTrip {
    pub fn new(start: TripEndpoint) -> Self {
        Self { start }
    }

    pub fn start(&self) -> &TripEndpoint {
        &self.start
    }

    /// Close the trip, producing an immutable raw segment
    pub fn close(self, end: TripEndpoint) -> RawTrip {
        RawTrip { start: self.start, end }
    }
}

/// A closed movement episode before filtering and merging
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrip {
    pub start: TripEndpoint,
    pub end: TripEndpoint,
}

impl RawTrip {
    /// True when the trip does not span at least two samples
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.end.index <= self.start.index
    }
}

/// Natural identity of a persisted trip
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TripKey {
    pub vin: VehicleId,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
}

/// Final trip record as written to the trip sink
///
/// Field names follow the `trips` table columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub vin: VehicleId,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lon: Option<f64>,
    pub duration_s: f64,
    pub distance_gps_m: f64,
    pub distance_speed_m: f64,
    pub distance_fused_m: f64,
    pub avg_speed_kph: f64,
    pub max_speed_kph: f64,
    pub start_soc: Option<f64>,
    pub end_soc: Option<f64>,
    #[serde(default)]
    pub sample_count: usize,
}

impl TripRecord {
    /// Record for a raw trip with all metrics zeroed
    pub fn from_raw(vin: &VehicleId, raw: &RawTrip) -> Self {
        Self {
            vin: vin.clone(),
            start_ts: raw.start.ts,
            end_ts: raw.end.ts,
            start_lat: raw.start.position.map(|p| p.lat),
            start_lon: raw.start.position.map(|p| p.lon),
            end_lat: raw.end.position.map(|p| p.lat),
            end_lon: raw.end.position.map(|p| p.lon),
            duration_s: 0.0,
            distance_gps_m: 0.0,
            distance_speed_m: 0.0,
            distance_fused_m: 0.0,
            avg_speed_kph: 0.0,
            max_speed_kph: 0.0,
            start_soc: raw.start.soc,
            end_soc: raw.end.soc,
            sample_count: 0,
        }
    }

    pub fn key(&self) -> TripKey {
        TripKey { vin: self.vin.clone(), start_ts: self.start_ts, end_ts: self.end_ts }
    }

    pub fn start_point(&self) -> Option<GeoPoint> {
        GeoPoint::from_parts(self.start_lat, self.start_lon)
    }

    pub fn end_point(&self) -> Option<GeoPoint> {
        GeoPoint::from_parts(self.end_lat, self.end_lon)
    }

    /// State-of-charge consumed over the trip, when both ends reported it
    pub fn soc_used(&self) -> Option<f64> {
        Some(self.start_soc? - self.end_soc?)
    }
}
