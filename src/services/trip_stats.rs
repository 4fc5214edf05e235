//! Per-vehicle aggregation over stored trips

use crate::domain::trip::TripRecord;
use crate::domain::types::VehicleId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Which stored trips to aggregate
#[derive(Debug, Clone, Default)]
pub struct TripQuery {
    pub vin: Option<VehicleId>,
    /// Only trips starting at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl TripQuery {
    pub fn matches(&self, trip: &TripRecord) -> bool {
        self.vin.as_ref().map_or(true, |vin| *vin == trip.vin)
            && self.since.map_or(true, |since| trip.start_ts >= since)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleTripStats {
    pub vin: VehicleId,
    pub trip_count: usize,
    pub total_duration_s: f64,
    /// Sum of fused distances
    pub total_distance_m: f64,
    pub avg_duration_s: f64,
    pub avg_distance_m: f64,
    /// Matching trips, newest first
    pub trips: Vec<TripRecord>,
}

impl VehicleTripStats {
    fn new(vin: VehicleId) -> Self {
        Self {
            vin,
            trip_count: 0,
            total_duration_s: 0.0,
            total_distance_m: 0.0,
            avg_duration_s: 0.0,
            avg_distance_m: 0.0,
            trips: Vec::new(),
        }
    }

    fn add(&mut self, trip: &TripRecord) {
        self.trip_count += 1;
        self.total_duration_s += trip.duration_s;
        self.total_distance_m += trip.distance_fused_m;
        self.trips.push(trip.clone());
    }

    fn finish(mut self) -> Self {
        if self.trip_count > 0 {
            self.avg_duration_s = self.total_duration_s / self.trip_count as f64;
            self.avg_distance_m = self.total_distance_m / self.trip_count as f64;
        }
        self.trips.sort_by(|a, b| b.start_ts.cmp(&a.start_ts));
        self
    }
}

/// Group matching trips by vehicle; vehicles come out sorted by id
pub fn summarize(records: &[TripRecord], query: &TripQuery) -> Vec<VehicleTripStats> {
    let mut by_vin: BTreeMap<VehicleId, VehicleTripStats> = BTreeMap::new();
    for trip in records.iter().filter(|t| query.matches(t)) {
        by_vin
            .entry(trip.vin.clone())
            .or_insert_with(|| VehicleTripStats::new(trip.vin.clone()))
            .add(trip);
    }
    by_vin.into_values().map(VehicleTripStats::finish).collect()
}
