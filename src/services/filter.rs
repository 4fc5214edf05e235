//! Minimum duration and distance filter for measured trips

use crate::domain::trip::TripRecord;
use crate::infra::config::SegmentationParams;
use tracing::debug;

/// Drops micro-movements: a trip survives only when it is both long enough
/// and far enough
#[derive(Debug, Clone, Copy)]
pub struct SegmentFilter {
    min_duration_s: f64,
    min_distance_m: f64,
}

impl SegmentFilter {
    pub fn new(params: &SegmentationParams) -> Self {
        Self {
            min_duration_s: params.min_trip_duration_s as f64,
            min_distance_m: params.min_trip_distance_m,
        }
    }

    #[inline]
    pub fn keep(&self, trip: &TripRecord) -> bool {
        trip.duration_s >= self.min_duration_s && trip.distance_fused_m >= self.min_distance_m
    }

    pub fn apply(&self, trips: Vec<TripRecord>) -> Vec<TripRecord> {
        trips
            .into_iter()
            .filter(|trip| {
                let keep = self.keep(trip);
                if !keep {
                    debug!(
                        vin = %trip.vin,
                        start_ts = %trip.start_ts,
                        duration_s = %trip.duration_s,
                        distance_m = format!("{:.1}", trip.distance_fused_m),
                        "trip_filtered_out"
                    );
                }
                keep
            })
            .collect()
    }
}
