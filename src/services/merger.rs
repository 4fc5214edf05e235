//! Coalesces filtered trips split by short reporting gaps
//!
//! A trip that resumes shortly after and close to where the previous one
//! ended is treated as the same real-world journey.

use crate::domain::trip::TripRecord;
use crate::domain::types::seconds_between;
use crate::infra::config::SegmentationParams;
use crate::services::distance::distance_between;
use crate::services::jitter::JitterTable;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct SegmentMerger {
    max_gap_s: f64,
    floor_m: f64,
}

impl SegmentMerger {
    pub fn new(params: &SegmentationParams) -> Self {
        Self { max_gap_s: params.merge_gap_s as f64, floor_m: params.merge_floor_m }
    }

    /// Merge rule: short gap and resumed within the day's noise radius
    #[inline]
    pub fn is_continuation(&self, gap_s: f64, proximity_m: f64, day_jitter_m: f64) -> bool {
        gap_s <= self.max_gap_s && proximity_m <= self.floor_m.max(day_jitter_m)
    }

    /// Merge `trips` in start order; the result is sorted and non-overlapping
    /// when the input is
    pub fn merge(&self, mut trips: Vec<TripRecord>, jitter: &JitterTable) -> Vec<TripRecord> {
        trips.sort_by(|a, b| a.start_ts.cmp(&b.start_ts));

        let mut merged: Vec<TripRecord> = Vec::with_capacity(trips.len());
        for next in trips {
            let Some(current) = merged.last_mut() else {
                merged.push(next);
                continue;
            };

            let gap_s = seconds_between(current.end_ts, next.start_ts);
            let proximity_m = distance_between(current.end_point(), next.start_point())
                .unwrap_or(f64::INFINITY);
            let day_jitter = jitter.radius_at(next.start_ts);

            if self.is_continuation(gap_s, proximity_m, day_jitter) {
                debug!(
                    vin = %current.vin,
                    first_start = %current.start_ts,
                    second_start = %next.start_ts,
                    gap_s = %gap_s,
                    proximity_m = format!("{:.1}", proximity_m),
                    "trips_merged"
                );
                absorb(current, next, gap_s);
            } else {
                merged.push(next);
            }
        }
        merged
    }
}

/// Extend `current` with `next`; average speed is the plain mean of the two
fn absorb(current: &mut TripRecord, next: TripRecord, gap_s: f64) {
    current.end_ts = next.end_ts;
    current.end_lat = next.end_lat;
    current.end_lon = next.end_lon;
    current.end_soc = next.end_soc;
    current.duration_s += next.duration_s + gap_s;
    current.distance_gps_m += next.distance_gps_m;
    current.distance_speed_m += next.distance_speed_m;
    current.distance_fused_m = current.distance_gps_m.max(current.distance_speed_m);
    current.avg_speed_kph = (current.avg_speed_kph + next.avg_speed_kph) / 2.0;
    current.max_speed_kph = current.max_speed_kph.max(next.max_speed_kph);
    current.sample_count += next.sample_count;
}
