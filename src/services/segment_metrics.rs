//! Duration, distance and speed aggregates for raw trips

use crate::domain::trip::{RawTrip, TripRecord};
use crate::domain::types::{seconds_between, Sample, VehicleId};
use crate::services::kinematics::Kinematics;

/// Build the trip record for `raw`
///
/// Distances sum the hops strictly after the start sample through the end
/// sample; speeds cover the whole inclusive range. Degenerate trips keep
/// zeroed metrics and are left for the filter to drop.
pub fn measure(
    vin: &VehicleId,
    raw: &RawTrip,
    samples: &[Sample],
    kinematics: &[Kinematics],
) -> TripRecord {
    let mut record = TripRecord::from_raw(vin, raw);
    if raw.is_degenerate() || raw.end.index >= kinematics.len() {
        return record;
    }

    let (s, e) = (raw.start.index, raw.end.index);
    let span = &kinematics[s..=e];

    let (gps, speed) = span[1..]
        .iter()
        .fold((0.0, 0.0), |(gps, speed), k| (gps + k.d_gps_m, speed + k.d_speed_m));
    let speed_sum: f64 = span.iter().map(|k| k.speed_kph).sum();
    let max_speed = span.iter().map(|k| k.speed_kph).fold(f64::NEG_INFINITY, f64::max);

    record.duration_s = seconds_between(samples[s].ts, samples[e].ts);
    record.distance_gps_m = gps;
    record.distance_speed_m = speed;
    record.distance_fused_m = gps.max(speed);
    record.avg_speed_kph = speed_sum / span.len() as f64;
    record.max_speed_kph = max_speed;
    record.sample_count = span.len();
    record
}

/// Measure every raw trip of one vehicle
pub fn measure_all(
    vin: &VehicleId,
    raw_trips: &[RawTrip],
    samples: &[Sample],
    kinematics: &[Kinematics],
) -> Vec<TripRecord> {
    raw_trips.iter().map(|raw| measure(vin, raw, samples, kinematics)).collect()
}
