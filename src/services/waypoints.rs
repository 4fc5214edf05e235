//! Recorded route of a stored trip

use crate::domain::trip::TripRecord;
use crate::domain::types::VehicleId;
use crate::io::telemetry::{SourceError, TelemetrySource};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaypointError {
    #[error("no trip for {vin} starting at {start_ts}")]
    TripNotFound { vin: VehicleId, start_ts: DateTime<Utc> },
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub ts: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f64>,
}

/// Stored trip of `vin` starting exactly at `start_ts`
pub fn find_trip<'a>(
    records: &'a [TripRecord],
    vin: &VehicleId,
    start_ts: DateTime<Utc>,
) -> Result<&'a TripRecord, WaypointError> {
    records
        .iter()
        .find(|t| t.vin == *vin && t.start_ts == start_ts)
        .ok_or_else(|| WaypointError::TripNotFound { vin: vin.clone(), start_ts })
}

/// Samples between the trip's start and end inclusive, keeping only the
/// first visit to each coordinate
pub fn trip_waypoints(
    source: &dyn TelemetrySource,
    trip: &TripRecord,
) -> Result<Vec<Waypoint>, WaypointError> {
    let samples = source.load_samples(&trip.vin, Some(trip.start_ts))?;

    let mut seen: FxHashSet<(u64, u64)> = FxHashSet::default();
    let waypoints = samples
        .iter()
        .take_while(|s| s.ts <= trip.end_ts)
        .filter_map(|s| {
            let p = s.position?;
            seen.insert((p.lat.to_bits(), p.lon.to_bits())).then_some(Waypoint {
                ts: s.ts,
                lat: p.lat,
                lon: p.lon,
                speed: s.speed_kph,
            })
        })
        .collect();
    Ok(waypoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Sample;
    use crate::io::telemetry::MemoryTelemetrySource;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn stored_trip(start: i64, end: i64) -> TripRecord {
        TripRecord {
            vin: VehicleId::new("V1"),
            start_ts: t(start),
            end_ts: t(end),
            start_lat: None,
            start_lon: None,
            end_lat: None,
            end_lon: None,
            duration_s: (end - start) as f64,
            distance_gps_m: 0.0,
            distance_speed_m: 0.0,
            distance_fused_m: 0.0,
            avg_speed_kph: 0.0,
            max_speed_kph: 0.0,
            start_soc: None,
            end_soc: None,
            sample_count: 0,
        }
    }

    #[test]
    fn test_waypoints_within_trip_window() {
        let samples = vec![
            Sample::new(t(0)).at(52.0, 4.0),
            Sample::new(t(10)).at(52.001, 4.0).with_speed(30.0),
            Sample::new(t(20)).at(52.001, 4.0).with_speed(0.0),
            Sample::new(t(30)).at(52.002, 4.0).with_speed(25.0),
            Sample::new(t(40)).at(52.003, 4.0),
        ];
        let source = MemoryTelemetrySource::new().with_vehicle("V1", samples);

        let points = trip_waypoints(&source, &stored_trip(10, 30)).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].ts, t(10));
        assert_eq!(points[0].speed, Some(30.0));
        assert_eq!(points[1].lat, 52.002);
    }

    #[test]
    fn test_find_trip() {
        let records = vec![stored_trip(0, 600), stored_trip(900, 1500)];
        let vin = VehicleId::new("V1");
        assert_eq!(find_trip(&records, &vin, t(900)).unwrap().end_ts, t(1500));
        assert!(matches!(
            find_trip(&records, &vin, t(901)),
            Err(WaypointError::TripNotFound { .. })
        ));
    }
}
