//! End-to-end segmentation scenarios

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::tempdir;
use trip_segmenter::domain::{Sample, TripRecord, VehicleId};
use trip_segmenter::infra::SegmentationParams;
use trip_segmenter::io::{load_records, JsonlTripSink, TripSink};
use trip_segmenter::services::{SegmentationOutcome, SegmentationReport, TripPipeline};

/// Degrees of latitude per meter
const DEG_PER_M: f64 = 1.0 / 111_195.0;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 6, 0, 0).unwrap() + Duration::seconds(secs)
}

/// Alternating sub-meter offset that keeps parked samples in a tight cluster
fn noise(i: usize) -> f64 {
    if i % 2 == 1 {
        5e-6
    } else {
        0.0
    }
}

/// 200 samples over two hours: parked 30 min, 40 km/h for 20 min, parked
fn commute() -> Vec<Sample> {
    (0..200)
        .map(|i| {
            let t = 36 * i as i64;
            let (meters, kph) = if t < 1800 {
                (0.0, 0.0)
            } else if t < 3000 {
                ((t - 1800) as f64 * 40.0 / 3.6, 40.0)
            } else {
                (1200.0 * 40.0 / 3.6, 0.0)
            };
            Sample::new(at(t)).at(52.0 + meters * DEG_PER_M + noise(i), 4.0).with_speed(kph)
        })
        .collect()
}

/// Two 20 minute drives separated by a half hour stop
fn two_drives() -> Vec<Sample> {
    let mut meters = 0.0;
    (0..250)
        .map(|i| {
            let t = 36 * i as i64;
            let moving = (1800..3000).contains(&t) || (5000..6200).contains(&t);
            let kph = if moving { 40.0 } else { 0.0 };
            let sample =
                Sample::new(at(t)).at(52.0 + meters * DEG_PER_M + noise(i), 4.0).with_speed(kph);
            if moving {
                meters += 40.0 / 3.6 * 36.0;
            }
            sample
        })
        .collect()
}

fn segment(samples: &[Sample]) -> SegmentationReport {
    let pipeline = TripPipeline::new(SegmentationParams::default());
    match pipeline.run(&VehicleId::new("LSJA24U66NG000001"), samples) {
        SegmentationOutcome::Segmented(report) => report,
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_commute_yields_one_trip() {
    let report = segment(&commute());
    assert_eq!(report.trips.len(), 1, "{:?}", report.trips);

    let trip = &report.trips[0];
    let expected_m = 13_000.0;
    assert!(
        (trip.distance_fused_m - expected_m).abs() <= expected_m * 0.05,
        "fused distance {}",
        trip.distance_fused_m
    );
    // Opens one sample into the drive and closes only after the 120 s stop
    // window has seen no movement, so a 1200 s drive at a 36 s cadence
    // measures about 1330 s
    assert!((1140.0..=1380.0).contains(&trip.duration_s), "duration {}", trip.duration_s);
    assert!(trip.start_ts >= at(1800) && trip.start_ts <= at(1800 + 72));
    assert!(trip.end_ts >= at(3000));
    assert_eq!(trip.max_speed_kph, 40.0);
    assert!(trip.sample_count > 30);
}

#[test]
fn test_parked_cluster_yields_no_trips() {
    let samples: Vec<Sample> = (0..200)
        .map(|i| Sample::new(at(36 * i as i64)).at(52.0 + noise(i), 4.0).with_speed(0.0))
        .collect();
    let report = segment(&samples);
    assert_eq!(report.raw_segments, 0);
    assert!(report.trips.is_empty());
}

#[test]
fn test_zero_everything_yields_no_trips() {
    let samples: Vec<Sample> =
        (0..50).map(|i| Sample::new(at(60 * i as i64)).at(52.0, 4.0)).collect();
    assert!(segment(&samples).trips.is_empty());
}

#[test]
fn test_deterministic() {
    let samples = two_drives();
    assert_eq!(segment(&samples), segment(&samples));
}

#[test]
fn test_trips_are_ordered_and_disjoint() {
    let report = segment(&two_drives());
    assert_eq!(report.trips.len(), 2);
    for pair in report.trips.windows(2) {
        assert!(pair[0].start_ts < pair[1].start_ts);
        assert!(pair[0].end_ts < pair[1].start_ts);
    }
    for trip in &report.trips {
        assert!(trip.start_ts < trip.end_ts);
    }
}

#[test]
fn test_silence_closes_trip_before_gap() {
    let mut samples = Vec::new();
    let mut t = 0;
    let mut meters = 0.0;
    for _ in 0..20 {
        samples.push(Sample::new(at(t)).at(52.0, 4.0).with_speed(0.0));
        t += 10;
    }
    for _ in 0..30 {
        samples.push(Sample::new(at(t)).at(52.0 + meters * DEG_PER_M, 4.0).with_speed(50.0));
        meters += 50.0 / 3.6 * 10.0;
        t += 10;
    }
    let last_before_gap = samples[samples.len() - 1].ts;

    // ten minutes without data, then the vehicle is still driving
    t += 590;
    for _ in 0..30 {
        samples.push(Sample::new(at(t)).at(52.0 + meters * DEG_PER_M, 4.0).with_speed(50.0));
        meters += 50.0 / 3.6 * 10.0;
        t += 10;
    }
    for _ in 0..20 {
        samples.push(Sample::new(at(t)).at(52.0 + meters * DEG_PER_M, 4.0).with_speed(0.0));
        t += 10;
    }

    let report = segment(&samples);
    assert_eq!(report.trips.len(), 2);
    assert_eq!(report.trips[0].end_ts, last_before_gap);
    assert!(report.trips[1].start_ts > last_before_gap + Duration::seconds(180));
}

#[test]
fn test_jitter_clamped_per_day() {
    // parked samples hopping ~200 m then ~2 m, one day each
    let scattered = |day: i64, spread_m: f64| {
        (0..40).map(move |i| {
            let lat = 52.0 + if i % 2 == 1 { spread_m * DEG_PER_M } else { 0.0 };
            Sample::new(at(day * 86_400 + 30 * i as i64)).at(lat, 4.0).with_speed(0.0)
        })
    };
    let samples: Vec<Sample> = scattered(0, 200.0).chain(scattered(1, 2.0)).collect();

    let report = segment(&samples);
    assert_eq!(report.jitter.radius_at(at(0)), 35.0);
    assert_eq!(report.jitter.radius_at(at(86_400)), 10.0);
}

#[test]
fn test_sink_write_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trips.jsonl");
    let trips: Vec<TripRecord> = segment(&two_drives()).trips;

    let sink = JsonlTripSink::open(&path).unwrap();
    assert_eq!(sink.insert_trips(&trips).unwrap(), 2);
    assert_eq!(sink.insert_trips(&trips).unwrap(), 0);

    // a fresh process re-running the same batch
    let reopened = JsonlTripSink::open(&path).unwrap();
    assert_eq!(reopened.insert_trips(&segment(&two_drives()).trips).unwrap(), 0);

    let stored = load_records(&path).unwrap();
    assert_eq!(stored.len(), trips.len());
    for (stored, trip) in stored.iter().zip(&trips) {
        assert_eq!(stored.key(), trip.key());
    }
}
