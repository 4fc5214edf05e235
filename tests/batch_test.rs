//! Multi-vehicle batch runs against in-memory and file-backed stores

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::io::Write;
use std::sync::Arc;
use tempfile::{tempdir, NamedTempFile};
use trip_segmenter::domain::{Sample, TripRecord, VehicleId};
use trip_segmenter::infra::{Metrics, SegmentationParams};
use trip_segmenter::io::{
    JsonlTelemetrySource, JsonlTripSink, MemoryTelemetrySource, MemoryTripSink, SinkError,
    SourceError, TelemetrySource, TripSink,
};
use trip_segmenter::services::{BatchRequest, BatchRunner, TripPipeline, VehicleStatus};

const DEG_PER_M: f64 = 1.0 / 111_195.0;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 6, 0, 0).unwrap() + Duration::seconds(secs)
}

/// Parked 30 min, one 20 minute drive at 40 km/h, parked again
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
            let noise = if i % 2 == 1 { 5e-6 } else { 0.0 };
            Sample::new(at(t)).at(52.0 + meters * DEG_PER_M + noise, 4.0).with_speed(kph)
        })
        .collect()
}

fn parked(count: usize) -> Vec<Sample> {
    (0..count).map(|i| Sample::new(at(30 * i as i64)).at(52.0, 4.0).with_speed(0.0)).collect()
}

/// Rejects every batch containing a trip of one vehicle
struct FailingSink {
    inner: MemoryTripSink,
    broken_vin: VehicleId,
}

impl TripSink for FailingSink {
    fn insert_trips(&self, records: &[TripRecord]) -> Result<usize, SinkError> {
        if records.iter().any(|r| r.vin == self.broken_vin) {
            return Err(SinkError::Write {
                path: "trips".to_string(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.insert_trips(records)
    }
}

/// Panics while loading one vehicle
struct PanickingSource {
    inner: MemoryTelemetrySource,
    broken_vin: VehicleId,
}

impl TelemetrySource for PanickingSource {
    fn vehicles(&self, since: Option<DateTime<Utc>>) -> Result<Vec<VehicleId>, SourceError> {
        self.inner.vehicles(since)
    }

    fn load_samples(
        &self,
        vin: &VehicleId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, SourceError> {
        if *vin == self.broken_vin {
            panic!("corrupt telemetry for {vin}");
        }
        self.inner.load_samples(vin, since)
    }
}

fn fleet() -> MemoryTelemetrySource {
    MemoryTelemetrySource::new()
        .with_vehicle("VIN-A", commute())
        .with_vehicle("VIN-B", commute())
        .with_vehicle("VIN-C", parked(5))
        .with_vehicle("VIN-D", parked(120))
}

fn runner(source: Arc<dyn TelemetrySource>, sink: Arc<dyn TripSink>) -> BatchRunner {
    BatchRunner::new(
        source,
        sink,
        TripPipeline::new(SegmentationParams::default()),
        Arc::new(Metrics::new()),
    )
    .with_workers(2)
}

#[tokio::test]
async fn test_batch_processes_every_vehicle() {
    let sink = Arc::new(MemoryTripSink::new());
    let summary = runner(Arc::new(fleet()), sink.clone())
        .run(BatchRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.total_vehicles, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.successful, 4);
    assert_eq!(summary.inserted, 2);
    assert_eq!(sink.len(), 2);

    let vins: Vec<&str> = summary.results.iter().map(|r| r.vin.as_str()).collect();
    assert_eq!(vins, ["VIN-A", "VIN-B", "VIN-C", "VIN-D"]);

    let skipped = &summary.results[2];
    assert_eq!(skipped.status, VehicleStatus::Skipped);
    assert_eq!(skipped.samples, 5);
    assert_eq!(skipped.inserted, 0);

    let idle = &summary.results[3];
    assert_eq!(idle.status, VehicleStatus::Processed);
    assert_eq!(idle.final_segments, 0);
}

#[tokio::test]
async fn test_sink_failure_is_isolated() {
    let sink = Arc::new(FailingSink {
        inner: MemoryTripSink::new(),
        broken_vin: VehicleId::new("VIN-B"),
    });
    let summary = runner(Arc::new(fleet()), sink.clone())
        .run(BatchRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.successful, 3);
    assert_eq!(sink.inner.len(), 1);

    let failed = summary.results.iter().find(|r| r.vin.as_str() == "VIN-B").unwrap();
    assert_eq!(failed.status, VehicleStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("disk full"));

    let ok = summary.results.iter().find(|r| r.vin.as_str() == "VIN-A").unwrap();
    assert_eq!(ok.status, VehicleStatus::Processed);
    assert_eq!(ok.inserted, 1);
}

#[tokio::test]
async fn test_panicking_vehicle_is_isolated() {
    let source = PanickingSource { inner: fleet(), broken_vin: VehicleId::new("VIN-A") };
    let sink = Arc::new(MemoryTripSink::new());
    let summary = runner(Arc::new(source), sink.clone())
        .run(BatchRequest::default())
        .await
        .unwrap();

    assert_eq!(summary.total_vehicles, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(sink.records()[0].vin.as_str(), "VIN-B");

    let failed = &summary.results[0];
    assert_eq!(failed.vin.as_str(), "VIN-A");
    assert_eq!(failed.status, VehicleStatus::Failed);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_rerun_inserts_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out").join("trips.jsonl");
    let source: Arc<dyn TelemetrySource> = Arc::new(fleet());

    let first = runner(source.clone(), Arc::new(JsonlTripSink::open(&path).unwrap()))
        .run(BatchRequest::default())
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);

    let second = runner(source, Arc::new(JsonlTripSink::open(&path).unwrap()))
        .run(BatchRequest::default())
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.final_segments, 2);
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn test_explicit_vehicle_list() {
    let sink = Arc::new(MemoryTripSink::new());
    let request = BatchRequest {
        since: None,
        vehicles: Some(vec![VehicleId::new("VIN-A"), VehicleId::new("VIN-A")]),
    };
    let summary = runner(Arc::new(fleet()), sink.clone()).run(request).await.unwrap();

    assert_eq!(summary.total_vehicles, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(sink.records()[0].vin.as_str(), "VIN-A");
}

#[tokio::test]
async fn test_since_excludes_stale_vehicles() {
    let last_week: Vec<Sample> = parked(50)
        .into_iter()
        .map(|s| Sample { ts: s.ts - Duration::days(7), ..s })
        .collect();
    let source = MemoryTelemetrySource::new()
        .with_vehicle("VIN-A", commute())
        .with_vehicle("VIN-OLD", last_week);
    let summary = runner(Arc::new(source), Arc::new(MemoryTripSink::new()))
        .run(BatchRequest { since: Some(at(0)), vehicles: None })
        .await
        .unwrap();

    assert_eq!(summary.total_vehicles, 1);
    assert_eq!(summary.results[0].vin.as_str(), "VIN-A");
}

#[tokio::test]
async fn test_jsonl_source_end_to_end() {
    let mut file = NamedTempFile::new().unwrap();
    for sample in commute() {
        let position = sample.position.unwrap();
        writeln!(
            file,
            r#"{{"vin":"VIN-J","ts":"{}","lat":{},"lon":{},"speed":"{}"}}"#,
            sample.ts.to_rfc3339(),
            position.lat,
            position.lon,
            sample.speed_or_zero()
        )
        .unwrap();
    }
    writeln!(file, "not json").unwrap();
    writeln!(file, r#"{{"vin":"VIN-J","ts":"2025-11-03T06:00:05Z","lat":0,"lon":0}}"#).unwrap();
    file.flush().unwrap();

    let source = JsonlTelemetrySource::open(file.path()).unwrap();
    let stats = source.stats();
    assert_eq!(stats.samples, 200);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.no_fix, 1);

    let sink = Arc::new(MemoryTripSink::new());
    let summary =
        runner(Arc::new(source), sink.clone()).run(BatchRequest::default()).await.unwrap();

    assert_eq!(summary.total_vehicles, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(sink.records()[0].vin.as_str(), "VIN-J");
}
