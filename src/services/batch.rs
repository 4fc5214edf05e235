//! Batch driver - runs the pipeline for many vehicles concurrently
//!
//! Every vehicle is an isolated blocking job: its own samples, its own
//! jitter table, its own state machine. A failure (or panic) in one job is
//! recorded against that vehicle and the batch carries on. The sink is the
//! only shared resource and is idempotent by trip key, so a whole batch can
//! be retried safely.

use crate::domain::types::VehicleId;
use crate::infra::metrics::Metrics;
use crate::io::sink::{SinkError, TripSink};
use crate::io::telemetry::{SourceError, TelemetrySource};
use crate::services::pipeline::{SegmentationOutcome, TripPipeline};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What to process
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    /// Only samples at or after this instant are segmented
    pub since: Option<DateTime<Utc>>,
    /// Explicit vehicle list; every active vehicle when `None`
    pub vehicles: Option<Vec<VehicleId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Processed,
    /// Too few samples; not an error
    Skipped,
    Failed,
}

/// Outcome of one vehicle job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleResult {
    pub vin: VehicleId,
    pub status: VehicleStatus,
    pub samples: usize,
    pub raw_segments: usize,
    pub filtered_segments: usize,
    pub final_segments: usize,
    pub inserted: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VehicleResult {
    fn new(vin: VehicleId, status: VehicleStatus, duration_ms: u64) -> Self {
        Self {
            vin,
            status,
            samples: 0,
            raw_segments: 0,
            filtered_segments: 0,
            final_segments: 0,
            inserted: 0,
            duration_ms,
            error: None,
        }
    }

    fn failed(vin: VehicleId, duration_ms: u64, error: String) -> Self {
        Self { error: Some(error), ..Self::new(vin, VehicleStatus::Failed, duration_ms) }
    }
}

/// Totals for a whole run; `successful` counts every vehicle that did not fail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub since: Option<DateTime<Utc>>,
    pub total_vehicles: usize,
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
    pub raw_segments: usize,
    pub filtered_segments: usize,
    pub final_segments: usize,
    pub inserted: usize,
    pub avg_duration_ms: f64,
    /// Per-vehicle outcomes sorted by vehicle id
    pub results: Vec<VehicleResult>,
}

impl BatchSummary {
    pub fn from_results(since: Option<DateTime<Utc>>, mut results: Vec<VehicleResult>) -> Self {
        results.sort_by(|a, b| a.vin.cmp(&b.vin));

        let count = |status: VehicleStatus| results.iter().filter(|r| r.status == status).count();
        let sum = |field: fn(&VehicleResult) -> usize| results.iter().map(field).sum::<usize>();

        let failed = count(VehicleStatus::Failed);
        let total = results.len();
        let avg_duration_ms = if total > 0 {
            results.iter().map(|r| r.duration_ms as f64).sum::<f64>() / total as f64
        } else {
            0.0
        };

        Self {
            since,
            total_vehicles: total,
            successful: total - failed,
            skipped: count(VehicleStatus::Skipped),
            failed,
            raw_segments: sum(|r| r.raw_segments),
            filtered_segments: sum(|r| r.filtered_segments),
            final_segments: sum(|r| r.final_segments),
            inserted: sum(|r| r.inserted),
            avg_duration_ms,
            results,
        }
    }

    pub fn log(&self) {
        info!(
            vehicles = %self.total_vehicles,
            successful = %self.successful,
            skipped = %self.skipped,
            failed = %self.failed,
            raw_segments = %self.raw_segments,
            filtered_segments = %self.filtered_segments,
            final_segments = %self.final_segments,
            inserted = %self.inserted,
            avg_duration_ms = format!("{:.1}", self.avg_duration_ms),
            "batch_completed"
        );
    }
}

/// Shared handles every vehicle job needs
#[derive(Clone)]
struct VehicleJob {
    source: Arc<dyn TelemetrySource>,
    sink: Arc<dyn TripSink>,
    pipeline: TripPipeline,
    metrics: Arc<Metrics>,
    since: Option<DateTime<Utc>>,
}

impl VehicleJob {
    fn run(&self, vin: VehicleId) -> VehicleResult {
        let started = Instant::now();
        let outcome = self.segment_and_store(&vin);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut result) => {
                result.duration_ms = duration_ms;
                match result.status {
                    VehicleStatus::Skipped => self.metrics.record_vehicle_skipped(duration_ms),
                    _ => self.metrics.record_vehicle_processed(duration_ms),
                }
                result
            }
            Err(e) => {
                error!(vin = %vin, error = %e, duration_ms = %duration_ms, "vehicle_failed");
                self.metrics.record_vehicle_failed(duration_ms);
                VehicleResult::failed(vin, duration_ms, e.to_string())
            }
        }
    }

    fn segment_and_store(&self, vin: &VehicleId) -> Result<VehicleResult, VehicleError> {
        let samples = self.source.load_samples(vin, self.since)?;
        self.metrics.record_samples_loaded(samples.len() as u64);

        let report = match self.pipeline.run(vin, &samples) {
            SegmentationOutcome::InsufficientData { samples } => {
                info!(vin = %vin, samples = %samples, "vehicle_skipped_insufficient_data");
                let mut result = VehicleResult::new(vin.clone(), VehicleStatus::Skipped, 0);
                result.samples = samples;
                return Ok(result);
            }
            SegmentationOutcome::Segmented(report) => report,
        };

        self.metrics.record_segments(
            report.raw_segments as u64,
            report.filtered_segments as u64,
            report.final_segments() as u64,
        );

        let inserted = if report.trips.is_empty() {
            0
        } else {
            self.sink.insert_trips(&report.trips).inspect_err(|e| {
                error!(vin = %vin, trips = %report.trips.len(), error = %e, "sink_insert_failed");
            })?
        };
        self.metrics.record_inserted(inserted as u64);

        info!(
            vin = %vin,
            samples = %samples.len(),
            raw = %report.raw_segments,
            filtered = %report.filtered_segments,
            trips = %report.final_segments(),
            inserted = %inserted,
            "vehicle_processed"
        );

        Ok(VehicleResult {
            samples: samples.len(),
            raw_segments: report.raw_segments,
            filtered_segments: report.filtered_segments,
            final_segments: report.final_segments(),
            inserted,
            ..VehicleResult::new(vin.clone(), VehicleStatus::Processed, 0)
        })
    }
}

/// Runs the pipeline over a set of vehicles with bounded concurrency
pub struct BatchRunner {
    source: Arc<dyn TelemetrySource>,
    sink: Arc<dyn TripSink>,
    pipeline: TripPipeline,
    metrics: Arc<Metrics>,
    workers: usize,
}

impl BatchRunner {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        sink: Arc<dyn TripSink>,
        pipeline: TripPipeline,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { source, sink, pipeline, metrics, workers: 1 }
    }

    /// Maximum vehicles processed at once (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Process every requested vehicle and summarize
    ///
    /// Only listing the vehicles can fail the whole batch; per-vehicle
    /// errors end up in the summary.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchSummary, SourceError> {
        let BatchRequest { since, vehicles } = request;
        let mut vins = match vehicles {
            Some(vins) => vins,
            None => self.source.vehicles(since)?,
        };
        vins.sort();
        vins.dedup();

        self.metrics.record_vehicles_queued(vins.len() as u64);
        info!(
            vehicles = %vins.len(),
            since = ?since,
            workers = %self.workers,
            "batch_started"
        );

        let job = VehicleJob {
            source: self.source.clone(),
            sink: self.sink.clone(),
            pipeline: self.pipeline,
            metrics: self.metrics.clone(),
            since,
        };
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for vin in vins {
            let job = job.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                // Semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let metrics = job.metrics.clone();
                let blocking_vin = vin.clone();
                match tokio::task::spawn_blocking(move || job.run(blocking_vin)).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(vin = %vin, error = %e, "vehicle_job_panicked");
                        metrics.record_vehicle_failed(0);
                        VehicleResult::failed(vin, 0, format!("vehicle job aborted: {e}"))
                    }
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "vehicle_task_join_failed"),
            }
        }

        let summary = BatchSummary::from_results(since, results);
        summary.log();
        Ok(summary)
    }
}
