//! Per-vehicle segmentation pipeline
//!
//! kinematics -> jitter -> state machine -> metrics -> filter -> merge.
//! Pure and deterministic; nothing here touches I/O.

use crate::domain::trip::TripRecord;
use crate::domain::types::{Sample, VehicleId};
use crate::infra::config::SegmentationParams;
use crate::services::filter::SegmentFilter;
use crate::services::jitter::{self, JitterTable};
use crate::services::kinematics;
use crate::services::merger::SegmentMerger;
use crate::services::segment_metrics;
use crate::services::segmenter;
use tracing::debug;

/// Trips produced for one vehicle, with the per-stage counts
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationReport {
    pub raw_segments: usize,
    pub filtered_segments: usize,
    /// Final trips, sorted by start time and non-overlapping
    pub trips: Vec<TripRecord>,
    pub jitter: JitterTable,
}

impl SegmentationReport {
    pub fn final_segments(&self) -> usize {
        self.trips.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationOutcome {
    /// Too few samples to attempt segmentation; not an error
    InsufficientData { samples: usize },
    Segmented(SegmentationReport),
}

#[derive(Debug, Clone, Copy)]
pub struct TripPipeline {
    params: SegmentationParams,
    filter: SegmentFilter,
    merger: SegmentMerger,
}

impl TripPipeline {
    pub fn new(params: SegmentationParams) -> Self {
        Self { filter: SegmentFilter::new(&params), merger: SegmentMerger::new(&params), params }
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    /// Segment one vehicle's time-sorted samples
    pub fn run(&self, vin: &VehicleId, samples: &[Sample]) -> SegmentationOutcome {
        if samples.len() < self.params.min_samples {
            return SegmentationOutcome::InsufficientData { samples: samples.len() };
        }

        let kin = kinematics::derive(samples, &self.params);
        let jitter = jitter::estimate(samples, &kin, &self.params);
        let raw = segmenter::segment(samples, &kin, &jitter, &self.params);
        let measured = segment_metrics::measure_all(vin, &raw, samples, &kin);
        let filtered = self.filter.apply(measured);
        let filtered_segments = filtered.len();
        let trips = self.merger.merge(filtered, &jitter);

        debug!(
            vin = %vin,
            samples = %samples.len(),
            jitter_days = %jitter.len(),
            raw = %raw.len(),
            filtered = %filtered_segments,
            merged = %trips.len(),
            "vehicle_segmented"
        );

        SegmentationOutcome::Segmented(SegmentationReport {
            raw_segments: raw.len(),
            filtered_segments,
            trips,
            jitter,
        })
    }
}
