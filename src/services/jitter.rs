//! Adaptive per-day GPS jitter estimation
//!
//! Each calendar day gets its own noise radius: a high percentile of the
//! hop distance between consecutive samples while the vehicle is parked.
//! Days with too few parked samples fall back to every sample of the day.
//! The radius scales the state machine's start/stop thresholds.

use crate::domain::types::Sample;
use crate::infra::config::SegmentationParams;
use crate::services::kinematics::Kinematics;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-day jitter radii for one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct JitterTable {
    radii: BTreeMap<NaiveDate, f64>,
    offset: FixedOffset,
    default_m: f64,
}

impl JitterTable {
    /// Empty table; every lookup returns `default_m`
    pub fn empty(offset: FixedOffset, default_m: f64) -> Self {
        Self { radii: BTreeMap::new(), offset, default_m }
    }

    /// Calendar day of `ts` in the table's time zone
    #[inline]
    pub fn day_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    pub fn get(&self, day: NaiveDate) -> Option<f64> {
        self.radii.get(&day).copied()
    }

    /// Radius for the day containing `ts`, or the default when the day has
    /// no estimate
    #[inline]
    pub fn radius_at(&self, ts: DateTime<Utc>) -> f64 {
        self.get(self.day_of(ts)).unwrap_or(self.default_m)
    }

    pub fn insert(&mut self, day: NaiveDate, radius_m: f64) {
        self.radii.insert(day, radius_m);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.radii.iter().map(|(day, r)| (*day, *r))
    }

    pub fn len(&self) -> usize {
        self.radii.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radii.is_empty()
    }
}

/// Percentile with linear interpolation between closest ranks
///
/// Sorts `values` in place. Returns `None` for an empty slice.
pub fn percentile(values: &mut [f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

#[derive(Default)]
struct DayHops {
    all: Vec<f64>,
    stationary: Vec<f64>,
}

/// Estimate the jitter radius of every day present in `samples`
///
/// `kinematics` must be the output of `kinematics::derive` for the same
/// samples.
pub fn estimate(
    samples: &[Sample],
    kinematics: &[Kinematics],
    params: &SegmentationParams,
) -> JitterTable {
    let mut table = JitterTable::empty(params.day_offset, params.jitter_default_m);
    let mut days: BTreeMap<NaiveDate, DayHops> = BTreeMap::new();

    for (sample, kin) in samples.iter().zip(kinematics) {
        let day = days.entry(table.day_of(sample.ts)).or_default();
        let hop = if kin.d_gps_m.is_finite() { kin.d_gps_m } else { 0.0 };
        day.all.push(hop);
        if kin.speed_kph <= params.stationary_speed_kph {
            day.stationary.push(hop);
        }
    }

    for (day, mut hops) in days {
        let stationary_count = hops.stationary.len();
        let pool = if stationary_count >= params.min_stationary_samples {
            &mut hops.stationary
        } else {
            &mut hops.all
        };

        let Some(raw) = percentile(pool, params.jitter_percentile) else {
            continue;
        };
        let radius = raw.clamp(params.jitter_min_m, params.jitter_max_m);

        debug!(
            day = %day,
            stationary = %stationary_count,
            raw_m = format!("{:.2}", raw),
            radius_m = format!("{:.2}", radius),
            "jitter_estimated"
        );
        table.insert(day, radius);
    }

    table
}
