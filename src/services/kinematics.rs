//! Per-sample movement evidence derived from consecutive samples

use crate::domain::types::{seconds_between, Sample};
use crate::infra::config::SegmentationParams;
use crate::services::distance::distance_between;

/// km/h to m/s
pub const KPH_TO_MPS: f64 = 1.0 / 3.6;

/// Quantities derived from a sample and its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    /// Seconds since the previous sample, never negative
    pub dt_s: f64,
    /// Great-circle hop from the previous sample; 0 when either position is missing
    pub d_gps_m: f64,
    /// Measured speed integrated over `dt_s`
    pub d_speed_m: f64,
    /// GPS-implied speed; 0 when `dt_s` is 0
    pub v_est_mps: f64,
    /// Measured speed with a missing reading as 0
    pub speed_kph: f64,
    /// Measured speed indicates movement
    pub speed_flag: bool,
    /// GPS displacement indicates movement
    pub disp_flag: bool,
}

impl Kinematics {
    /// Either sensor reports movement for this sample
    #[inline]
    pub fn has_evidence(&self) -> bool {
        self.speed_flag || self.disp_flag
    }
}

/// Derive kinematics for every sample; the first sample has no predecessor
/// and gets zero distances
pub fn derive(samples: &[Sample], params: &SegmentationParams) -> Vec<Kinematics> {
    let mut out = Vec::with_capacity(samples.len());
    let mut prev: Option<&Sample> = None;

    for sample in samples {
        let speed_kph = sample.speed_or_zero();
        let (dt_s, d_gps_m) = match prev {
            Some(p) => (
                seconds_between(p.ts, sample.ts).max(0.0),
                distance_between(p.position, sample.position).unwrap_or(0.0),
            ),
            None => (0.0, 0.0),
        };
        let v_est_mps = if dt_s > 0.0 { d_gps_m / dt_s } else { 0.0 };

        out.push(Kinematics {
            dt_s,
            d_gps_m,
            d_speed_m: speed_kph * KPH_TO_MPS * dt_s,
            v_est_mps,
            speed_kph,
            speed_flag: speed_kph > params.speed_flag_kph,
            disp_flag: v_est_mps > params.displacement_flag_mps,
        });
        prev = Some(sample);
    }

    out
}
