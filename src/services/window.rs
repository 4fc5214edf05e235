//! Sliding evidence window over the most recent samples
//!
//! Bounded ordered buffer: entries older than the longest horizon are
//! evicted from the front on every push, so aggregation only ever walks a
//! few minutes of data.

use crate::services::kinematics::Kinematics;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Movement evidence contributed by one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    pub ts: DateTime<Utc>,
    pub speed_flag: bool,
    pub disp_flag: bool,
    pub d_gps_m: f64,
    pub d_speed_m: f64,
}

impl Evidence {
    pub fn new(ts: DateTime<Utc>, kin: &Kinematics) -> Self {
        Self {
            ts,
            speed_flag: kin.speed_flag,
            disp_flag: kin.disp_flag,
            d_gps_m: kin.d_gps_m,
            d_speed_m: kin.d_speed_m,
        }
    }

    #[inline]
    fn flagged(&self) -> bool {
        self.speed_flag || self.disp_flag
    }
}

/// Aggregates over the two trailing horizons
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    /// Flagged entries within the short (start) horizon
    pub flags_short: usize,
    /// Fused distance within the short horizon
    pub fused_short: f64,
    /// Fused distance within the long (stop) horizon
    pub fused_long: f64,
}

#[derive(Default)]
struct Sums {
    gps: f64,
    speed: f64,
}

impl Sums {
    /// GPS and speed integration are independent sensors; trust whichever
    /// saw more movement
    #[inline]
    fn fused(&self) -> f64 {
        self.gps.max(self.speed)
    }
}

/// Trailing evidence buffer with a short and a long horizon
#[derive(Debug, Clone)]
pub struct EvidenceWindow {
    entries: VecDeque<Evidence>,
    short_ms: i64,
    long_ms: i64,
    horizon_ms: i64,
}

impl EvidenceWindow {
    pub fn new(short_s: u64, long_s: u64) -> Self {
        let short_ms = (short_s as i64).saturating_mul(1000);
        let long_ms = (long_s as i64).saturating_mul(1000);
        Self { entries: VecDeque::new(), short_ms, long_ms, horizon_ms: short_ms.max(long_ms) }
    }

    /// Evict stale entries, append `evidence` and return the fresh aggregates
    pub fn push(&mut self, evidence: Evidence) -> WindowStats {
        let now = evidence.ts;
        while let Some(front) = self.entries.front() {
            if (now - front.ts).num_milliseconds() > self.horizon_ms {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        self.entries.push_back(evidence);
        self.stats()
    }

    /// Aggregates relative to the newest entry; all zero when empty
    pub fn stats(&self) -> WindowStats {
        let Some(newest) = self.entries.back() else {
            return WindowStats::default();
        };

        let mut flags_short = 0;
        let mut short = Sums::default();
        let mut long = Sums::default();

        for entry in self.entries.iter().rev() {
            let age_ms = (newest.ts - entry.ts).num_milliseconds();
            if age_ms <= self.short_ms {
                if entry.flagged() {
                    flags_short += 1;
                }
                short.gps += entry.d_gps_m;
                short.speed += entry.d_speed_m;
            }
            if age_ms <= self.long_ms {
                long.gps += entry.d_gps_m;
                long.speed += entry.d_speed_m;
            }
        }

        WindowStats { flags_short, fused_short: short.fused(), fused_long: long.fused() }
    }

    /// Drop all evidence (data outage)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
