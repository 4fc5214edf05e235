//! Shared types for the trip segmenter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for vehicle identifiers (VIN) to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(vin: impl Into<String>) -> Self {
        Self(vin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A WGS84 coordinate pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a point only when both halves of the pair are present
    #[inline]
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        Some(Self { lat: lat?, lon: lon? })
    }
}

/// One telemetry reading for a vehicle at an instant
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub ts: DateTime<Utc>,
    /// Latitude and longitude are present together or not at all
    pub position: Option<GeoPoint>,
    /// Measured speed in km/h
    pub speed_kph: Option<f64>,
    pub soc: Option<f64>,
    pub soc_precise: Option<f64>,
}

impl Sample {
    #[inline]
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self { ts, position: None, speed_kph: None, soc: None, soc_precise: None }
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.position = Some(GeoPoint::new(lat, lon));
        self
    }

    pub fn with_speed(mut self, speed_kph: f64) -> Self {
        self.speed_kph = Some(speed_kph);
        self
    }

    pub fn with_soc(mut self, soc: f64) -> Self {
        self.soc = Some(soc);
        self
    }

    pub fn with_soc_precise(mut self, soc_precise: f64) -> Self {
        self.soc_precise = Some(soc_precise);
        self
    }

    /// Measured speed with a missing reading treated as standing still
    #[inline]
    pub fn speed_or_zero(&self) -> f64 {
        self.speed_kph.unwrap_or(0.0)
    }
}

/// Signed seconds elapsed from `from` to `to`, millisecond resolution
#[inline]
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
