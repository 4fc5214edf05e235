//! Telemetry sources
//!
//! Samples are read from JSONL, one reading per line:
//!
//! ```json
//! {"vin":"LSJA24U66NG000001","ts":"2025-11-03T08:00:00Z","lat":52.37,"lon":4.89,"speed":0.0,"soc":81}
//! ```
//!
//! Numeric fields are parsed leniently: a number, a numeric string, or
//! anything else which becomes missing. Rows without a vehicle id or a
//! readable timestamp are dropped, as are rows without a fix (missing or
//! zero coordinates mark GPS loss).

use crate::domain::types::{GeoPoint, Sample, VehicleId};
use chrono::{DateTime, NaiveDateTime, Utc};
use rustc_hash::FxHashMap;
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open telemetry {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read telemetry {path} at line {line}: {source}")]
    Read {
        path: String,
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Time-ordered samples per vehicle
///
/// Implementations must return samples sorted ascending by timestamp.
pub trait TelemetrySource: Send + Sync {
    /// Vehicles with at least one sample at or after `since`, sorted
    fn vehicles(&self, since: Option<DateTime<Utc>>) -> Result<Vec<VehicleId>, SourceError>;

    /// Samples for `vin` at or after `since` (all samples when `None`)
    fn load_samples(
        &self,
        vin: &VehicleId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, SourceError>;
}

/// Timestamp as found on the wire
#[derive(Debug, Clone, Default, PartialEq)]
enum TimestampValue {
    #[default]
    None,
    Text(String),
    EpochMs(i64),
}

impl TimestampValue {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::None => None,
            TimestampValue::EpochMs(ms) => DateTime::from_timestamp_millis(*ms),
            TimestampValue::Text(text) => parse_timestamp(text),
        }
    }
}

/// Parse RFC 3339, SQL-style `YYYY-MM-DD HH:MM:SS[.f]±HH[:MM]`, or a bare
/// SQL timestamp taken as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok().map(|ts| ts.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::Text(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::Text(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(i64::try_from(value).map(TimestampValue::EpochMs).unwrap_or_default())
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            if value.is_finite() {
                Ok(TimestampValue::EpochMs(value as i64))
            } else {
                Ok(TimestampValue::None)
            }
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Numbers, numeric strings, or missing; never an error
fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientVisitor;

    impl<'de> Visitor<'de> for LenientVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Option<f64>, E> {
            Ok(value.is_finite().then_some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Option<f64>, E> {
            Ok(Some(value as f64))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Option<f64>, E> {
            Ok(Some(value as f64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<f64>, E> {
            Ok(value.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        }

        fn visit_bool<E: de::Error>(self, _: bool) -> Result<Option<f64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<f64>, E> {
            Ok(None)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Option<f64>, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Option<f64>, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(LenientVisitor)
}

/// One line of the telemetry file
#[derive(Debug, Deserialize)]
struct TelemetryRow {
    #[serde(default)]
    vin: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    ts: TimestampValue,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    lon: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    soc: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    soc_precise: Option<f64>,
}

/// Why a row did not become a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    NoVehicle,
    NoTimestamp,
    NoFix,
}

impl TelemetryRow {
    fn into_sample(self) -> Result<(VehicleId, Sample), Rejection> {
        let vin = self.vin.filter(|v| !v.trim().is_empty()).ok_or(Rejection::NoVehicle)?;
        let ts = self.ts.resolve().ok_or(Rejection::NoTimestamp)?;
        let position = GeoPoint::from_parts(self.lat, self.lon)
            .filter(|p| p.lat != 0.0 && p.lon != 0.0)
            .ok_or(Rejection::NoFix)?;

        let sample = Sample {
            ts,
            position: Some(position),
            speed_kph: self.speed,
            soc: self.soc,
            soc_precise: self.soc_precise,
        };
        Ok((VehicleId::new(vin.trim()), sample))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub lines: usize,
    pub samples: usize,
    pub malformed: usize,
    pub no_vehicle: usize,
    pub no_timestamp: usize,
    pub no_fix: usize,
}

/// Sort each vehicle's samples by timestamp, keeping arrival order for ties
pub fn sort_samples(samples: &mut [Sample]) {
    samples.sort_by_key(|s| s.ts);
}

fn since_filter(samples: &[Sample], since: Option<DateTime<Utc>>) -> Vec<Sample> {
    match since {
        Some(since) => samples.iter().filter(|s| s.ts >= since).cloned().collect(),
        None => samples.to_vec(),
    }
}

fn active_vehicles(
    by_vehicle: &FxHashMap<VehicleId, Vec<Sample>>,
    since: Option<DateTime<Utc>>,
) -> Vec<VehicleId> {
    let mut vins: Vec<VehicleId> = by_vehicle
        .iter()
        .filter(|(_, samples)| match (since, samples.last()) {
            (Some(since), Some(last)) => last.ts >= since,
            (None, Some(_)) => true,
            (_, None) => false,
        })
        .map(|(vin, _)| vin.clone())
        .collect();
    vins.sort();
    vins
}

/// Telemetry loaded eagerly from a JSONL file
pub struct JsonlTelemetrySource {
    path: String,
    by_vehicle: FxHashMap<VehicleId, Vec<Sample>>,
    stats: LoadStats,
}

impl JsonlTelemetrySource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path_str = path.as_ref().display().to_string();
        let file = File::open(path.as_ref())
            .map_err(|source| SourceError::Open { path: path_str.clone(), source })?;

        let mut by_vehicle: FxHashMap<VehicleId, Vec<Sample>> = FxHashMap::default();
        let mut stats = LoadStats::default();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| SourceError::Read {
                path: path_str.clone(),
                line: idx + 1,
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            stats.lines += 1;

            let row: TelemetryRow = match serde_json::from_str(&line) {
                Ok(row) => row,
                Err(e) => {
                    stats.malformed += 1;
                    warn!(path = %path_str, line = %(idx + 1), error = %e, "telemetry_line_malformed");
                    continue;
                }
            };

            match row.into_sample() {
                Ok((vin, sample)) => {
                    stats.samples += 1;
                    by_vehicle.entry(vin).or_default().push(sample);
                }
                Err(Rejection::NoVehicle) => stats.no_vehicle += 1,
                Err(Rejection::NoTimestamp) => stats.no_timestamp += 1,
                Err(Rejection::NoFix) => stats.no_fix += 1,
            }
        }

        for samples in by_vehicle.values_mut() {
            sort_samples(samples);
        }

        info!(
            path = %path_str,
            vehicles = %by_vehicle.len(),
            lines = %stats.lines,
            samples = %stats.samples,
            malformed = %stats.malformed,
            no_fix = %stats.no_fix,
            no_timestamp = %stats.no_timestamp,
            "telemetry_loaded"
        );

        Ok(Self { path: path_str, by_vehicle, stats })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }
}

impl TelemetrySource for JsonlTelemetrySource {
    fn vehicles(&self, since: Option<DateTime<Utc>>) -> Result<Vec<VehicleId>, SourceError> {
        Ok(active_vehicles(&self.by_vehicle, since))
    }

    fn load_samples(
        &self,
        vin: &VehicleId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, SourceError> {
        Ok(self.by_vehicle.get(vin).map(|s| since_filter(s, since)).unwrap_or_default())
    }
}

/// In-memory source for tests and embedding
#[derive(Default)]
pub struct MemoryTelemetrySource {
    by_vehicle: FxHashMap<VehicleId, Vec<Sample>>,
}

impl MemoryTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add samples for `vin`; they are kept sorted by timestamp
    pub fn insert(&mut self, vin: VehicleId, samples: impl IntoIterator<Item = Sample>) {
        let entry = self.by_vehicle.entry(vin).or_default();
        entry.extend(samples);
        sort_samples(entry);
    }

    pub fn with_vehicle(mut self, vin: impl Into<String>, samples: Vec<Sample>) -> Self {
        self.insert(VehicleId::new(vin), samples);
        self
    }
}

impl TelemetrySource for MemoryTelemetrySource {
    fn vehicles(&self, since: Option<DateTime<Utc>>) -> Result<Vec<VehicleId>, SourceError> {
        Ok(active_vehicles(&self.by_vehicle, since))
    }

    fn load_samples(
        &self,
        vin: &VehicleId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Sample>, SourceError> {
        Ok(self.by_vehicle.get(vin).map(|s| since_filter(s, since)).unwrap_or_default())
    }
}
