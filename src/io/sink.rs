//! Trip sinks - idempotent persistence of final trip records
//!
//! A record is identified by (vin, start_ts, end_ts). Inserting a key that
//! is already stored is a no-op, so re-running a batch never duplicates
//! trips.

use crate::domain::trip::{TripKey, TripRecord};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to read trips {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid trip record in {path} at line {line}: {source}")]
    Decode {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode trip record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write trips {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Persistence target for final trips; must tolerate concurrent callers
pub trait TripSink: Send + Sync {
    /// Store `records`, skipping keys already present
    ///
    /// Returns the number of records actually inserted.
    fn insert_trips(&self, records: &[TripRecord]) -> Result<usize, SinkError>;
}

/// Read every record from a trip file; a missing file is empty
///
/// An unterminated last line that does not decode is the remains of an
/// interrupted append and is skipped. Any other bad line is an error.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<TripRecord>, SinkError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path).map_err(|source| SinkError::Read { path: display.clone(), source })?;

    let mut records = Vec::new();
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) if !line.ends_with('\n') => {
                let file = display.as_str();
                warn!(path = %file, line = %(idx + 1), error = %e, "trip_file_torn_tail_skipped");
            }
            Err(source) => {
                return Err(SinkError::Decode { path: display, line: idx + 1, source });
            }
        }
    }
    Ok(records)
}

/// Cut an unterminated last line off the trip file so the next append
/// starts on a fresh line. Returns the number of bytes removed.
fn truncate_torn_tail(path: &Path) -> std::io::Result<u64> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    let removed = (bytes.len() - keep) as u64;
    if removed > 0 {
        OpenOptions::new().write(true).open(path)?.set_len(keep as u64)?;
    }
    Ok(removed)
}

/// Append-only JSONL trip file with an in-memory key index
pub struct JsonlTripSink {
    path: PathBuf,
    keys: Mutex<FxHashSet<TripKey>>,
}

impl JsonlTripSink {
    /// Open `path`, indexing any trips it already holds
    ///
    /// A partial record left by an interrupted append is removed first.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let removed = truncate_torn_tail(&path)
            .map_err(|source| SinkError::Write { path: path.display().to_string(), source })?;
        if removed > 0 {
            warn!(path = %path.display(), bytes = %removed, "trip_file_torn_tail_truncated");
        }
        let keys: FxHashSet<TripKey> = load_records(&path)?.iter().map(TripRecord::key).collect();
        info!(path = %path.display(), existing = %keys.len(), "trip_sink_opened");
        Ok(Self { path, keys: Mutex::new(keys) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    fn append(&self, buf: &str) -> Result<(), SinkError> {
        let write_err = |source| SinkError::Write { path: self.path.display().to_string(), source };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let mut file =
            OpenOptions::new().create(true).append(true).open(&self.path).map_err(write_err)?;
        let start_len = file.metadata().map_err(write_err)?.len();

        // A failed write must not leave half a line behind for the next append
        if let Err(source) = file.write_all(buf.as_bytes()).and_then(|()| file.flush()) {
            if let Err(e) = file.set_len(start_len) {
                warn!(path = %self.path.display(), error = %e, "trip_file_rollback_failed");
            }
            return Err(write_err(source));
        }
        Ok(())
    }
}

impl TripSink for JsonlTripSink {
    fn insert_trips(&self, records: &[TripRecord]) -> Result<usize, SinkError> {
        // Held across the write so concurrent vehicles cannot interleave lines
        let mut keys = self.keys.lock();

        let mut fresh: Vec<TripKey> = Vec::new();
        let mut buf = String::new();
        for record in records {
            let key = record.key();
            if keys.contains(&key) || fresh.contains(&key) {
                debug!(vin = %record.vin, start_ts = %record.start_ts, "trip_already_stored");
                continue;
            }
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
            fresh.push(key);
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        self.append(&buf)?;
        let inserted = fresh.len();
        keys.extend(fresh);
        debug!(path = %self.path.display(), inserted = %inserted, "trips_written");
        Ok(inserted)
    }
}

/// In-memory sink used for dry runs and tests
#[derive(Default)]
pub struct MemoryTripSink {
    records: Mutex<BTreeMap<TripKey, TripRecord>>,
}

impl MemoryTripSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records ordered by key
    pub fn records(&self) -> Vec<TripRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl TripSink for MemoryTripSink {
    fn insert_trips(&self, records: &[TripRecord]) -> Result<usize, SinkError> {
        let mut stored = self.records.lock();
        let mut inserted = 0;
        for record in records {
            if let std::collections::btree_map::Entry::Vacant(slot) = stored.entry(record.key()) {
                slot.insert(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::VehicleId;
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    fn record(vin: &str, start_min: i64) -> TripRecord {
        let t0 = Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap();
        TripRecord {
            vin: VehicleId::new(vin),
            start_ts: t0 + Duration::minutes(start_min),
            end_ts: t0 + Duration::minutes(start_min + 20),
            start_lat: Some(52.0),
            start_lon: Some(4.0),
            end_lat: Some(52.1),
            end_lon: Some(4.1),
            duration_s: 1200.0,
            distance_gps_m: 13_000.0,
            distance_speed_m: 12_800.0,
            distance_fused_m: 13_000.0,
            avg_speed_kph: 39.0,
            max_speed_kph: 52.0,
            start_soc: Some(80.0),
            end_soc: None,
            sample_count: 34,
        }
    }

    #[test]
    fn test_jsonl_sink_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("trips.jsonl");

        let sink = JsonlTripSink::open(&path).unwrap();
        let batch = vec![record("V1", 0), record("V1", 60)];
        assert_eq!(sink.insert_trips(&batch).unwrap(), 2);
        assert_eq!(sink.insert_trips(&batch).unwrap(), 0);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_jsonl_sink_reopen_keeps_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trips.jsonl");

        JsonlTripSink::open(&path).unwrap().insert_trips(&[record("V1", 0)]).unwrap();

        let reopened = JsonlTripSink::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.insert_trips(&[record("V1", 0), record("V2", 0)]).unwrap(), 1);

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record("V1", 0));
    }

    #[test]
    fn test_duplicate_within_batch() {
        let sink = MemoryTripSink::new();
        assert_eq!(sink.insert_trips(&[record("V1", 0), record("V1", 0)]).unwrap(), 1);

        let dir = tempdir().unwrap();
        let jsonl = JsonlTripSink::open(dir.path().join("t.jsonl")).unwrap();
        assert_eq!(jsonl.insert_trips(&[record("V1", 0), record("V1", 0)]).unwrap(), 1);
    }

    #[test]
    fn test_load_records_missing_file() {
        let dir = tempdir().unwrap();
        assert!(load_records(dir.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn test_load_records_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trips.jsonl");
        fs::write(&path, "{\"vin\":\"V1\"}\n").unwrap();
        let err = load_records(&path).unwrap_err();
        assert!(matches!(err, SinkError::Decode { line: 1, .. }));
    }

    #[test]
    fn test_reopen_after_interrupted_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trips.jsonl");
        let first = serde_json::to_string(&record("V1", 0)).unwrap();
        fs::write(&path, format!("{first}\n{{\"vin\":\"V2\",\"start_ts\":\"2025-11")).unwrap();

        let sink = JsonlTripSink::open(&path).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{first}\n"));

        assert_eq!(sink.insert_trips(&[record("V1", 0), record("V2", 0)]).unwrap(), 1);
        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].vin.as_str(), "V2");
    }

    #[test]
    fn test_load_records_skips_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trips.jsonl");
        let first = serde_json::to_string(&record("V1", 0)).unwrap();
        fs::write(&path, format!("{first}\n{{\"vin\":\"V2\"")).unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vin.as_str(), "V1");
    }

    #[test]
    fn test_load_records_rejects_garbage_mid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trips.jsonl");
        let good = serde_json::to_string(&record("V1", 0)).unwrap();
        fs::write(&path, format!("not json\n{good}\n")).unwrap();
        let err = load_records(&path).unwrap_err();
        assert!(matches!(err, SinkError::Decode { line: 1, .. }));
    }

    #[test]
    fn test_memory_sink_orders_by_key() {
        let sink = MemoryTripSink::new();
        sink.insert_trips(&[record("V2", 0), record("V1", 30), record("V1", 0)]).unwrap();
        let vins: Vec<_> = sink.records().iter().map(|r| (r.vin.to_string(), r.start_ts)).collect();
        assert_eq!(vins[0].0, "V1");
        assert!(vins[0].1 < vins[1].1);
        assert_eq!(vins[2].0, "V2");
    }
}
