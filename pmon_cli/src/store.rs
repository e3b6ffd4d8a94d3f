//! File-backed collaborators for the aggregator: a JSON key-value file and a
//! JSON history file. Both are rewritten atomically on every change.

use pmon_core::atomic::write_json_atomic;
use pmon_traits::{BoxError, FinishedJob, HistoryStore, JobRecord, KeyValueStore};
use serde_json::{json, Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn read_json(path: &Path) -> Result<Option<Value>, BoxError> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json(path: &Path, v: &Value) -> Result<(), BoxError> {
    write_json_atomic(path, v)?;
    Ok(())
}

// ── FileStore ────────────────────────────────────────────────────────────────

/// Key-value store persisted as one JSON object.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BoxError> {
        let path = path.into();
        let entries = match read_json(&path)? {
            None => Map::new(),
            Some(Value::Object(m)) => m,
            Some(_) => {
                return Err(format!("state file {} is not a JSON object", path.display()).into());
            }
        };
        Ok(Self { path, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> Result<(), BoxError> {
        write_json(&self.path, &Value::Object(self.entries.clone()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, BoxError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), BoxError> {
        if self.entries.get(key) == Some(&value) {
            return Ok(());
        }
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), BoxError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

// ── FileHistory ──────────────────────────────────────────────────────────────

fn record_to_json(r: &JobRecord) -> Value {
    json!({
        "jobId": r.job_id,
        "fileName": r.file_name,
        "actualStartMs": r.actual_start_ms,
        "finishedAtMs": r.finished_at_ms,
        "prepSecs": r.prep_secs,
        "checkSecs": r.check_secs,
        "pauseSecs": r.pause_secs,
        "materialUsedMm": r.material_used_mm,
    })
}

fn record_from_json(v: &Value) -> Option<JobRecord> {
    let secs = |k: &str| v.get(k).and_then(Value::as_f64).unwrap_or(0.0);
    Some(JobRecord {
        job_id: v.get("jobId")?.as_i64()?,
        file_name: v.get("fileName").and_then(Value::as_str).map(str::to_string),
        actual_start_ms: v.get("actualStartMs").and_then(Value::as_i64),
        finished_at_ms: v.get("finishedAtMs").and_then(Value::as_i64),
        prep_secs: secs("prepSecs"),
        check_secs: secs("checkSecs"),
        pause_secs: secs("pauseSecs"),
        material_used_mm: v.get("materialUsedMm").and_then(Value::as_f64),
    })
}

/// History kept as a JSON array of job records, one per job id.
#[derive(Debug)]
pub struct FileHistory {
    path: PathBuf,
    records: Vec<JobRecord>,
}

impl FileHistory {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BoxError> {
        let path = path.into();
        let records = match read_json(&path)? {
            None => Vec::new(),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    match record_from_json(item) {
                        Some(r) => out.push(r),
                        None => tracing::warn!(path = %path.display(), "skipping malformed history record"),
                    }
                }
                out
            }
            Some(_) => {
                return Err(format!("history file {} is not a JSON array", path.display()).into());
            }
        };
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }
}

impl HistoryStore for FileHistory {
    fn latest_finished(&self) -> Result<Option<FinishedJob>, BoxError> {
        Ok(self
            .records
            .iter()
            .filter_map(|r| {
                r.finished_at_ms.map(|finished_at_ms| FinishedJob {
                    job_id: r.job_id,
                    finished_at_ms,
                })
            })
            .max_by_key(|f| f.finished_at_ms))
    }

    // No external job queue behind a file.
    fn current_job_id(&self) -> Result<Option<i64>, BoxError> {
        Ok(None)
    }

    fn persist_job(&mut self, record: &JobRecord) -> Result<(), BoxError> {
        match self.records.iter_mut().find(|r| r.job_id == record.job_id) {
            Some(existing) if existing == record => return Ok(()),
            Some(existing) => *existing = record.clone(),
            None => self.records.push(record.clone()),
        }
        let arr = Value::Array(self.records.iter().map(record_to_json).collect());
        write_json(&self.path, &arr)
    }
}
