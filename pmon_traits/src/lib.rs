pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use serde_json::Value;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Named persisted values under a per-device namespace, read back verbatim on reconnect.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, BoxError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), BoxError>;
    fn remove(&mut self, key: &str) -> Result<(), BoxError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<Value>, BoxError> {
        (**self).get(key)
    }
    fn set(&mut self, key: &str, value: Value) -> Result<(), BoxError> {
        (**self).set(key, value)
    }
    fn remove(&mut self, key: &str) -> Result<(), BoxError> {
        (**self).remove(key)
    }
}

/// One alert for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub payload: Value,
}

impl Notification {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

pub trait NotificationSink {
    fn notify(&mut self, n: Notification) -> Result<(), BoxError>;
}

/// A job the history store already knows as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedJob {
    pub job_id: i64,
    pub finished_at_ms: i64,
}

/// Historical record handed to the history store when a job is closed or reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: i64,
    pub file_name: Option<String>,
    pub actual_start_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub prep_secs: f64,
    pub check_secs: f64,
    pub pause_secs: f64,
    pub material_used_mm: Option<f64>,
}

pub trait HistoryStore {
    /// Most recent finished job, if any.
    fn latest_finished(&self) -> Result<Option<FinishedJob>, BoxError>;
    /// Job the store currently considers active.
    fn current_job_id(&self) -> Result<Option<i64>, BoxError>;
    fn persist_job(&mut self, record: &JobRecord) -> Result<(), BoxError>;
}

impl<T: HistoryStore + ?Sized> HistoryStore for Box<T> {
    fn latest_finished(&self) -> Result<Option<FinishedJob>, BoxError> {
        (**self).latest_finished()
    }
    fn current_job_id(&self) -> Result<Option<i64>, BoxError> {
        (**self).current_job_id()
    }
    fn persist_job(&mut self, record: &JobRecord) -> Result<(), BoxError> {
        (**self).persist_job(record)
    }
}
