//! In-memory collaborators for tests, replay and embedding.
//!
//! Each mock is a cheap handle over shared state: clone it, hand one clone to
//! the aggregator and keep the other to inspect what happened.

use pmon_traits::{
    BoxError, FinishedJob, HistoryStore, JobRecord, KeyValueStore, Notification, NotificationSink,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn poisoned() -> BoxError {
    Box::new(std::io::Error::other("mock state poisoned"))
}

/// Key-value store over a shared `BTreeMap`, with switchable failure injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Arc<Mutex<BTreeMap<String, Value>>>,
    fail: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent get/set/remove fail.
    pub fn fail_all(&self, on: bool) {
        self.fail.store(on, Ordering::Relaxed);
    }

    /// Successful set/remove calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Copy of the whole map.
    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.map.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn load_from(&self, entries: BTreeMap<String, Value>) {
        if let Ok(mut m) = self.map.lock() {
            *m = entries;
        }
    }

    fn check(&self) -> Result<(), BoxError> {
        if self.fail.load(Ordering::Relaxed) {
            Err(Box::new(std::io::Error::other("injected store failure")))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, BoxError> {
        self.check()?;
        let m = self.map.lock().map_err(|_| poisoned())?;
        Ok(m.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), BoxError> {
        self.check()?;
        self.map
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BoxError> {
        self.check()?;
        self.map.lock().map_err(|_| poisoned())?.remove(key);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Sink that records every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.all().into_iter().map(|n| n.kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.all().iter().filter(|n| n.kind == kind).count()
    }

    /// Drain recorded notifications.
    pub fn take(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&mut self, n: Notification) -> Result<(), BoxError> {
        self.seen.lock().map_err(|_| poisoned())?.push(n);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HistoryInner {
    latest: Option<FinishedJob>,
    current: Option<i64>,
    records: Vec<JobRecord>,
}

/// History store keeping records in memory.
///
/// Persisting a record with a finish time also makes it the latest finished job.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    inner: Arc<Mutex<HistoryInner>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_finished(&self, job: Option<FinishedJob>) {
        if let Ok(mut h) = self.inner.lock() {
            h.latest = job;
        }
    }

    pub fn set_current_job(&self, id: Option<i64>) {
        if let Ok(mut h) = self.inner.lock() {
            h.current = id;
        }
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.inner
            .lock()
            .map(|h| h.records.clone())
            .unwrap_or_default()
    }
}

impl HistoryStore for MemoryHistory {
    fn latest_finished(&self) -> Result<Option<FinishedJob>, BoxError> {
        Ok(self.inner.lock().map_err(|_| poisoned())?.latest)
    }

    fn current_job_id(&self) -> Result<Option<i64>, BoxError> {
        Ok(self.inner.lock().map_err(|_| poisoned())?.current)
    }

    fn persist_job(&mut self, record: &JobRecord) -> Result<(), BoxError> {
        let mut h = self.inner.lock().map_err(|_| poisoned())?;
        if let Some(finished_at_ms) = record.finished_at_ms {
            h.latest = Some(FinishedJob {
                job_id: record.job_id,
                finished_at_ms,
            });
        }
        match h.records.iter_mut().find(|r| r.job_id == record.job_id) {
            Some(existing) => *existing = record.clone(),
            None => h.records.push(record.clone()),
        }
        Ok(())
    }
}
