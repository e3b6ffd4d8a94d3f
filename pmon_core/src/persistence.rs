//! Persistence bridge: aggregator and ledger state under a per-device key namespace.
//!
//! Every value is stored as JSON under `aggr_{device}_{name}`; a `None` value
//! removes the key. Read and write failures are logged and never fatal, the
//! in-memory state stays authoritative for the running session.

use crate::estimator::{EstimateKey, Prediction};
use crate::ledger::{LiveUsage, Spool};
use crate::snapshot::JobState;
use crate::timers::PhaseTimer;
use pmon_traits::KeyValueStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// Persisted key names (without the device prefix).
pub mod names {
    pub const PREP_TIMER: &str = "prepTimer";
    pub const CHECK_TIMER: &str = "checkTimer";
    pub const PAUSE_TIMER: &str = "pauseTimer";
    pub const COMPLETION_TIMER: &str = "completionTimer";
    pub const PAUSED_SINCE: &str = "pausedSince";
    pub const CHECK_SEEN: &str = "checkSeen";
    pub const ACTUAL_START: &str = "actualStartEpoch";
    pub const INITIAL_LEFT_SEC: &str = "initialLeftSec";
    pub const INITIAL_LEFT_EPOCH: &str = "initialLeftEpoch";
    pub const FINISHED_AT: &str = "finishedAtEpoch";
    pub const PRINT_ID: &str = "printId";
    pub const PRINT_ID_PROVISIONAL: &str = "printIdProvisional";
    pub const FILE_NAME: &str = "fileName";
    pub const LAST_JOB_STATE: &str = "lastJobState";
    pub const ESTIMATE_KEY: &str = "estimateKey";
    pub const PREDICTION: &str = "prediction";
    pub const SPOOLS: &str = "spools";
    pub const CURRENT_SPOOL: &str = "currentSpoolId";
    pub const LIVE_USAGE: &str = "liveUsage";
    pub const MILESTONES_FIRED: &str = "milestonesFired";
}

/// Everything that must survive a reconnect or restart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub prep: PhaseTimer,
    pub check: PhaseTimer,
    pub pause: PhaseTimer,
    pub completion: PhaseTimer,
    pub paused_since_ms: Option<i64>,
    pub check_seen: bool,
    pub actual_start_ms: Option<i64>,
    pub initial_left_secs: Option<f64>,
    pub initial_anchor_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
    pub tracked_job: Option<i64>,
    pub provisional: bool,
    pub file_name: Option<String>,
    pub last_state: Option<JobState>,
    pub estimate_key: Option<EstimateKey>,
    pub prediction: Option<Prediction>,
    pub spools: Vec<Spool>,
    pub current_spool: Option<String>,
    pub live: Option<LiveUsage>,
    pub milestones_fired: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PersistenceBridge {
    prefix: String,
    /// Last value written per key; unchanged values are not rewritten.
    written: HashMap<String, Value>,
}

impl PersistenceBridge {
    pub fn new(device: &str) -> Self {
        Self {
            prefix: format!("aggr_{device}_"),
            written: HashMap::new(),
        }
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// Write one value; `Value::Null` removes the key.
    pub fn write(&mut self, store: &mut dyn KeyValueStore, name: &str, value: Value) {
        let key = self.key(name);
        if self.written.get(&key) == Some(&value) {
            return;
        }
        let res = if value.is_null() {
            store.remove(&key)
        } else {
            store.set(&key, value.clone())
        };
        match res {
            Ok(()) => {
                self.written.insert(key, value);
            }
            Err(e) => tracing::warn!(error = %e, key = %key, "persist write failed"),
        }
    }

    fn put<T: Serialize>(&mut self, store: &mut dyn KeyValueStore, name: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.write(store, name, v),
            Err(e) => tracing::warn!(error = %e, name, "persist encode failed"),
        }
    }

    pub fn read(&mut self, store: &dyn KeyValueStore, name: &str) -> Option<Value> {
        let key = self.key(name);
        match store.get(&key) {
            Ok(Some(v)) => {
                self.written.insert(key, v.clone());
                Some(v)
            }
            Ok(None) => {
                self.written.insert(key, Value::Null);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "persist read failed");
                None
            }
        }
    }

    fn get<T: DeserializeOwned>(&mut self, store: &dyn KeyValueStore, name: &str) -> Option<T> {
        let v = self.read(store, name)?;
        match serde_json::from_value(v) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(error = %e, name, "persisted value unreadable, ignoring");
                None
            }
        }
    }

    /// Forget the write cache so the next `save` rewrites every key.
    pub fn invalidate(&mut self) {
        self.written.clear();
    }

    pub fn save(&mut self, store: &mut dyn KeyValueStore, st: &PersistedState) {
        use names::*;
        self.put(store, PREP_TIMER, &st.prep);
        self.put(store, CHECK_TIMER, &st.check);
        self.put(store, PAUSE_TIMER, &st.pause);
        self.put(store, COMPLETION_TIMER, &st.completion);
        self.put(store, PAUSED_SINCE, &st.paused_since_ms);
        self.put(store, CHECK_SEEN, &st.check_seen);
        self.put(store, ACTUAL_START, &st.actual_start_ms);
        self.put(store, INITIAL_LEFT_SEC, &st.initial_left_secs);
        self.put(store, INITIAL_LEFT_EPOCH, &st.initial_anchor_ms);
        self.put(store, FINISHED_AT, &st.finished_at_ms);
        self.put(store, PRINT_ID, &st.tracked_job);
        self.put(store, PRINT_ID_PROVISIONAL, &st.provisional);
        self.put(store, FILE_NAME, &st.file_name);
        self.put(store, LAST_JOB_STATE, &st.last_state);
        self.put(store, ESTIMATE_KEY, &st.estimate_key);
        self.put(store, PREDICTION, &st.prediction);
        self.put(store, SPOOLS, &st.spools);
        self.put(store, CURRENT_SPOOL, &st.current_spool);
        self.put(store, LIVE_USAGE, &st.live);
        self.put(store, MILESTONES_FIRED, &st.milestones_fired);
    }

    /// Missing or unreadable keys load as their defaults.
    pub fn load(&mut self, store: &dyn KeyValueStore) -> PersistedState {
        use names::*;
        PersistedState {
            prep: self.get(store, PREP_TIMER).unwrap_or_default(),
            check: self.get(store, CHECK_TIMER).unwrap_or_default(),
            pause: self.get(store, PAUSE_TIMER).unwrap_or_default(),
            completion: self.get(store, COMPLETION_TIMER).unwrap_or_default(),
            paused_since_ms: self.get(store, PAUSED_SINCE),
            check_seen: self.get(store, CHECK_SEEN).unwrap_or(false),
            actual_start_ms: self.get(store, ACTUAL_START),
            initial_left_secs: self.get(store, INITIAL_LEFT_SEC),
            initial_anchor_ms: self.get(store, INITIAL_LEFT_EPOCH),
            finished_at_ms: self.get(store, FINISHED_AT),
            tracked_job: self.get(store, PRINT_ID),
            provisional: self.get(store, PRINT_ID_PROVISIONAL).unwrap_or(false),
            file_name: self.get(store, FILE_NAME),
            last_state: self.get(store, LAST_JOB_STATE),
            estimate_key: self.get(store, ESTIMATE_KEY),
            prediction: self.get(store, PREDICTION),
            spools: self.get(store, SPOOLS).unwrap_or_default(),
            current_spool: self.get(store, CURRENT_SPOOL),
            live: self.get(store, LIVE_USAGE),
            milestones_fired: self.get(store, MILESTONES_FIRED).unwrap_or_default(),
        }
    }
}
