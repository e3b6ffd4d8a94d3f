//! Inbound status snapshots and the device's lifecycle codes.

use crate::util::as_number;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names as reported by the device.
pub mod keys {
    /// Job identifier (the job's start timestamp in epoch seconds).
    pub const JOB_ID: &str = "printStartTime";
    pub const PROGRESS: &str = "printProgress";
    pub const JOB_TIME: &str = "printJobTime";
    pub const LEFT_TIME: &str = "printLeftTime";
    pub const SELF_TEST: &str = "withSelfTest";
    pub const NOZZLE_TEMP: &str = "nozzleTemp";
    pub const NOZZLE_TEMP_MAX: &str = "maxNozzleTemp";
    pub const BED_TEMP: &str = "bedTemp0";
    pub const BED_TEMP_MAX: &str = "maxBedTemp";
    /// 0 = material present, 1 = runout detected.
    pub const MATERIAL_STATUS: &str = "materialStatus";
    pub const MATERIAL_USED: &str = "usedMaterialLength";
    pub const MATERIAL_EXPECTED: &str = "estimatedMaterialLength";
    pub const DEVICE_STATE: &str = "deviceState";
    pub const JOB_STATE: &str = "state";
    pub const FILE_NAME: &str = "fileName";
    pub const ERROR: &str = "err";
}

/// Derived fields written back for the rendering layer.
pub mod derived {
    pub const PREPARATION_TIME: &str = "preparationTime";
    pub const CHECK_TIME: &str = "firstLayerCheckTime";
    pub const PAUSE_TIME: &str = "pauseTime";
    pub const COMPLETION_TIME: &str = "completionElapsedTime";
    pub const ACTUAL_START: &str = "actualStartTime";
    pub const INITIAL_LEFT: &str = "initialLeftTime";
    pub const INITIAL_LEFT_AT: &str = "initialLeftAt";
    pub const PREDICTED_FINISH: &str = "predictedFinishEpoch";
    pub const ESTIMATED_REMAINING: &str = "estimatedRemainingTime";
    pub const ESTIMATED_COMPLETION: &str = "estimatedCompletionTime";
    pub const MATERIAL_USED_LIVE: &str = "materialUsedLive";
    pub const SPOOL_REMAINING: &str = "spoolRemainingLength";

    /// Every derived field, in display order.
    pub const ALL: [&str; 12] = [
        PREPARATION_TIME,
        CHECK_TIME,
        PAUSE_TIME,
        COMPLETION_TIME,
        ACTUAL_START,
        INITIAL_LEFT,
        INITIAL_LEFT_AT,
        PREDICTED_FINISH,
        ESTIMATED_REMAINING,
        ESTIMATED_COMPLETION,
        MATERIAL_USED_LIVE,
        SPOOL_REMAINING,
    ];

    /// Fields cleared when a new job identifier is observed.
    pub const JOB_SCOPED: [&str; 9] = [
        PREPARATION_TIME,
        CHECK_TIME,
        PAUSE_TIME,
        COMPLETION_TIME,
        ACTUAL_START,
        INITIAL_LEFT,
        INITIAL_LEFT_AT,
        ESTIMATED_REMAINING,
        ESTIMATED_COMPLETION,
    ];
}

/// One arbitrary-shape status payload. Keys may be absent, null or fresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    fields: Map<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts JSON objects only.
    pub fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Builder-style insert, mostly for tests and replay tooling.
    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Explicit entry for `key`: `Some(Value::Null)` means the device cleared it.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Snapshot {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Job lifecycle state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Started,
    Done,
    /// First-layer inspection in progress.
    Check,
    Failed,
    Paused,
}

impl JobState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Started),
            2 => Some(Self::Done),
            3 => Some(Self::Check),
            4 => Some(Self::Failed),
            5 => Some(Self::Paused),
            _ => None,
        }
    }

    /// Numeric codes and the usual spellings are both accepted.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_value(v: &Value) -> Option<Self> {
        if let Value::String(s) = v {
            match s.trim().to_ascii_lowercase().as_str() {
                "idle" => return Some(Self::Idle),
                "started" | "printing" => return Some(Self::Started),
                "done" | "completed" => return Some(Self::Done),
                "check" => return Some(Self::Check),
                "failed" => return Some(Self::Failed),
                "paused" => return Some(Self::Paused),
                _ => {}
            }
        }
        let n = as_number(v)?;
        if n.fract() != 0.0 {
            return None;
        }
        Self::from_code(n as i64)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Started => 1,
            Self::Done => 2,
            Self::Check => 3,
            Self::Failed => 4,
            Self::Paused => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Done => "done",
            Self::Check => "check",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Done or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// A job is running on the device (possibly paused or under inspection).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Paused | Self::Check)
    }
}

/// Coarse device state; only idleness matters to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Idle,
    Busy,
}

impl DeviceState {
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Null => None,
            Value::String(s) if s.trim().eq_ignore_ascii_case("idle") => Some(Self::Idle),
            Value::String(s) if s.trim().parse::<f64>().is_err() => Some(Self::Busy),
            other => as_number(other).map(|n| if n == 0.0 { Self::Idle } else { Self::Busy }),
        }
    }
}
