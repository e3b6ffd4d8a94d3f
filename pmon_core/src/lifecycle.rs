//! Job identity tracking: new job, changed job, provisional job awaiting its identifier.

use crate::util::as_number;
use serde_json::Value;

/// What a snapshot did to the tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Unchanged,
    /// First valid identifier while no job was tracked.
    Opened { job_id: i64 },
    /// A different valid identifier replaced the tracked one; job-scoped state resets.
    Changed { from: i64, to: i64 },
    /// Job time started advancing before any identifier arrived.
    ProvisionalOpened,
    /// The identifier of a provisional job arrived; nothing is reset.
    Reconciled { job_id: i64 },
}

/// Finite, positive, integral identifiers only.
#[allow(clippy::cast_possible_truncation)]
pub fn valid_job_id(v: &Value) -> Option<i64> {
    let n = as_number(v)?;
    if n > 0.0 && n.fract() == 0.0 && n < 9.0e15 {
        Some(n as i64)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTracker {
    tracked: Option<i64>,
    provisional: bool,
    file_name: Option<String>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted values.
    pub fn restored(tracked: Option<i64>, provisional: bool, file_name: Option<String>) -> Self {
        Self {
            provisional: provisional && tracked.is_none(),
            tracked,
            file_name,
        }
    }

    pub fn tracked(&self) -> Option<i64> {
        self.tracked
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    /// A job is open, identified or not.
    pub fn has_job(&self) -> bool {
        self.tracked.is_some() || self.provisional
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Inspect the identifier and job time of one snapshot.
    pub fn observe(&mut self, job_id: Option<i64>, job_time_secs: Option<f64>) -> LifecycleEvent {
        match (job_id, self.tracked) {
            (Some(id), Some(t)) if id == t => LifecycleEvent::Unchanged,
            (Some(id), Some(t)) => {
                self.tracked = Some(id);
                tracing::info!(from = t, to = id, "job changed");
                LifecycleEvent::Changed { from: t, to: id }
            }
            (Some(id), None) if self.provisional => {
                self.provisional = false;
                self.tracked = Some(id);
                tracing::info!(job_id = id, "provisional job reconciled");
                LifecycleEvent::Reconciled { job_id: id }
            }
            (Some(id), None) => {
                self.tracked = Some(id);
                tracing::info!(job_id = id, "job opened");
                LifecycleEvent::Opened { job_id: id }
            }
            (None, None) if !self.provisional && job_time_secs.is_some_and(|t| t >= 1.0) => {
                self.provisional = true;
                tracing::info!("job time advancing without identifier, opening provisional job");
                LifecycleEvent::ProvisionalOpened
            }
            (None, _) => LifecycleEvent::Unchanged,
        }
    }

    /// Drop metadata of a job that has been closed.
    pub fn clear_metadata(&mut self) {
        self.file_name = None;
    }

    /// Metadata arriving after the job opened updates it in place.
    pub fn update_metadata(&mut self, file_name: &str) -> bool {
        if !self.has_job() || self.file_name.as_deref() == Some(file_name) {
            return false;
        }
        self.file_name = Some(file_name.to_string());
        true
    }
}
