//! Consumable material ledger.
//!
//! Per job: `reserve` anchors the spool's length at job start without touching
//! the remaining stock, live usage accumulates between reserve and finalize,
//! and `finalize` commits the actual usage to exactly the spool that was
//! reserved for that job. A finalize for a job the ledger is not tracking is
//! skipped rather than charged to the wrong spool.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub job_id: i64,
    pub used_length_mm: f64,
    pub at_ms: i64,
}

/// First and last job identifiers consumed while the spool was mounted.
/// An open range (`end_print_id == None`) belongs to the mounted spool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintIdRange {
    #[serde(rename = "startPrintID")]
    pub start_print_id: i64,
    #[serde(rename = "endPrintID")]
    pub end_print_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spool {
    pub id: String,
    pub name: String,
    pub material: String,
    #[serde(default)]
    pub color: String,
    pub total_length_mm: f64,
    pub remaining_length_mm: f64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, rename = "currentPrintID")]
    pub current_print_id: Option<i64>,
    #[serde(default)]
    pub current_job_start_length: Option<f64>,
    #[serde(default)]
    pub current_job_expected_length: Option<f64>,
    #[serde(default)]
    pub print_count: u32,
    #[serde(default)]
    pub used_length_log: Vec<UsageEntry>,
    #[serde(default)]
    pub print_id_ranges: Vec<PrintIdRange>,
}

impl Spool {
    fn clear_job(&mut self) {
        self.current_print_id = None;
        self.current_job_start_length = None;
        self.current_job_expected_length = None;
    }

    fn last_job_id(&self) -> Option<i64> {
        self.used_length_log.last().map(|e| e.job_id)
    }
}

/// User input for a new spool.
#[derive(Debug, Clone, Default)]
pub struct NewSpool {
    pub name: String,
    pub material: String,
    pub color: String,
    pub total_length_mm: f64,
    /// Defaults to the total length.
    pub remaining_length_mm: Option<f64>,
}

/// Usage of the job between reserve and finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveUsage {
    pub job_id: i64,
    pub spool_id: String,
    pub used_mm: f64,
    /// Last direct usage reading; deltas are taken against it.
    pub last_telemetry_mm: f64,
    /// Direct usage telemetry was seen during this job.
    pub telemetry_seen: bool,
}

/// One live-usage observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSample {
    /// Cumulative usage reported by the device for the running job.
    pub telemetry_mm: Option<f64>,
    pub progress_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Applied {
        spool_id: String,
        used_mm: f64,
        remaining_mm: f64,
    },
    /// No spool is tracking this job.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobIdSource {
    JobStore,
    StartTime,
    LastKnown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedJobId {
    pub source: JobIdSource,
    pub id: i64,
}

/// Pick the job identifier from three independent sources; first non-empty wins.
#[allow(clippy::cast_possible_truncation)]
pub fn resolve_job_id(
    job_store: Option<i64>,
    start_time: Option<f64>,
    last_known: Option<i64>,
) -> Option<ResolvedJobId> {
    let from_start = start_time
        .filter(|t| t.is_finite() && *t >= 1.0)
        .map(|t| t.floor() as i64);
    [
        (JobIdSource::JobStore, job_store),
        (JobIdSource::StartTime, from_start),
        (JobIdSource::LastKnown, last_known),
    ]
    .into_iter()
    .find_map(|(source, id)| id.filter(|v| *v > 0).map(|id| ResolvedJobId { source, id }))
}

fn check_length(mm: f64) -> Result<f64, LedgerError> {
    if mm.is_finite() && mm >= 0.0 {
        Ok(mm)
    } else {
        Err(LedgerError::InvalidLength(mm))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialLedger {
    spools: Vec<Spool>,
    current_spool_id: Option<String>,
    live: Option<LiveUsage>,
    next_seq: u64,
}

impl MaterialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restored(
        spools: Vec<Spool>,
        current_spool_id: Option<String>,
        live: Option<LiveUsage>,
    ) -> Self {
        let next_seq = spools.len() as u64;
        Self {
            spools,
            current_spool_id,
            live,
            next_seq,
        }
    }

    /// All spools, logically deleted ones included.
    pub fn spools(&self) -> &[Spool] {
        &self.spools
    }

    pub fn spool(&self, id: &str) -> Option<&Spool> {
        self.spools.iter().find(|s| s.id == id)
    }

    pub fn current_spool_id(&self) -> Option<&str> {
        self.current_spool_id.as_deref()
    }

    pub fn current_spool(&self) -> Option<&Spool> {
        self.current_spool_id.as_deref().and_then(|id| self.spool(id))
    }

    pub fn live(&self) -> Option<&LiveUsage> {
        self.live.as_ref()
    }

    /// Remaining length shown while a job runs: start length minus live usage.
    pub fn live_remaining_mm(&self) -> Option<f64> {
        let live = self.live.as_ref()?;
        let start = self.spool(&live.spool_id)?.current_job_start_length?;
        Some((start - live.used_mm).max(0.0))
    }

    fn spool_mut(&mut self, id: &str) -> Result<&mut Spool, LedgerError> {
        self.spools
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| LedgerError::UnknownSpool(id.to_string()))
    }

    pub fn add_spool(&mut self, new: NewSpool, now_ms: i64) -> Result<String, LedgerError> {
        let total = check_length(new.total_length_mm)?;
        let remaining = check_length(new.remaining_length_mm.unwrap_or(total))?;
        self.next_seq += 1;
        let id = format!("spool_{now_ms}_{}", self.next_seq);
        self.spools.push(Spool {
            id: id.clone(),
            name: new.name,
            material: new.material,
            color: new.color,
            total_length_mm: total,
            remaining_length_mm: remaining,
            deleted: false,
            current_print_id: None,
            current_job_start_length: None,
            current_job_expected_length: None,
            print_count: 0,
            used_length_log: Vec::new(),
            print_id_ranges: Vec::new(),
        });
        tracing::info!(spool_id = %id, total_mm = total, "spool added");
        Ok(id)
    }

    /// Mount a spool. Closes the print-id range of the spool being unmounted.
    pub fn set_current_spool(&mut self, id: &str) -> Result<(), LedgerError> {
        let target = self
            .spool(id)
            .ok_or_else(|| LedgerError::UnknownSpool(id.to_string()))?;
        if target.deleted {
            return Err(LedgerError::SpoolDeleted(id.to_string()));
        }
        if self.current_spool_id.as_deref() == Some(id) {
            return Ok(());
        }
        if let Some(old) = self.current_spool_id.take() {
            if let Ok(s) = self.spool_mut(&old) {
                let last = s.last_job_id();
                if let Some(r) = s.print_id_ranges.last_mut() {
                    if r.end_print_id.is_none() {
                        r.end_print_id = Some(last.unwrap_or(r.start_print_id));
                    }
                }
            }
        }
        self.current_spool_id = Some(id.to_string());
        tracing::info!(spool_id = %id, "current spool set");
        Ok(())
    }

    /// Logical delete; the record stays for history.
    pub fn delete_spool(&mut self, id: &str) -> Result<(), LedgerError> {
        self.spool_mut(id)?.deleted = true;
        if self.current_spool_id.as_deref() == Some(id) {
            self.current_spool_id = None;
        }
        Ok(())
    }

    /// Explicit corrective reconciliation of the remaining stock.
    pub fn correct_remaining(&mut self, id: &str, remaining_mm: f64) -> Result<(), LedgerError> {
        let mm = check_length(remaining_mm)?;
        let s = self.spool_mut(id)?;
        tracing::info!(spool_id = %id, from = s.remaining_length_mm, to = mm, "remaining length corrected");
        s.remaining_length_mm = mm;
        Ok(())
    }

    /// Anchor the current spool to `job_id`. A repeat for the same job only updates the expectation.
    pub fn reserve(&mut self, expected_mm: f64, job_id: i64) -> Result<(), LedgerError> {
        let expected = check_length(expected_mm)?;
        let id = self
            .current_spool_id
            .clone()
            .ok_or(LedgerError::NoCurrentSpool)?;
        let s = self.spool_mut(&id)?;
        if s.deleted {
            return Err(LedgerError::SpoolDeleted(id));
        }
        if s.current_print_id == Some(job_id) {
            s.current_job_expected_length = Some(expected);
            return Ok(());
        }
        s.current_print_id = Some(job_id);
        s.current_job_start_length = Some(s.remaining_length_mm);
        s.current_job_expected_length = Some(expected);
        if s.print_id_ranges.last().is_none_or(|r| r.end_print_id.is_some()) {
            s.print_id_ranges.push(PrintIdRange {
                start_print_id: job_id,
                end_print_id: None,
            });
        }
        tracing::info!(spool_id = %id, job_id, expected_mm = expected, "spool reserved");
        self.live = Some(LiveUsage {
            job_id,
            spool_id: id,
            used_mm: 0.0,
            last_telemetry_mm: 0.0,
            telemetry_seen: false,
        });
        Ok(())
    }

    /// Update live usage. Direct telemetry contributes positive deltas only;
    /// without it the usage is `expected × progress / 100`, recomputed absolutely.
    pub fn accumulate(&mut self, sample: UsageSample) -> Option<f64> {
        let expected = {
            let live = self.live.as_ref()?;
            self.spool(&live.spool_id)?.current_job_expected_length
        };
        let live = self.live.as_mut()?;
        match sample.telemetry_mm.filter(|v| v.is_finite() && *v >= 0.0) {
            Some(t) => {
                live.telemetry_seen = true;
                let delta = t - live.last_telemetry_mm;
                if delta > 0.0 {
                    live.used_mm += delta;
                    live.last_telemetry_mm = t;
                }
            }
            None if !live.telemetry_seen => {
                if let (Some(exp), Some(p)) = (expected, sample.progress_pct) {
                    live.used_mm = exp * p.clamp(0.0, 100.0) / 100.0;
                }
            }
            None => {}
        }
        Some(live.used_mm)
    }

    /// Commit `actual_mm` to the spool reserved for `job_id`.
    pub fn finalize(&mut self, actual_mm: f64, job_id: i64, now_ms: i64) -> FinalizeOutcome {
        let Some(s) = self
            .spools
            .iter_mut()
            .find(|s| s.current_print_id == Some(job_id))
        else {
            tracing::warn!(job_id, "finalize skipped: no spool tracks this job");
            return FinalizeOutcome::Skipped;
        };
        let used = if actual_mm.is_finite() { actual_mm.max(0.0) } else { 0.0 };
        let start = s.current_job_start_length.unwrap_or(s.remaining_length_mm);
        s.remaining_length_mm = (start - used).max(0.0);
        s.print_count += 1;
        s.used_length_log.push(UsageEntry {
            job_id,
            used_length_mm: used,
            at_ms: now_ms,
        });
        s.clear_job();
        let outcome = FinalizeOutcome::Applied {
            spool_id: s.id.clone(),
            used_mm: used,
            remaining_mm: s.remaining_length_mm,
        };
        if self.live.as_ref().is_some_and(|l| l.job_id == job_id) {
            self.live = None;
        }
        tracing::info!(job_id, used_mm = used, "ledger finalized");
        outcome
    }

    /// Finalize with the live accumulator as the actual usage.
    pub fn finalize_live(&mut self, job_id: i64, now_ms: i64) -> FinalizeOutcome {
        let used = self
            .live
            .as_ref()
            .filter(|l| l.job_id == job_id)
            .map_or(0.0, |l| l.used_mm);
        self.finalize(used, job_id, now_ms)
    }

    /// Job the live accumulator belongs to.
    pub fn reserved_job(&self) -> Option<i64> {
        self.live.as_ref().map(|l| l.job_id)
    }
}
