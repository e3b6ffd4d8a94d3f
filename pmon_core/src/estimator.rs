//! Predicted remaining time and completion instant.
//!
//! The elapsed-versus-progress ratio is unstable early in a job, so until
//! progress is positive the prediction falls back to the anchor captured from
//! the first valid remaining-time value after the job started.

use crate::snapshot::JobState;
use serde::{Deserialize, Serialize};

/// The inputs whose change triggers a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateKey {
    pub progress: Option<f64>,
    pub state: Option<JobState>,
    pub job_id: Option<i64>,
    pub remaining_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Basis {
    /// Elapsed productive time divided by the progress fraction.
    Ratio,
    /// One-time initial remaining-time anchor.
    InitialAnchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub remaining_ms: i64,
    pub finish_epoch_ms: i64,
    pub computed_at_ms: i64,
    pub basis: Basis,
}

impl Prediction {
    /// Remaining time as seen at `now_ms`, counting down between recomputations.
    pub fn remaining_at(&self, now_ms: i64) -> i64 {
        (self.finish_epoch_ms - now_ms).max(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EstimateInputs {
    pub now_ms: i64,
    pub key: EstimateKey,
    pub actual_start_ms: Option<i64>,
    pub initial_anchor_ms: Option<i64>,
    /// Check plus pause time, excluded from the productive elapsed time.
    pub excluded_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimateOutcome {
    /// Gate closed: nothing relevant changed.
    Unchanged,
    /// Terminal state; prediction removed.
    Cleared,
    Updated(Prediction),
    /// Nothing to base a prediction on yet; the previous one is kept.
    NoBasis,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Estimator {
    last_key: Option<EstimateKey>,
    current: Option<Prediction>,
}

impl Estimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restored(last_key: Option<EstimateKey>, current: Option<Prediction>) -> Self {
        Self { last_key, current }
    }

    pub fn current(&self) -> Option<&Prediction> {
        self.current.as_ref()
    }

    pub fn last_key(&self) -> Option<&EstimateKey> {
        self.last_key.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn update(&mut self, inp: &EstimateInputs) -> EstimateOutcome {
        if self.last_key.as_ref() == Some(&inp.key) {
            return EstimateOutcome::Unchanged;
        }
        self.last_key = Some(inp.key);

        if inp.key.state.is_some_and(JobState::is_terminal) {
            self.current = None;
            tracing::trace!("prediction cleared on terminal state");
            return EstimateOutcome::Cleared;
        }

        let now = inp.now_ms;
        let fraction = inp.key.progress.map_or(0.0, |p| p / 100.0);
        if let Some(start) = inp.actual_start_ms {
            let elapsed = (now - start - inp.excluded_ms) as f64;
            if fraction > 0.0 && elapsed > 0.0 {
                let total = elapsed / fraction.min(1.0);
                let remaining = (total - elapsed).max(0.0).round() as i64;
                let p = Prediction {
                    remaining_ms: remaining,
                    finish_epoch_ms: now + remaining,
                    computed_at_ms: now,
                    basis: Basis::Ratio,
                };
                self.current = Some(p);
                tracing::trace!(remaining_ms = remaining, "prediction from progress ratio");
                return EstimateOutcome::Updated(p);
            }
        }
        if let Some(anchor) = inp.initial_anchor_ms {
            let p = Prediction {
                remaining_ms: (anchor - now).max(0),
                finish_epoch_ms: anchor,
                computed_at_ms: now,
                basis: Basis::InitialAnchor,
            };
            self.current = Some(p);
            return EstimateOutcome::Updated(p);
        }
        EstimateOutcome::NoBasis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(progress: f64, remaining: f64) -> EstimateKey {
        EstimateKey {
            progress: Some(progress),
            state: Some(JobState::Started),
            job_id: Some(1),
            remaining_secs: Some(remaining),
        }
    }

    fn inputs(now: i64, k: EstimateKey) -> EstimateInputs {
        EstimateInputs {
            now_ms: now,
            key: k,
            actual_start_ms: Some(0),
            initial_anchor_ms: Some(3_600_000),
            excluded_ms: 0,
        }
    }

    #[test]
    fn ratio_estimate() {
        let mut e = Estimator::new();
        // 10 minutes in, 25 % done: 40 minutes total, 30 left
        let out = e.update(&inputs(600_000, key(25.0, 1_800.0)));
        let EstimateOutcome::Updated(p) = out else {
            panic!("expected update, got {out:?}");
        };
        assert_eq!(p.basis, Basis::Ratio);
        assert_eq!(p.remaining_ms, 1_800_000);
        assert_eq!(p.finish_epoch_ms, 2_400_000);
    }

    #[test]
    fn excluded_time_is_not_productive() {
        let mut e = Estimator::new();
        let mut i = inputs(600_000, key(50.0, 100.0));
        i.excluded_ms = 300_000;
        let EstimateOutcome::Updated(p) = e.update(&i) else {
            panic!("expected update");
        };
        assert_eq!(p.remaining_ms, 300_000);
    }

    #[test]
    fn zero_progress_uses_anchor() {
        let mut e = Estimator::new();
        let EstimateOutcome::Updated(p) = e.update(&inputs(60_000, key(0.0, 3_540.0))) else {
            panic!("expected update");
        };
        assert_eq!(p.basis, Basis::InitialAnchor);
        assert_eq!(p.finish_epoch_ms, 3_600_000);
        assert_eq!(p.remaining_at(3_000_000), 600_000);
    }

    #[test]
    fn gated_on_key() {
        let mut e = Estimator::new();
        let k = key(10.0, 500.0);
        assert!(matches!(e.update(&inputs(1_000, k)), EstimateOutcome::Updated(_)));
        assert_eq!(e.update(&inputs(5_000, k)), EstimateOutcome::Unchanged);
        assert!(matches!(
            e.update(&inputs(6_000, key(11.0, 500.0))),
            EstimateOutcome::Updated(_)
        ));
    }

    #[test]
    fn terminal_state_clears() {
        let mut e = Estimator::new();
        e.update(&inputs(1_000, key(10.0, 500.0)));
        let mut k = key(100.0, 0.0);
        k.state = Some(JobState::Done);
        assert_eq!(e.update(&inputs(2_000, k)), EstimateOutcome::Cleared);
        assert!(e.current().is_none());
    }

    #[test]
    fn no_basis_keeps_previous() {
        let mut e = Estimator::new();
        e.update(&inputs(1_000, key(10.0, 500.0)));
        let before = e.current().copied();
        let i = EstimateInputs {
            now_ms: 2_000,
            key: key(0.0, 400.0),
            actual_start_ms: None,
            initial_anchor_ms: None,
            excluded_ms: 0,
        };
        assert_eq!(e.update(&i), EstimateOutcome::NoBasis);
        assert_eq!(e.current().copied(), before);
    }
}
