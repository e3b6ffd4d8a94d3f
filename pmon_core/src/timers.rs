//! The four cooperating phase timers: preparation, first-layer check, pause, completion.
//!
//! Each timer is a {stopped, running} accumulator over wall-clock epoch
//! milliseconds. All transitions are evaluated at snapshot time from the
//! resolved job state, job time and self-test progress; stops are applied
//! before starts so a superseding timer never overlaps the one it replaces.

use crate::snapshot::JobState;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Self-test band in which preparation may start.
pub const PREP_BAND: RangeInclusive<f64> = 0.0..=9.0;
/// Self-test band of the first-layer inspection.
pub const CHECK_BAND: RangeInclusive<f64> = 30.0..=39.0;

/// Self-test values during which a pause counts as a print pause.
pub fn in_pause_band(self_test: f64) -> bool {
    self_test == 0.0 || (10.0..=29.0).contains(&self_test) || (40.0..=100.0).contains(&self_test)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimer {
    pub start_epoch_ms: Option<i64>,
    pub accumulated_ms: i64,
}

impl PhaseTimer {
    #[inline]
    pub fn is_running(&self) -> bool {
        self.start_epoch_ms.is_some()
    }

    /// Returns true if the timer was stopped.
    pub fn start(&mut self, now_ms: i64) -> bool {
        if self.is_running() {
            return false;
        }
        self.start_epoch_ms = Some(now_ms);
        true
    }

    /// Fold the running span into the total. Returns true if the timer was running.
    pub fn stop(&mut self, now_ms: i64) -> bool {
        match self.start_epoch_ms.take() {
            Some(start) => {
                self.accumulated_ms += now_ms.saturating_sub(start).max(0);
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Move the running anchor forward, excluding `delta_ms` from the measurement.
    pub fn shift_start(&mut self, delta_ms: i64) {
        if let Some(s) = self.start_epoch_ms.as_mut() {
            *s = s.saturating_add(delta_ms.max(0));
        }
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        let running = self
            .start_epoch_ms
            .map_or(0, |s| now_ms.saturating_sub(s).max(0));
        self.accumulated_ms + running
    }

    pub fn elapsed_secs(&self, now_ms: i64) -> i64 {
        self.elapsed_ms(now_ms) / crate::util::MILLIS_PER_SEC
    }
}

/// Resolved per-snapshot inputs to the timers.
#[derive(Debug, Clone, Copy)]
pub struct TimerInputs {
    pub now_ms: i64,
    pub state: Option<JobState>,
    pub prev_state: Option<JobState>,
    pub device_idle: bool,
    /// `None` when the device never reported a job time.
    pub job_time_secs: Option<f64>,
    /// `None` when no self-test progress is known.
    pub self_test: Option<f64>,
}

/// What changed in one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerChanges {
    pub prep_started: bool,
    pub prep_stopped: bool,
    pub check_started: bool,
    /// First check start since the last reset.
    pub check_first_start: bool,
    pub check_stopped: bool,
    pub pause_started: bool,
    pub pause_stopped: bool,
    pub completion_started: bool,
    pub completion_reset: bool,
}

impl TimerChanges {
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseTimers {
    pub prep: PhaseTimer,
    pub check: PhaseTimer,
    pub pause: PhaseTimer,
    pub completion: PhaseTimer,
    /// When the job entered the paused state; used to time-shift preparation on resume.
    pub paused_since_ms: Option<i64>,
    check_seen: bool,
}

impl PhaseTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every timer. Idempotent.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn check_seen(&self) -> bool {
        self.check_seen
    }

    pub fn set_check_seen(&mut self, seen: bool) {
        self.check_seen = seen;
    }

    /// Seconds excluded from the productive print time.
    pub fn excluded_ms(&self, now_ms: i64) -> i64 {
        self.check.elapsed_ms(now_ms) + self.pause.elapsed_ms(now_ms)
    }

    /// Rebuild the completion timer from a finish time found in history.
    pub fn recover_completion(&mut self, finished_at_ms: i64) -> bool {
        if self.completion.is_running() {
            return false;
        }
        self.completion = PhaseTimer {
            start_epoch_ms: Some(finished_at_ms),
            accumulated_ms: 0,
        };
        tracing::debug!(finished_at_ms, "completion timer recovered from history");
        true
    }

    pub fn update(&mut self, inp: &TimerInputs) -> TimerChanges {
        let mut ch = TimerChanges::default();
        let now = inp.now_ms;
        let prev = inp.prev_state;
        let state = inp.state;
        let was_paused = prev == Some(JobState::Paused);
        let is_paused = state == Some(JobState::Paused);
        let resumed = was_paused && state == Some(JobState::Started);
        let left_pause = was_paused && state.is_some() && !is_paused;
        let job = inp.job_time_secs;
        let printing = job.is_some_and(|j| j >= 1.0);
        let st = inp.self_test;
        let st_or_zero = st.unwrap_or(0.0);

        // Resume: exclude the paused span from a preparation that never finished.
        if left_pause {
            if let Some(since) = self.paused_since_ms.take() {
                if resumed && self.prep.is_running() {
                    let delta = now.saturating_sub(since);
                    self.prep.shift_start(delta);
                    tracing::debug!(delta_ms = delta, "preparation shifted by pause");
                }
            }
        }
        if is_paused && self.paused_since_ms.is_none() {
            self.paused_since_ms = Some(now);
        }

        // ── stops ──
        let terminal_or_idle = state.is_some_and(|s| s.is_terminal() || s == JobState::Idle);
        if self.prep.is_running() && (printing || terminal_or_idle) {
            ch.prep_stopped = self.prep.stop(now);
        }
        let check_state_ok = state.is_some_and(JobState::is_active);
        let left_check_band = st.is_some_and(|v| !CHECK_BAND.contains(&v));
        if self.check.is_running() && (left_check_band || !check_state_ok || resumed) {
            ch.check_stopped = self.check.stop(now);
        }
        let job_not_printing = job.is_some_and(|j| j < 1.0);
        if self.pause.is_running()
            && (!is_paused || job_not_printing || self.prep.is_running() || self.check.is_running())
        {
            ch.pause_stopped = self.pause.stop(now);
        }
        if self.completion.is_running() && (state == Some(JobState::Started) || left_pause) {
            self.completion.reset();
            ch.completion_reset = true;
        }

        // ── starts ──
        if !self.prep.is_running()
            && state == Some(JobState::Started)
            && job == Some(0.0)
            && PREP_BAND.contains(&st_or_zero)
            && !self.check.is_running()
            && !self.pause.is_running()
        {
            ch.prep_started = self.prep.start(now);
        }
        if !self.check.is_running()
            && !self.prep.is_running()
            && check_state_ok
            && st.is_some_and(|v| CHECK_BAND.contains(&v))
            && !resumed
        {
            ch.check_started = self.check.start(now);
            ch.check_first_start = ch.check_started && !self.check_seen;
            self.check_seen = true;
        }
        if !self.pause.is_running()
            && is_paused
            && printing
            && in_pause_band(st_or_zero)
            && !self.prep.is_running()
            && !self.check.is_running()
        {
            ch.pause_started = self.pause.start(now);
        }
        if !self.completion.is_running()
            && inp.device_idle
            && state.is_some_and(JobState::is_terminal)
        {
            ch.completion_started = self.completion.start(now);
        }

        if ch.any() {
            tracing::debug!(?ch, "phase timers changed");
        }
        ch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn inp(now: i64, prev: Option<JobState>, state: JobState, job: f64, st: f64) -> TimerInputs {
        TimerInputs {
            now_ms: now,
            state: Some(state),
            prev_state: prev,
            device_idle: false,
            job_time_secs: Some(job),
            self_test: Some(st),
        }
    }

    #[test]
    fn timer_start_stop_accumulates() {
        let mut t = PhaseTimer::default();
        assert!(t.start(1_000));
        assert!(!t.start(2_000), "already running");
        assert_eq!(t.elapsed_secs(4_500), 3);
        assert!(t.stop(5_000));
        assert!(!t.stop(6_000));
        assert_eq!(t.accumulated_ms, 4_000);
        t.start(10_000);
        t.stop(11_000);
        assert_eq!(t.accumulated_ms, 5_000);
    }

    #[test]
    fn stop_with_backwards_clock_never_decreases() {
        let mut t = PhaseTimer::default();
        t.start(10_000);
        t.stop(9_000);
        assert_eq!(t.accumulated_ms, 0);
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(5.0, false)]
    #[case(10.0, true)]
    #[case(29.0, true)]
    #[case(35.0, false)]
    #[case(40.0, true)]
    #[case(100.0, true)]
    fn pause_band(#[case] st: f64, #[case] expected: bool) {
        assert_eq!(in_pause_band(st), expected);
    }

    #[test]
    fn prep_runs_until_job_time_advances() {
        let mut t = PhaseTimers::new();
        let ch = t.update(&inp(0, None, JobState::Started, 0.0, 0.0));
        assert!(ch.prep_started);
        let ch = t.update(&inp(7_000, Some(JobState::Started), JobState::Started, 1.0, 0.0));
        assert!(ch.prep_stopped);
        assert_eq!(t.prep.accumulated_ms, 7_000);
        // does not restart while job time stays >= 1
        let ch = t.update(&inp(9_000, Some(JobState::Started), JobState::Started, 3.0, 0.0));
        assert!(!ch.prep_started);
    }

    #[test]
    fn prep_not_started_outside_band() {
        let mut t = PhaseTimers::new();
        let ch = t.update(&inp(0, None, JobState::Started, 0.0, 20.0));
        assert!(!ch.prep_started);
    }

    #[test]
    fn prep_stops_on_abort_before_print() {
        let mut t = PhaseTimers::new();
        t.update(&inp(0, None, JobState::Started, 0.0, 0.0));
        let ch = t.update(&inp(4_000, Some(JobState::Started), JobState::Failed, 0.0, 0.0));
        assert!(ch.prep_stopped);
        assert_eq!(t.prep.accumulated_ms, 4_000);
    }

    #[test]
    fn pause_during_prep_is_folded_out() {
        let mut t = PhaseTimers::new();
        t.update(&inp(0, None, JobState::Started, 0.0, 0.0));
        t.update(&inp(10_000, Some(JobState::Started), JobState::Paused, 0.0, 0.0));
        t.update(&inp(70_000, Some(JobState::Paused), JobState::Started, 0.0, 0.0));
        t.update(&inp(80_000, Some(JobState::Started), JobState::Started, 1.0, 0.0));
        // 10 s before the pause + 10 s after it
        assert_eq!(t.prep.accumulated_ms, 20_000);
        assert_eq!(t.pause.accumulated_ms, 0, "job time < 1, not a print pause");
    }

    #[test]
    fn check_runs_inside_band_only() {
        let mut t = PhaseTimers::new();
        t.update(&inp(0, None, JobState::Started, 0.0, 0.0));
        t.update(&inp(5_000, Some(JobState::Started), JobState::Started, 5.0, 0.0));
        let ch = t.update(&inp(6_000, Some(JobState::Started), JobState::Started, 5.0, 35.0));
        assert!(ch.check_started && ch.check_first_start);
        let ch = t.update(&inp(9_000, Some(JobState::Started), JobState::Check, 5.0, 38.0));
        assert!(!ch.check_stopped);
        let ch = t.update(&inp(12_000, Some(JobState::Check), JobState::Started, 5.0, 40.0));
        assert!(ch.check_stopped);
        assert_eq!(t.check.accumulated_ms, 6_000);
        let ch = t.update(&inp(13_000, Some(JobState::Started), JobState::Started, 6.0, 31.0));
        assert!(ch.check_started && !ch.check_first_start);
    }

    #[test]
    fn check_never_starts_while_prep_runs() {
        let mut t = PhaseTimers::new();
        t.update(&inp(0, None, JobState::Started, 0.0, 0.0));
        let ch = t.update(&inp(1_000, Some(JobState::Started), JobState::Started, 0.0, 35.0));
        assert!(!ch.check_started);
        assert!(t.prep.is_running());
    }

    #[test]
    fn pause_accumulates_across_cycles() {
        let mut t = PhaseTimers::new();
        t.update(&inp(0, None, JobState::Started, 10.0, 50.0));
        t.update(&inp(1_000, Some(JobState::Started), JobState::Paused, 11.0, 50.0));
        t.update(&inp(4_000, Some(JobState::Paused), JobState::Started, 11.0, 50.0));
        t.update(&inp(5_000, Some(JobState::Started), JobState::Paused, 12.0, 50.0));
        t.update(&inp(7_000, Some(JobState::Paused), JobState::Started, 12.0, 50.0));
        assert_eq!(t.pause.accumulated_ms, 5_000);
        assert!(!t.pause.is_running());
    }

    #[test]
    fn completion_starts_when_idle_and_resets_on_restart() {
        let mut t = PhaseTimers::new();
        let mut i = inp(0, Some(JobState::Started), JobState::Done, 100.0, 100.0);
        assert!(!t.update(&i).completion_started, "device still busy");
        i.device_idle = true;
        i.now_ms = 2_000;
        assert!(t.update(&i).completion_started);
        assert_eq!(t.completion.elapsed_secs(5_000), 3);
        let ch = t.update(&inp(6_000, Some(JobState::Done), JobState::Started, 0.0, 0.0));
        assert!(ch.completion_reset);
        assert_eq!(t.completion, PhaseTimer::default());
    }

    #[test]
    fn recovery_rebuilds_from_history() {
        let mut t = PhaseTimers::new();
        assert!(t.recover_completion(1_000));
        assert_eq!(t.completion.elapsed_secs(61_000), 60);
        assert!(!t.recover_completion(50_000), "already running");
    }

    #[test]
    fn missing_job_time_never_starts_prep_or_stops_pause() {
        let mut t = PhaseTimers::new();
        let mut i = inp(0, None, JobState::Started, 0.0, 0.0);
        i.job_time_secs = None;
        assert!(!t.update(&i).prep_started);

        t.update(&inp(1_000, Some(JobState::Started), JobState::Paused, 20.0, 50.0));
        assert!(t.pause.is_running());
        let mut i = inp(2_000, Some(JobState::Paused), JobState::Paused, 0.0, 0.0);
        i.job_time_secs = None;
        i.self_test = None;
        assert!(!t.update(&i).pause_stopped);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut t = PhaseTimers::new();
        t.update(&inp(0, None, JobState::Started, 0.0, 0.0));
        t.reset();
        let once = t.clone();
        t.reset();
        assert_eq!(t, once);
        assert_eq!(t, PhaseTimers::new());
    }
}
