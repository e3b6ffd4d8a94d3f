//! The per-device aggregation context.
//!
//! `AggregatorContext` owns every component and all mutable state for one
//! device. It is driven by exactly one consumer at a time (the runner thread,
//! a replay loop or a test), so none of its parts need interior locking.

use crate::config::MonitorCfg;
use crate::error::{LedgerError, MonitorError};
use crate::estimator::{EstimateInputs, EstimateKey, EstimateOutcome, Estimator, Prediction};
use crate::ledger::{
    resolve_job_id, FinalizeOutcome, MaterialLedger, NewSpool, ResolvedJobId, UsageSample,
};
use crate::lifecycle::{valid_job_id, JobTracker, LifecycleEvent};
use crate::merge::{FieldStore, Source, StoredField};
use crate::milestones::{MilestoneInputs, MilestoneNotifier};
use crate::persistence::{PersistedState, PersistenceBridge};
use crate::snapshot::{derived, keys, DeviceState, JobState, Snapshot};
use crate::timers::{PhaseTimers, TimerChanges, TimerInputs};
use crate::transitions::TransitionTracker;
use crate::util::{format_hms, secs_to_ms, MILLIS_PER_SEC};
use pmon_traits::{Clock, HistoryStore, JobRecord, KeyValueStore, Notification, NotificationSink};
use serde_json::{json, Value};

/// Job-scoped timing anchors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Anchors {
    /// Back-calculated instant printing actually began.
    pub actual_start_ms: Option<i64>,
    /// First valid remaining-time value after the job started.
    pub initial_left_secs: Option<f64>,
    /// Finish instant implied by `initial_left_secs`.
    pub initial_anchor_ms: Option<i64>,
    /// Finish observed live (or recovered); the job's history record is final once set.
    pub finished_at_ms: Option<i64>,
}

/// What one snapshot did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub lifecycle: LifecycleEvent,
    pub timers: TimerChanges,
    pub estimate: EstimateOutcome,
    pub finalized: Option<FinalizeOutcome>,
    pub notifications: Vec<Notification>,
}

pub struct AggregatorContext {
    cfg: MonitorCfg,
    clock: Box<dyn Clock + Send>,
    store: Box<dyn KeyValueStore + Send>,
    sink: Box<dyn NotificationSink + Send>,
    history: Box<dyn HistoryStore + Send>,
    fields: FieldStore,
    tracker: JobTracker,
    timers: PhaseTimers,
    estimator: Estimator,
    milestones: MilestoneNotifier,
    transitions: TransitionTracker,
    ledger: MaterialLedger,
    bridge: PersistenceBridge,
    anchors: Anchors,
    last_state: Option<JobState>,
    last_progress: Option<f64>,
}

impl std::fmt::Debug for AggregatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorContext")
            .field("device", &self.cfg.device)
            .field("tracked", &self.tracker.tracked())
            .field("last_state", &self.last_state)
            .finish_non_exhaustive()
    }
}

impl AggregatorContext {
    /// Assemble a context; use `MonitorBuilder` unless every collaborator is at hand.
    pub fn new(
        cfg: MonitorCfg,
        clock: Box<dyn Clock + Send>,
        store: Box<dyn KeyValueStore + Send>,
        sink: Box<dyn NotificationSink + Send>,
        history: Box<dyn HistoryStore + Send>,
    ) -> Self {
        let milestones = MilestoneNotifier::new(cfg.milestones.clone(), cfg.stall, cfg.material);
        let bridge = PersistenceBridge::new(&cfg.device);
        Self {
            cfg,
            clock,
            store,
            sink,
            history,
            fields: FieldStore::new(),
            tracker: JobTracker::new(),
            timers: PhaseTimers::new(),
            estimator: Estimator::new(),
            milestones,
            transitions: TransitionTracker::new(),
            ledger: MaterialLedger::new(),
            bridge,
            anchors: Anchors::default(),
            last_state: None,
            last_progress: None,
        }
    }

    pub fn config(&self) -> &MonitorCfg {
        &self.cfg
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    /// Hand fields changed since the last call to the rendering layer.
    pub fn take_new_fields(&mut self) -> Vec<(String, StoredField)> {
        self.fields.take_new()
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn timers(&self) -> &PhaseTimers {
        &self.timers
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        self.estimator.current()
    }

    pub fn milestones(&self) -> &MilestoneNotifier {
        &self.milestones
    }

    pub fn ledger(&self) -> &MaterialLedger {
        &self.ledger
    }

    pub fn anchors(&self) -> Anchors {
        self.anchors
    }

    pub fn last_state(&self) -> Option<JobState> {
        self.last_state
    }

    fn number(&self, key: &str, snap: &Snapshot) -> Option<f64> {
        self.fields.resolve(key, snap).number()
    }

    /// Ingest one snapshot: resolve, update every component, write derived
    /// fields, persist and dispatch notifications.
    pub fn apply_snapshot(&mut self, snap: &Snapshot) -> IngestReport {
        let now = self.clock.now_ms();
        let mut out = Vec::new();
        let mut finalized = None;

        // ── resolve ──
        let job_id = valid_job_id(&self.fields.resolve(keys::JOB_ID, snap).value);
        let job_time = self.number(keys::JOB_TIME, snap).filter(|v| *v >= 0.0);
        let left = self.number(keys::LEFT_TIME, snap).filter(|v| *v >= 0.0);
        let self_test = self.number(keys::SELF_TEST, snap);
        let state = JobState::from_value(&self.fields.resolve(keys::JOB_STATE, snap).value)
            .or(self.last_state);
        let device = DeviceState::from_value(&self.fields.resolve(keys::DEVICE_STATE, snap).value);
        let device_idle = match device {
            Some(d) => d == DeviceState::Idle,
            None => state.is_some_and(JobState::is_terminal),
        };
        // absent progress reads as zero once the device reports a state
        let progress = self
            .number(keys::PROGRESS, snap)
            .map(|p| p.clamp(0.0, 100.0))
            .or_else(|| state.map(|_| 0.0));
        let prev_state = self.last_state;

        if let Some(err) = snap.field(keys::ERROR) {
            out.extend(self.transitions.observe_fault(err));
        }

        // ── lifecycle ──
        let event = self.tracker.observe(job_id, job_time);
        // a changed job keeps its old name until the previous record is written
        if !matches!(event, LifecycleEvent::Changed { .. }) {
            self.refresh_file_name(event, snap);
        }
        match event {
            LifecycleEvent::Opened { job_id } => {
                self.milestones.on_job_identified(job_id);
            }
            LifecycleEvent::Changed { from, to } => {
                finalized = self.close_job(from, now);
                self.reset_job();
                self.milestones.on_job_identified(to);
            }
            LifecycleEvent::Reconciled { job_id } => {
                self.milestones.on_job_identified(job_id);
                let rec = self.job_record(job_id, now, None);
                self.persist_history(&rec);
            }
            LifecycleEvent::ProvisionalOpened | LifecycleEvent::Unchanged => {}
        }
        if matches!(event, LifecycleEvent::Changed { .. }) {
            self.refresh_file_name(event, snap);
        }

        // ── anchors ──
        if self.anchors.actual_start_ms.is_none() {
            if let Some(jt) = job_time.filter(|v| *v >= 1.0) {
                self.anchors.actual_start_ms = Some(now - secs_to_ms(jt));
                tracing::debug!(job_time_secs = jt, "actual start anchored");
            }
        }
        if self.anchors.initial_anchor_ms.is_none() && self.anchors.actual_start_ms.is_some() {
            if let Some(l) = left {
                self.anchors.initial_left_secs = Some(l);
                // anchored at first sight, not at actual start: the device counts down from now
                self.anchors.initial_anchor_ms = Some(now + secs_to_ms(l));
                tracing::debug!(left_secs = l, "initial remaining time anchored");
            }
        }

        // ── completion recovery ──
        // a terminal state not observed live (restart) takes the finish instant from history
        if device_idle
            && state.is_some_and(JobState::is_terminal)
            && !prev_state.is_some_and(JobState::is_terminal)
            && !self.timers.completion.is_running()
        {
            self.recover_completion();
        }

        // ── state transitions ──
        if let Some(s) = state {
            if prev_state != Some(s) {
                out.extend(self.transitions.observe_state(prev_state, s));
                if s.is_terminal() {
                    self.milestones.on_job_finished();
                }
                // only a finish observed live carries a finish instant
                if s.is_terminal() && prev_state.is_some_and(JobState::is_active) {
                    self.anchors.finished_at_ms = Some(now);
                    if let Some(id) = self.tracker.tracked() {
                        let rec = self.job_record(id, now, Some(now));
                        self.persist_history(&rec);
                    }
                }
            }
        }

        // ── timers ──
        let changes = self.timers.update(&TimerInputs {
            now_ms: now,
            state,
            prev_state,
            device_idle,
            job_time_secs: job_time,
            self_test,
        });
        if changes.prep_started {
            self.milestones.on_prep_started();
        }
        if changes.check_first_start {
            out.push(Notification::new("printFirstLayerCheckStarted", json!({})));
        }
        if changes.check_stopped {
            let secs = self.timers.check.elapsed_secs(now);
            out.push(Notification::new(
                "printFirstLayerCheckCompleted",
                json!({ "checkSec": secs, "checkPretty": format_hms(secs) }),
            ));
        }

        // ── estimator ──
        let estimate = self.estimator.update(&EstimateInputs {
            now_ms: now,
            key: EstimateKey {
                progress,
                state,
                job_id: self.tracker.tracked(),
                remaining_secs: left,
            },
            actual_start_ms: self.anchors.actual_start_ms,
            initial_anchor_ms: self.anchors.initial_anchor_ms,
            excluded_ms: self.timers.excluded_ms(now),
        });

        // ── milestones ──
        let mid_job = state == Some(JobState::Started) && progress.is_some_and(|p| p > 0.0 && p < 100.0);
        let material_status = self
            .number(keys::MATERIAL_STATUS, snap)
            .filter(|v| *v == 0.0 || *v == 1.0)
            .map(|v| if v == 0.0 { 0u8 } else { 1u8 });
        out.extend(self.milestones.observe(&MilestoneInputs {
            now_ms: now,
            progress,
            remaining_secs: left,
            nozzle: self.number(keys::NOZZLE_TEMP, snap),
            nozzle_max: self.number(keys::NOZZLE_TEMP_MAX, snap),
            bed: self.number(keys::BED_TEMP, snap),
            bed_max: self.number(keys::BED_TEMP_MAX, snap),
            material_status,
            mid_job,
        }));

        // ── ledger ──
        if self.cfg.material.auto_reserve && state == Some(JobState::Started) {
            let expected = self.number(keys::MATERIAL_EXPECTED, snap);
            self.auto_reserve(snap, expected);
        }
        let used = self.fields.resolve(keys::MATERIAL_USED, snap);
        let telemetry_mm = if used.source == Source::Data { used.number() } else { None };
        let active = state.is_some_and(JobState::is_active);
        if self.ledger.live().is_some() && (active || telemetry_mm.is_some()) {
            self.ledger.accumulate(UsageSample {
                telemetry_mm,
                progress_pct: progress,
            });
        }
        let finishing = prev_state.is_some_and(JobState::is_active)
            && state.is_some_and(|s| s.is_terminal() || s == JobState::Idle);
        if finishing {
            if let Some(r) = self.resolve_job(snap) {
                finalized = Some(self.ledger.finalize_live(r.id, now));
            }
        }

        // ── write back ──
        self.fields.commit(snap);
        self.last_state = state;
        self.last_progress = progress;
        self.write_derived(now);
        self.persist();
        self.dispatch(&out);

        IngestReport {
            lifecycle: event,
            timers: changes,
            estimate,
            finalized,
            notifications: out,
        }
    }

    /// Time-only processing between snapshots.
    pub fn apply_tick(&mut self) -> Vec<Notification> {
        let now = self.clock.now_ms();
        let mid_job = self.last_state == Some(JobState::Started)
            && self.last_progress.is_some_and(|p| p > 0.0 && p < 100.0);
        let out = self.milestones.tick(now, mid_job);
        self.write_derived(now);
        self.persist();
        self.dispatch(&out);
        out
    }

    /// Rewrite every persisted key, bypassing the unchanged-value cache.
    pub fn flush(&mut self) {
        let now = self.clock.now_ms();
        self.write_derived(now);
        self.bridge.invalidate();
        self.persist();
        tracing::debug!(device = %self.cfg.device, "state flushed");
    }

    /// Load persisted state into the live components (startup, reconnect).
    pub fn restore(&mut self) {
        let st = self.bridge.load(&*self.store);
        self.timers.prep = st.prep;
        self.timers.check = st.check;
        self.timers.pause = st.pause;
        self.timers.completion = st.completion;
        self.timers.paused_since_ms = st.paused_since_ms;
        self.timers.set_check_seen(st.check_seen);
        self.anchors = Anchors {
            actual_start_ms: st.actual_start_ms,
            initial_left_secs: st.initial_left_secs,
            initial_anchor_ms: st.initial_anchor_ms,
            finished_at_ms: st.finished_at_ms,
        };
        self.tracker = JobTracker::restored(st.tracked_job, st.provisional, st.file_name);
        self.last_state = st.last_state;
        self.estimator = Estimator::restored(st.estimate_key, st.prediction);
        self.ledger = MaterialLedger::restored(st.spools, st.current_spool, st.live);
        self.milestones.restore_fired(&st.milestones_fired);
        self.milestones.bind_restored(st.tracked_job);
        let now = self.clock.now_ms();
        self.write_derived(now);
        tracing::info!(
            device = %self.cfg.device,
            job_id = ?st.tracked_job,
            state = ?st.last_state,
            "state restored"
        );
    }

    // ── spool management ──

    pub fn add_spool(&mut self, spool: NewSpool) -> Result<String, MonitorError> {
        let now = self.clock.now_ms();
        let id = self.ledger.add_spool(spool, now)?;
        self.persist();
        Ok(id)
    }

    pub fn set_current_spool(&mut self, id: &str) -> Result<(), MonitorError> {
        self.ledger.set_current_spool(id)?;
        self.persist();
        Ok(())
    }

    pub fn delete_spool(&mut self, id: &str) -> Result<(), MonitorError> {
        self.ledger.delete_spool(id)?;
        self.persist();
        Ok(())
    }

    pub fn correct_remaining(&mut self, id: &str, remaining_mm: f64) -> Result<(), MonitorError> {
        self.ledger.correct_remaining(id, remaining_mm)?;
        self.persist();
        Ok(())
    }

    /// Explicit reservation, independent of the automatic one.
    pub fn reserve(&mut self, expected_mm: f64, job_id: i64) -> Result<(), MonitorError> {
        self.ledger.reserve(expected_mm, job_id)?;
        self.persist();
        Ok(())
    }

    /// Explicit finalize with a caller-measured usage.
    pub fn finalize(&mut self, actual_mm: f64, job_id: i64) -> FinalizeOutcome {
        let now = self.clock.now_ms();
        let outcome = self.ledger.finalize(actual_mm, job_id, now);
        self.persist();
        outcome
    }

    // ── internals ──

    fn resolve_job(&self, snap: &Snapshot) -> Option<ResolvedJobId> {
        let from_store = match self.history.current_job_id() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "job store lookup failed");
                None
            }
        };
        resolve_job_id(
            from_store,
            self.number(keys::JOB_ID, snap),
            self.tracker.tracked(),
        )
    }

    fn auto_reserve(&mut self, snap: &Snapshot, expected: Option<f64>) {
        let Some(current) = self.ledger.current_spool() else {
            return;
        };
        let Some(job) = self.resolve_job(snap) else {
            return;
        };
        let already = current.current_print_id == Some(job.id);
        if already && (expected.is_none() || expected == current.current_job_expected_length) {
            return;
        }
        let expected = expected
            .or(if already { current.current_job_expected_length } else { None })
            .unwrap_or(0.0);
        match self.ledger.reserve(expected, job.id) {
            Ok(()) => {}
            Err(LedgerError::InvalidLength(v)) => {
                tracing::warn!(value = v, "expected material length rejected");
            }
            Err(e) => tracing::warn!(error = %e, job_id = job.id, "automatic reserve failed"),
        }
    }

    /// Close the previous job: history record and any reservation still open.
    /// A record written at the finish is left alone; the timers may already
    /// be counting the next job's preparation.
    fn close_job(&mut self, job_id: i64, now: i64) -> Option<FinalizeOutcome> {
        if self.anchors.finished_at_ms.is_none() {
            let rec = self.job_record(job_id, now, self.timers.completion.start_epoch_ms);
            self.persist_history(&rec);
        }
        self.tracker.clear_metadata();
        if self.ledger.reserved_job() == Some(job_id) {
            Some(self.ledger.finalize_live(job_id, now))
        } else {
            None
        }
    }

    /// Clear everything scoped to the job exactly once per job change.
    fn reset_job(&mut self) {
        self.timers.reset();
        self.anchors = Anchors::default();
        self.estimator.reset();
        for key in derived::JOB_SCOPED {
            self.fields.clear(key);
        }
        self.fields.clear(derived::PREDICTED_FINISH);
        tracing::debug!("job-scoped state reset");
    }

    /// Fresh names always apply; a stored one only when the job just opened.
    fn refresh_file_name(&mut self, event: LifecycleEvent, snap: &Snapshot) {
        let file = self.fields.resolve(keys::FILE_NAME, snap);
        if let Value::String(name) = &file.value {
            let opened_now = matches!(
                event,
                LifecycleEvent::Opened { .. }
                    | LifecycleEvent::Reconciled { .. }
                    | LifecycleEvent::ProvisionalOpened
            );
            if file.source == Source::Data || opened_now {
                self.tracker.update_metadata(name);
            }
        }
    }

    fn recover_completion(&mut self) {
        let Some(tracked) = self.tracker.tracked() else {
            return;
        };
        match self.history.latest_finished() {
            Ok(Some(f)) if f.job_id == tracked => {
                if self.timers.recover_completion(f.finished_at_ms) {
                    self.anchors.finished_at_ms = Some(f.finished_at_ms);
                    tracing::info!(job_id = tracked, "completion timer recovered from history");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "history lookup failed"),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn job_record(&self, job_id: i64, now: i64, finished_at_ms: Option<i64>) -> JobRecord {
        let secs = |ms: i64| ms as f64 / MILLIS_PER_SEC as f64;
        JobRecord {
            job_id,
            file_name: self.tracker.file_name().map(str::to_string),
            actual_start_ms: self.anchors.actual_start_ms,
            finished_at_ms,
            prep_secs: secs(self.timers.prep.elapsed_ms(now)),
            check_secs: secs(self.timers.check.elapsed_ms(now)),
            pause_secs: secs(self.timers.pause.elapsed_ms(now)),
            material_used_mm: self
                .ledger
                .live()
                .filter(|l| l.job_id == job_id)
                .map(|l| l.used_mm),
        }
    }

    fn persist_history(&mut self, rec: &JobRecord) {
        if let Err(e) = self.history.persist_job(rec) {
            tracing::warn!(error = %e, job_id = rec.job_id, "history persist failed");
        }
    }

    fn set_duration(&mut self, key: &str, secs: Option<i64>) {
        match secs {
            Some(s) => self.fields.set(key, json!(s), json!(format_hms(s))),
            None => self.fields.clear(key),
        }
    }

    fn set_epoch(&mut self, key: &str, ms: Option<i64>) {
        match ms {
            Some(ms) => self.fields.set_raw(key, json!(ms / MILLIS_PER_SEC)),
            None => self.fields.clear(key),
        }
    }

    fn write_derived(&mut self, now: i64) {
        let t = &self.timers;
        let prep = t.prep.elapsed_secs(now);
        let check = t.check.elapsed_secs(now);
        let pause = t.pause.elapsed_secs(now);
        let completion = t.completion.is_running().then(|| t.completion.elapsed_secs(now));
        self.set_duration(derived::PREPARATION_TIME, Some(prep));
        self.set_duration(derived::CHECK_TIME, Some(check));
        self.set_duration(derived::PAUSE_TIME, Some(pause));
        self.set_duration(derived::COMPLETION_TIME, completion);

        let a = self.anchors;
        self.set_epoch(derived::ACTUAL_START, a.actual_start_ms);
        #[allow(clippy::cast_possible_truncation)]
        let initial = a.initial_left_secs.map(|s| s.round() as i64);
        self.set_duration(derived::INITIAL_LEFT, initial);
        self.set_epoch(derived::INITIAL_LEFT_AT, a.initial_anchor_ms);

        let prediction = self.estimator.current().copied();
        self.set_epoch(derived::PREDICTED_FINISH, prediction.map(|p| p.finish_epoch_ms));
        self.set_epoch(derived::ESTIMATED_COMPLETION, prediction.map(|p| p.finish_epoch_ms));
        self.set_duration(
            derived::ESTIMATED_REMAINING,
            prediction.map(|p| p.remaining_at(now) / MILLIS_PER_SEC),
        );

        match self.ledger.live().map(|l| l.used_mm) {
            Some(mm) => self.fields.set_raw(derived::MATERIAL_USED_LIVE, json!(mm)),
            None => self.fields.clear(derived::MATERIAL_USED_LIVE),
        }
        let remaining = self
            .ledger
            .live_remaining_mm()
            .or_else(|| self.ledger.current_spool().map(|s| s.remaining_length_mm));
        match remaining {
            Some(mm) => self.fields.set_raw(derived::SPOOL_REMAINING, json!(mm)),
            None => self.fields.clear(derived::SPOOL_REMAINING),
        }
    }

    fn snapshot_state(&self) -> PersistedState {
        PersistedState {
            prep: self.timers.prep,
            check: self.timers.check,
            pause: self.timers.pause,
            completion: self.timers.completion,
            paused_since_ms: self.timers.paused_since_ms,
            check_seen: self.timers.check_seen(),
            actual_start_ms: self.anchors.actual_start_ms,
            initial_left_secs: self.anchors.initial_left_secs,
            initial_anchor_ms: self.anchors.initial_anchor_ms,
            finished_at_ms: self.anchors.finished_at_ms,
            tracked_job: self.tracker.tracked(),
            provisional: self.tracker.is_provisional(),
            file_name: self.tracker.file_name().map(str::to_string),
            last_state: self.last_state,
            estimate_key: self.estimator.last_key().copied(),
            prediction: self.estimator.current().copied(),
            spools: self.ledger.spools().to_vec(),
            current_spool: self.ledger.current_spool_id().map(str::to_string),
            live: self.ledger.live().cloned(),
            milestones_fired: self.milestones.fired_ids(),
        }
    }

    fn persist(&mut self) {
        let st = self.snapshot_state();
        self.bridge.save(&mut *self.store, &st);
    }

    fn dispatch(&mut self, out: &[Notification]) {
        for n in out {
            if let Err(e) = self.sink.notify(n.clone()) {
                tracing::warn!(error = %e, kind = %n.kind, "notification sink failed");
            }
        }
    }
}
