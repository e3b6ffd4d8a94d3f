//! End-to-end job scenarios through `AggregatorContext`.

mod common;

use common::{rig, rig_full, rig_with, Rig, T0};
use pmon_core::mocks::{MemoryHistory, MemoryStore, RecordingSink};
use pmon_core::snapshot::derived;
use pmon_core::{
    Basis, EstimateOutcome, FinalizeOutcome, LifecycleEvent, MonitorCfg, NewSpool,
};
use pmon_traits::{FinishedJob, HistoryStore, ManualClock};
use serde_json::json;

const JOB_A: i64 = 1_700_000_000;
const JOB_B: i64 = 1_700_050_000;

fn mount_spool(r: &mut Rig, total: f64) -> String {
    let id = r
        .ctx
        .add_spool(NewSpool {
            name: "PLA black".into(),
            material: "PLA".into(),
            total_length_mm: total,
            ..Default::default()
        })
        .expect("add spool");
    r.ctx.set_current_spool(&id).expect("mount spool");
    id
}

#[test]
fn normal_job_with_check_and_pause() {
    let mut r = rig();
    let rep = r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0, "withSelfTest": 0, "printProgress": 0}),
    );
    assert_eq!(rep.lifecycle, LifecycleEvent::Opened { job_id: JOB_A });
    assert!(rep.timers.prep_started);

    // printing begins after five minutes of preparation
    let rep = r.feed(300, json!({"printJobTime": 1}));
    assert!(rep.timers.prep_stopped);

    // first-layer check
    let rep = r.feed(10, json!({"printJobTime": 11, "withSelfTest": 35}));
    assert!(rep.timers.check_started);
    let rep = r.feed(
        60,
        json!({"printJobTime": 71, "withSelfTest": 40, "printLeftTime": 3600}),
    );
    assert!(rep.timers.check_stopped);
    assert!(matches!(
        rep.estimate,
        EstimateOutcome::Updated(p) if p.basis == Basis::InitialAnchor
    ));
    // counted from the first sighting of the remaining time, not from the actual start
    assert_eq!(
        r.ctx.anchors().initial_anchor_ms,
        Some(T0 + 370_000 + 3_600_000)
    );

    // pause and resume
    let rep = r.feed(600, json!({"state": 5, "printJobTime": 671, "printProgress": 20}));
    assert!(rep.timers.pause_started);
    let rep = r.feed(120, json!({"state": 1, "printJobTime": 671}));
    assert!(rep.timers.pause_stopped);
    assert!(!rep.timers.check_started, "never a check on resume");

    // completion
    let rep = r.feed(1000, json!({"printProgress": 100, "state": 2, "printJobTime": 1671}));
    assert!(rep.timers.completion_started);
    assert_eq!(rep.estimate, EstimateOutcome::Cleared);

    let t = r.ctx.timers();
    assert_eq!(t.prep.accumulated_ms, 300_000);
    assert_eq!(t.check.accumulated_ms, 60_000);
    assert_eq!(t.pause.accumulated_ms, 120_000);
    assert!(r.ctx.prediction().is_none());

    r.tick(30);
    assert_eq!(r.raw(derived::COMPLETION_TIME), Some(json!(30)));
    assert_eq!(r.raw(derived::PREPARATION_TIME), Some(json!(300)));

    let kinds = r.sink.kinds();
    for k in [
        "printStarted",
        "printFirstLayerCheckStarted",
        "printFirstLayerCheckCompleted",
        "printPaused",
        "printResumed",
        "printCompleted",
    ] {
        assert!(kinds.iter().any(|x| x == k), "missing {k} in {kinds:?}");
    }
    assert_eq!(r.sink.count("printProgressComplete"), 1);
    assert_eq!(r.sink.count("printProgressMilestone"), 5);

    let records = r.history.records();
    let rec = records.iter().find(|x| x.job_id == JOB_A).expect("history record");
    assert!(rec.finished_at_ms.is_some());
}

#[test]
fn cancel_mid_job_stops_prep_and_settles_ledger() {
    let mut r = rig();
    let spool = mount_spool(&mut r, 10_000.0);

    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0, "estimatedMaterialLength": 1000}),
    );
    assert_eq!(r.ctx.ledger().reserved_job(), Some(JOB_A));
    r.feed(5, json!({"printJobTime": 2, "printProgress": 40}));
    assert_eq!(r.ctx.ledger().live().map(|l| l.used_mm), Some(400.0));

    let rep = r.feed(5, json!({"state": 0}));
    assert_eq!(r.ctx.timers().prep.accumulated_ms, 5_000);
    assert!(!r.ctx.timers().completion.is_running());
    assert_eq!(
        rep.finalized,
        Some(FinalizeOutcome::Applied {
            spool_id: spool.clone(),
            used_mm: 400.0,
            remaining_mm: 9_600.0,
        })
    );
    let s = r.ctx.ledger().spool(&spool).expect("spool");
    assert_eq!(s.print_count, 1);
    assert_eq!(s.current_print_id, None);
    assert!(r.sink.kinds().iter().any(|k| k == "printStopped"));
    assert_eq!(r.sink.count("printCompleted"), 0);
}

#[test]
fn cancel_mid_job_charges_telemetry_usage() {
    let mut r = rig();
    let spool = mount_spool(&mut r, 10_000.0);
    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0, "estimatedMaterialLength": 1000}),
    );
    for (i, used) in [20, 60, 55, 100, 150].into_iter().enumerate() {
        r.feed(10, json!({"printJobTime": 10 * (i + 1), "usedMaterialLength": used}));
    }
    assert_eq!(r.ctx.ledger().live().map(|l| l.used_mm), Some(150.0));

    let rep = r.feed(10, json!({"state": 4}));
    assert_eq!(
        rep.finalized,
        Some(FinalizeOutcome::Applied {
            spool_id: spool.clone(),
            used_mm: 150.0,
            remaining_mm: 9_850.0,
        })
    );
    let s = r.ctx.ledger().spool(&spool).expect("spool");
    assert_eq!(s.total_length_mm - s.remaining_length_mm, 150.0);
    assert_eq!(s.used_length_log.len(), 1);
    assert_eq!(s.current_print_id, None);
    assert!(r.ctx.ledger().live().is_none());
    assert_eq!(r.sink.count("printFailed"), 1);
}

#[test]
fn direct_telemetry_beats_progress_estimate() {
    let mut r = rig();
    mount_spool(&mut r, 5_000.0);
    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 3, "estimatedMaterialLength": 1000}),
    );
    r.feed(10, json!({"usedMaterialLength": 120, "printProgress": 50}));
    r.feed(10, json!({"usedMaterialLength": 100, "printProgress": 60}));
    r.feed(10, json!({"printProgress": 70}));
    assert_eq!(r.ctx.ledger().live().map(|l| l.used_mm), Some(120.0));

    let rep = r.feed(10, json!({"usedMaterialLength": 150, "state": 2, "printProgress": 100}));
    assert!(matches!(
        rep.finalized,
        Some(FinalizeOutcome::Applied { used_mm, remaining_mm, .. })
            if used_mm == 150.0 && remaining_mm == 4_850.0
    ));
}

#[test]
fn restart_continues_from_persisted_state() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let mut r = rig_with(MonitorCfg::default(), store.clone(), clock.clone());
    r.feed(
        0,
        json!({"printStartTime": 500, "state": 1, "printJobTime": 0, "printProgress": 0}),
    );
    r.feed(60, json!({"printJobTime": 1}));
    r.feed(
        600,
        json!({"printJobTime": 601, "printProgress": 10, "printLeftTime": 5400}),
    );
    let before = *r.ctx.prediction().expect("prediction");
    assert_eq!(before.basis, Basis::Ratio);
    let anchors = r.ctx.anchors();
    drop(r);

    clock.advance(std::time::Duration::from_secs(5));
    let mut again = rig_with(MonitorCfg::default(), store, clock);
    assert_eq!(again.ctx.tracker().tracked(), Some(500));
    assert_eq!(again.ctx.timers().prep.accumulated_ms, 60_000);
    assert_eq!(again.ctx.anchors(), anchors);

    let rep = again.feed(
        0,
        json!({"printStartTime": 500, "state": 1, "printJobTime": 606, "printProgress": 10, "printLeftTime": 5400}),
    );
    assert_eq!(rep.lifecycle, LifecycleEvent::Unchanged);
    assert_eq!(rep.estimate, EstimateOutcome::Unchanged);
    assert_eq!(again.ctx.prediction().map(|p| p.finish_epoch_ms), Some(before.finish_epoch_ms));
    assert!(!rep.timers.prep_started);

    again.feed(
        600,
        json!({"printJobTime": 1206, "printProgress": 20, "printLeftTime": 4800}),
    );
    let after = again.ctx.prediction().expect("prediction");
    assert!((after.finish_epoch_ms - before.finish_epoch_ms).abs() < 60_000);
    assert_eq!(again.sink.count("printProgressMilestone"), 0);
}

#[test]
fn new_job_resets_exactly_once() {
    let mut r = rig();
    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0, "printProgress": 0}),
    );
    r.feed(30, json!({"printJobTime": 2, "printProgress": 60}));
    assert!(r.ctx.milestones().fired().len() == 1);
    r.feed(30, json!({"state": 2, "printProgress": 100}));

    // next job: preparation starts before the new identifier is known
    let rep = r.feed(60, json!({"state": 1, "printJobTime": 0, "printProgress": 0}));
    assert!(rep.timers.prep_started);
    assert!(r.ctx.milestones().fired().is_empty());

    let rep = r.feed(20, json!({"printStartTime": JOB_B, "printJobTime": 0}));
    assert_eq!(rep.lifecycle, LifecycleEvent::Changed { from: JOB_A, to: JOB_B });
    // every timer is cleared; preparation restarts from the change itself
    assert!(rep.timers.prep_started);
    assert_eq!(r.ctx.timers().prep.start_epoch_ms, Some(T0 + 140_000));
    assert!(!r.ctx.timers().completion.is_running());

    r.feed(40, json!({"printJobTime": 1}));
    assert_eq!(r.ctx.timers().prep.accumulated_ms, 40_000);
    r.feed(60, json!({"printJobTime": 61, "printProgress": 55}));
    let fifty = r
        .sink
        .all()
        .into_iter()
        .filter(|n| n.kind == "printProgressMilestone" && n.payload["milestone"] == 50)
        .count();
    assert_eq!(fifty, 2, "50% fires again for the new job");
    assert!(r.history.records().iter().any(|x| x.job_id == JOB_A));
}

#[test]
fn unfinished_preparation_is_not_carried_into_the_next_job() {
    let mut r = rig();
    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0, "withSelfTest": 0}),
    );
    assert!(r.ctx.timers().prep.is_running());

    let rep = r.feed(30, json!({"printStartTime": JOB_B}));
    assert_eq!(rep.lifecycle, LifecycleEvent::Changed { from: JOB_A, to: JOB_B });
    let t = r.ctx.timers();
    assert_eq!(t.prep.start_epoch_ms, Some(T0 + 30_000));
    assert_eq!(t.prep.accumulated_ms, 0);
    assert_eq!(t.prep.elapsed_secs(r.ctx.now_ms()), 0);
    assert_eq!(r.raw(derived::PREPARATION_TIME), Some(json!(0)));
}

#[test]
fn finished_record_survives_the_next_preparation() {
    let mut r = rig();
    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0, "withSelfTest": 0, "printProgress": 0}),
    );
    r.feed(30, json!({"printJobTime": 2}));
    r.feed(30, json!({"state": 2, "printProgress": 100, "printJobTime": 32}));
    let finished = T0 + 60_000;

    // the next job prepares before its identifier arrives
    let rep = r.feed(60, json!({"state": 1, "printJobTime": 0, "printProgress": 0}));
    assert!(rep.timers.completion_reset);
    let rep = r.feed(10, json!({"printStartTime": JOB_B}));
    assert_eq!(rep.lifecycle, LifecycleEvent::Changed { from: JOB_A, to: JOB_B });

    let records = r.history.records();
    let rec = records.iter().find(|x| x.job_id == JOB_A).expect("history record");
    assert_eq!(rec.finished_at_ms, Some(finished));
    assert_eq!(rec.prep_secs, 30.0);
    assert_eq!(
        r.history.latest_finished().unwrap(),
        Some(FinishedJob {
            job_id: JOB_A,
            finished_at_ms: finished
        })
    );
    assert_eq!(r.ctx.anchors().finished_at_ms, None);
}

#[test]
fn finish_instant_survives_a_restart_before_the_next_job() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let history = MemoryHistory::new();
    let mut r = rig_full(
        MonitorCfg::default(),
        store.clone(),
        clock.clone(),
        history.clone(),
        RecordingSink::new(),
    );
    r.feed(0, json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 5}));
    r.feed(60, json!({"state": 2, "printProgress": 100}));
    drop(r);

    let mut again = rig_full(
        MonitorCfg::default(),
        store,
        clock,
        history.clone(),
        RecordingSink::new(),
    );
    assert_eq!(again.ctx.anchors().finished_at_ms, Some(T0 + 60_000));
    again.feed(30, json!({"state": 1, "printJobTime": 0}));
    again.feed(10, json!({"printStartTime": JOB_B}));

    let records = history.records();
    let rec = records.iter().find(|x| x.job_id == JOB_A).expect("history record");
    assert_eq!(rec.finished_at_ms, Some(T0 + 60_000));
}

#[test]
fn job_change_without_terminal_state_clears_job_scope() {
    let mut r = rig();
    r.feed(
        0,
        json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 100, "printLeftTime": 900, "printProgress": 30}),
    );
    r.feed(10, json!({"state": 5, "printJobTime": 110}));
    assert!(r.ctx.timers().pause.is_running());

    let rep = r.feed(10, json!({"printStartTime": JOB_B, "state": 1, "printJobTime": 4}));
    assert_eq!(rep.lifecycle, LifecycleEvent::Changed { from: JOB_A, to: JOB_B });
    let t = r.ctx.timers();
    assert_eq!(t.pause.accumulated_ms, 0);
    assert!(!t.pause.is_running());
    assert_eq!(r.ctx.anchors().actual_start_ms, Some(T0 + 20_000 - 4_000));
    assert_eq!(r.ctx.tracker().file_name(), None);
}

#[test]
fn same_snapshot_twice_is_idempotent() {
    let mut r = rig();
    let doc = json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 50, "printProgress": 40, "printLeftTime": 600});
    r.feed(0, doc.clone());
    let writes = r.store.write_count();
    let seen = r.sink.all().len();
    let prediction = r.ctx.prediction().copied();

    let rep = r.feed(0, doc);
    assert!(rep.notifications.is_empty());
    assert_eq!(rep.estimate, EstimateOutcome::Unchanged);
    assert_eq!(rep.lifecycle, LifecycleEvent::Unchanged);
    assert_eq!(r.store.write_count(), writes);
    assert_eq!(r.sink.all().len(), seen);
    assert_eq!(r.ctx.prediction().copied(), prediction);
}

#[test]
fn completion_recovered_from_history_after_restart() {
    let history = MemoryHistory::new();
    history.set_latest_finished(Some(FinishedJob {
        job_id: JOB_A,
        finished_at_ms: T0 - 120_000,
    }));
    let mut r = rig_full(
        MonitorCfg::default(),
        MemoryStore::new(),
        ManualClock::new(T0),
        history,
        RecordingSink::new(),
    );
    r.feed(0, json!({"printStartTime": JOB_A, "state": 2, "deviceState": "idle"}));
    assert_eq!(r.ctx.timers().completion.elapsed_secs(r.ctx.now_ms()), 120);
    assert_eq!(r.raw(derived::COMPLETION_TIME), Some(json!(120)));
}

#[test]
fn missing_device_state_means_idle_once_terminal() {
    let mut r = rig();
    r.feed(0, json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 9}));
    let rep = r.feed(10, json!({"state": 4}));
    assert!(rep.timers.completion_started);

    let mut busy = rig();
    busy.feed(0, json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 9, "deviceState": "busy"}));
    let rep = busy.feed(10, json!({"state": 2}));
    assert!(!rep.timers.completion_started);
    let rep = busy.feed(10, json!({"deviceState": "idle"}));
    assert!(rep.timers.completion_started);
}

#[test]
fn provisional_job_reconciles_without_reset() {
    let mut r = rig();
    r.feed(0, json!({"state": 1, "printJobTime": 0}));
    let rep = r.feed(30, json!({"printJobTime": 3}));
    assert_eq!(rep.lifecycle, LifecycleEvent::ProvisionalOpened);
    assert_eq!(r.ctx.timers().prep.accumulated_ms, 30_000);

    let rep = r.feed(10, json!({"printStartTime": JOB_A, "printJobTime": 13, "fileName": "cube.gcode"}));
    assert_eq!(rep.lifecycle, LifecycleEvent::Reconciled { job_id: JOB_A });
    assert_eq!(r.ctx.timers().prep.accumulated_ms, 30_000);
    assert_eq!(r.ctx.tracker().file_name(), Some("cube.gcode"));
    assert!(r.history.records().iter().any(|x| x.job_id == JOB_A));
}

#[test]
fn runout_is_confirmed_after_the_delay() {
    let mut r = rig();
    r.feed(0, json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 10, "materialStatus": 0}));
    r.feed(5, json!({"materialStatus": 1}));
    assert_eq!(r.sink.count("filamentOut"), 1);
    assert!(r.tick(30).is_empty());
    let out = r.tick(31);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, "filamentOutConfirmed");
    assert!(r.tick(120).is_empty());
}

#[test]
fn store_failures_never_stop_processing() {
    let mut r = rig();
    r.store.fail_all(true);
    r.feed(0, json!({"printStartTime": JOB_A, "state": 1, "printJobTime": 0}));
    let rep = r.feed(10, json!({"state": 2, "printProgress": 100}));
    assert!(rep.timers.completion_started);
    assert!(r.sink.kinds().iter().any(|k| k == "printCompleted"));
    assert!(r.store.dump().is_empty());

    r.store.fail_all(false);
    r.ctx.flush();
    assert!(!r.store.dump().is_empty());
}

#[test]
fn device_fault_is_reported_once() {
    let mut r = rig();
    let fault = json!({"errcode": 2, "key": 7, "msg": "nozzle clog"});
    r.feed(0, json!({"err": fault.clone()}));
    r.feed(1, json!({"err": fault}));
    r.feed(1, json!({"err": {"errcode": 0, "key": 0}}));
    assert_eq!(r.sink.count("errorOccurred"), 1);
    assert_eq!(r.sink.count("errorResolved"), 1);
}
