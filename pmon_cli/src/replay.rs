//! Replay recorded status snapshots through one aggregation context.
//!
//! Input is JSON lines. A line is either a bare snapshot object or an
//! envelope `{"at_ms": <epoch ms>, "data": {...}}` carrying its own timestamp.
//! Frames without a timestamp are spaced `step_secs` apart; fixed-interval
//! ticks are run for the gaps in between.

use crate::store::{FileHistory, FileStore};
use eyre::WrapErr;
use pmon_core::mocks::{MemoryHistory, MemoryStore};
use pmon_core::util::effective_tick_ms;
use pmon_core::{AggregatorContext, MonitorCfg, MonitorError, NewSpool, RunnerCfg, Snapshot};
use pmon_traits::{
    BoxError, Clock, HistoryStore, KeyValueStore, ManualClock, Notification, NotificationSink,
    SystemClock,
};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Upper bound on synthetic ticks for one gap between frames.
const MAX_TICKS_PER_GAP: u64 = 10_000;

pub struct ReplayOpts {
    pub input: PathBuf,
    pub state_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub step_secs: u64,
    pub spool_length_mm: Option<f64>,
    pub show_fields: bool,
    pub json: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub frames: usize,
    pub skipped: usize,
    pub ticks: u64,
    pub notifications: usize,
    pub interrupted: bool,
}

// ── output sink ──────────────────────────────────────────────────────────────

/// Prints every notification to stdout as it is raised.
struct PrintSink {
    json: bool,
    count: Arc<AtomicUsize>,
}

impl NotificationSink for PrintSink {
    fn notify(&mut self, n: Notification) -> Result<(), BoxError> {
        self.count.fetch_add(1, Ordering::Relaxed);
        if self.json {
            println!("{}", json!({ "event": n.kind, "payload": n.payload }));
        } else {
            println!("[{}] {}", n.kind, n.payload);
        }
        Ok(())
    }
}

// ── frame parsing ────────────────────────────────────────────────────────────

/// One input line: the snapshot and its optional timestamp.
pub fn parse_frame(line: &str) -> Option<(Option<i64>, Snapshot)> {
    let v: Value = serde_json::from_str(line).ok()?;
    let obj = v.as_object()?;
    let is_envelope = obj.contains_key("data")
        && obj.keys().all(|k| k == "data" || k == "at_ms")
        && obj.get("data").is_some_and(Value::is_object);
    if is_envelope {
        let at_ms = obj.get("at_ms").and_then(Value::as_i64);
        let snap = Snapshot::from_value(obj.get("data")?.clone())?;
        Some((at_ms, snap))
    } else {
        Some((None, Snapshot::from_value(v)?))
    }
}

// ── replay loop ──────────────────────────────────────────────────────────────

pub fn run_replay(
    cfg: MonitorCfg,
    runner: RunnerCfg,
    opts: &ReplayOpts,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<ReplayStats> {
    let text = fs::read_to_string(&opts.input)
        .wrap_err_with(|| format!("failed to read input {}", opts.input.display()))?;

    let store: Box<dyn KeyValueStore + Send> = match &opts.state_file {
        Some(p) => Box::new(
            FileStore::open(p)
                .map_err(|e| MonitorError::Io(format!("open state file {}: {e}", p.display())))?,
        ),
        None => Box::new(MemoryStore::new()),
    };
    let memory_history = MemoryHistory::new();
    let history: Box<dyn HistoryStore + Send> = match &opts.history_file {
        Some(p) => Box::new(
            FileHistory::open(p)
                .map_err(|e| MonitorError::Io(format!("open history file {}: {e}", p.display())))?,
        ),
        None => Box::new(memory_history.clone()),
    };
    let count = Arc::new(AtomicUsize::new(0));
    let sink = PrintSink {
        json: opts.json,
        count: Arc::clone(&count),
    };

    let frames: Vec<(usize, Option<(Option<i64>, Snapshot)>)> = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (i + 1, parse_frame(l)))
        .collect();

    // Replay time starts at the first frame's timestamp, else the wall clock.
    let start_ms = frames
        .iter()
        .find_map(|(_, f)| f.as_ref())
        .and_then(|(at, _)| *at)
        .unwrap_or_else(|| SystemClock::new().now_ms());
    let clock = ManualClock::new(start_ms);
    let mut ctx = AggregatorContext::builder()
        .with_config(cfg)
        .with_clock(clock.clone())
        .with_store(store)
        .with_sink(sink)
        .with_history(history)
        .try_build()?;

    if let Some(len) = opts.spool_length_mm
        && ctx.ledger().current_spool().is_none()
    {
        let id = ctx.add_spool(NewSpool {
            name: "replay".into(),
            material: "PLA".into(),
            total_length_mm: len,
            ..Default::default()
        })?;
        ctx.set_current_spool(&id)?;
        tracing::info!(spool = %id, length_mm = len, "spool added");
    }

    let step_ms = i64::try_from(opts.step_secs.saturating_mul(1_000)).unwrap_or(i64::MAX);
    let tick_ms = i64::try_from(effective_tick_ms(runner.tick_ms)).unwrap_or(i64::MAX);
    let mut stats = ReplayStats::default();
    let mut first = true;

    for (line, frame) in frames {
        if shutdown.load(Ordering::Relaxed) {
            stats.interrupted = true;
            tracing::warn!(line, "replay interrupted");
            break;
        }
        let Some((at_ms, snap)) = frame else {
            stats.skipped += 1;
            tracing::warn!(line, "skipping malformed frame");
            continue;
        };

        let now = clock.now_ms();
        let target = match at_ms {
            Some(t) => t.max(now),
            None if first => now,
            None => now.saturating_add(step_ms),
        };
        first = false;

        // Fixed-interval ticks across the gap, then land on the frame time.
        let mut t = now;
        let mut n = 0;
        while target - t > tick_ms && n < MAX_TICKS_PER_GAP {
            t += tick_ms;
            clock.set_ms(t);
            ctx.apply_tick();
            n += 1;
        }
        stats.ticks += n;
        clock.set_ms(target);

        let report = ctx.apply_snapshot(&snap);
        tracing::debug!(
            line,
            lifecycle = ?report.lifecycle,
            estimate = ?report.estimate,
            "frame applied"
        );
        stats.frames += 1;
    }

    ctx.flush();
    stats.notifications = count.load(Ordering::Relaxed);

    let records = match &opts.history_file {
        Some(p) => FileHistory::open(p)
            .map(|h| h.records().len())
            .unwrap_or_default(),
        None => memory_history.records().len(),
    };
    print_summary(&ctx, &stats, records, opts.json);
    if opts.show_fields {
        print_fields(&ctx, opts.json);
    }
    Ok(stats)
}

fn summary_value(ctx: &AggregatorContext, stats: &ReplayStats, records: usize) -> Value {
    let now = ctx.now_ms();
    let t = ctx.timers();
    json!({
        "frames": stats.frames,
        "skipped": stats.skipped,
        "ticks": stats.ticks,
        "notifications": stats.notifications,
        "interrupted": stats.interrupted,
        "jobId": ctx.tracker().tracked(),
        "fileName": ctx.tracker().file_name(),
        "state": ctx.last_state().map(|s| s.as_str()),
        "prepSecs": t.prep.elapsed_secs(now),
        "checkSecs": t.check.elapsed_secs(now),
        "pauseSecs": t.pause.elapsed_secs(now),
        "prediction": ctx.prediction(),
        "spool": ctx.ledger().current_spool(),
        "historyRecords": records,
    })
}

fn print_summary(ctx: &AggregatorContext, stats: &ReplayStats, records: usize, json: bool) {
    let v = summary_value(ctx, stats, records);
    if json {
        println!("{}", json!({ "event": "summary", "payload": v }));
        return;
    }
    println!(
        "replay complete: {} frames ({} skipped), {} notifications",
        stats.frames, stats.skipped, stats.notifications
    );
    if let Some(job) = ctx.tracker().tracked() {
        let state = ctx.last_state().map_or("unknown", |s| s.as_str());
        println!("job {job}: {state}");
    }
    println!(
        "prep {}s, check {}s, pause {}s",
        v["prepSecs"], v["checkSecs"], v["pauseSecs"]
    );
    if let Some(p) = ctx.prediction() {
        println!(
            "predicted finish {} ms ({:?}), {} ms remaining",
            p.finish_epoch_ms,
            p.basis,
            p.remaining_at(ctx.now_ms())
        );
    }
    if let Some(s) = ctx.ledger().current_spool() {
        println!(
            "spool {} ({}): {:.1} of {:.1} mm left",
            s.name, s.material, s.remaining_length_mm, s.total_length_mm
        );
    }
    println!("history records: {records}");
}

fn print_fields(ctx: &AggregatorContext, json: bool) {
    let mut out = serde_json::Map::new();
    for key in pmon_core::snapshot::derived::ALL {
        if let Some(v) = ctx.fields().raw(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if json {
        println!("{}", json!({ "event": "fields", "payload": out }));
    } else {
        for (k, v) in out {
            println!("{k} = {v}");
        }
    }
}
