//! Shared rig for integration tests: manual clock plus in-memory collaborators.
#![allow(dead_code)]

use pmon_core::mocks::{MemoryHistory, MemoryStore, RecordingSink};
use pmon_core::{AggregatorContext, IngestReport, MonitorCfg, Snapshot};
use pmon_traits::ManualClock;
use serde_json::Value;
use std::time::Duration;

pub const T0: i64 = 1_700_000_000_000;

pub struct Rig {
    pub ctx: AggregatorContext,
    pub clock: ManualClock,
    pub store: MemoryStore,
    pub sink: RecordingSink,
    pub history: MemoryHistory,
}

pub fn snap(v: Value) -> Snapshot {
    Snapshot::from_value(v).expect("snapshot must be an object")
}

pub fn rig() -> Rig {
    rig_with(MonitorCfg::default(), MemoryStore::new(), ManualClock::new(T0))
}

/// Build a context over `store`; persisted state in it is restored.
pub fn rig_with(cfg: MonitorCfg, store: MemoryStore, clock: ManualClock) -> Rig {
    let sink = RecordingSink::new();
    let history = MemoryHistory::new();
    rig_full(cfg, store, clock, history, sink)
}

pub fn rig_full(
    cfg: MonitorCfg,
    store: MemoryStore,
    clock: ManualClock,
    history: MemoryHistory,
    sink: RecordingSink,
) -> Rig {
    let ctx = AggregatorContext::builder()
        .with_config(cfg)
        .with_clock(clock.clone())
        .with_store(store.clone())
        .with_sink(sink.clone())
        .with_history(history.clone())
        .build()
        .expect("valid rig");
    Rig {
        ctx,
        clock,
        store,
        sink,
        history,
    }
}

impl Rig {
    /// Advance the clock by `secs`, then ingest `v`.
    pub fn feed(&mut self, secs: u64, v: Value) -> IngestReport {
        self.clock.advance(Duration::from_secs(secs));
        self.ctx.apply_snapshot(&snap(v))
    }

    pub fn tick(&mut self, secs: u64) -> Vec<pmon_traits::Notification> {
        self.clock.advance(Duration::from_secs(secs));
        self.ctx.apply_tick()
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.ctx.fields().raw(key).cloned()
    }
}
