#![no_main]
use libfuzzer_sys::fuzz_target;
use pmon_core::mocks::{MemoryHistory, MemoryStore, RecordingSink};
use pmon_core::{AggregatorContext, Snapshot};
use pmon_traits::ManualClock;
use std::time::Duration;

// Each line is one snapshot; arbitrary field values must never panic the aggregator,
// and state written to the store must restore cleanly into a second context.
fuzz_target!(|data: &str| {
    let clock = ManualClock::new(1_700_000_000_000);
    let store = MemoryStore::new();
    let Ok(mut ctx) = AggregatorContext::builder()
        .with_clock(clock.clone())
        .with_store(store.clone())
        .with_sink(RecordingSink::new())
        .with_history(MemoryHistory::new())
        .without_restore()
        .build()
    else {
        return;
    };

    for line in data.lines().take(256) {
        let Ok(v) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        clock.advance(Duration::from_secs(7));
        match Snapshot::from_value(v) {
            Some(s) => {
                ctx.apply_snapshot(&s);
            }
            None => {
                ctx.apply_tick();
            }
        }
    }
    ctx.flush();

    let _ = AggregatorContext::builder()
        .with_clock(clock)
        .with_store(store)
        .with_sink(RecordingSink::new())
        .with_history(MemoryHistory::new())
        .build();
});
