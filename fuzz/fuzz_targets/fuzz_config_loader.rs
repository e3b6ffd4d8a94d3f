#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = pmon_config::load_toml(data) {
        if cfg.validate().is_ok() {
            let m: pmon_core::MonitorCfg = (&cfg).into();
            let _ = pmon_core::AggregatorContext::builder()
                .with_config(m)
                .with_store(pmon_core::mocks::MemoryStore::new())
                .with_sink(pmon_core::mocks::RecordingSink::new())
                .with_history(pmon_core::mocks::MemoryHistory::new())
                .without_restore()
                .build();
        }
    }
});
