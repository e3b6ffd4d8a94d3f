//! Type-state builder for `AggregatorContext`.
//!
//! The store, sink and history collaborators must be provided before
//! `build()` is available; `try_build()` checks the same at runtime.

use std::marker::PhantomData;

use pmon_traits::{Clock, HistoryStore, KeyValueStore, NotificationSink, SystemClock};

use crate::config::MonitorCfg;
use crate::context::AggregatorContext;
use crate::error::{BuildError, Result};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `AggregatorContext`. Configuration is validated on `build()`.
pub struct MonitorBuilder<S, N, H> {
    cfg: Option<MonitorCfg>,
    clock: Option<Box<dyn Clock + Send>>,
    store: Option<Box<dyn KeyValueStore + Send>>,
    sink: Option<Box<dyn NotificationSink + Send>>,
    history: Option<Box<dyn HistoryStore + Send>>,
    restore: bool,
    _s: PhantomData<S>,
    _n: PhantomData<N>,
    _h: PhantomData<H>,
}

impl Default for MonitorBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            cfg: None,
            clock: None,
            store: None,
            sink: None,
            history: None,
            restore: true,
            _s: PhantomData,
            _n: PhantomData,
            _h: PhantomData,
        }
    }
}

impl AggregatorContext {
    /// Start building a context.
    pub fn builder() -> MonitorBuilder<Missing, Missing, Missing> {
        MonitorBuilder::default()
    }
}

fn validate(cfg: &MonitorCfg) -> std::result::Result<(), BuildError> {
    if cfg.device.trim().is_empty() {
        return Err(BuildError::InvalidConfig("device name must not be empty"));
    }
    if cfg.milestones.progress_pct.iter().any(|p| !(1..=99).contains(p)) {
        return Err(BuildError::InvalidConfig(
            "progress milestones must be in 1..=99",
        ));
    }
    if cfg.milestones.time_left_min.contains(&0) {
        return Err(BuildError::InvalidConfig(
            "time-left milestones must be > 0",
        ));
    }
    if cfg
        .milestones
        .temp_ratios
        .iter()
        .any(|r| !r.is_finite() || *r <= 0.0 || *r > 1.5)
    {
        return Err(BuildError::InvalidConfig(
            "temperature ratios must be in (0, 1.5]",
        ));
    }
    if cfg.stall.progress_stall_ms == 0 {
        return Err(BuildError::InvalidConfig("stall window must be > 0"));
    }
    Ok(())
}

impl<S, N, H> MonitorBuilder<S, N, H> {
    /// Fallible build available in any type-state; reports the first missing collaborator.
    pub fn try_build(self) -> Result<AggregatorContext> {
        let store = self
            .store
            .ok_or_else(|| eyre::Report::new(BuildError::MissingStore))?;
        let sink = self
            .sink
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSink))?;
        let history = self
            .history
            .ok_or_else(|| eyre::Report::new(BuildError::MissingHistory))?;
        let cfg = self.cfg.unwrap_or_default();
        validate(&cfg).map_err(eyre::Report::new)?;
        let clock = self
            .clock
            .unwrap_or_else(|| Box::new(SystemClock) as Box<dyn Clock + Send>);

        let mut ctx = AggregatorContext::new(cfg, clock, store, sink, history);
        if self.restore {
            ctx.restore();
        }
        Ok(ctx)
    }

    pub fn with_config(mut self, cfg: MonitorCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Defaults to the wall clock when not provided.
    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Skip loading persisted state on build (fresh start).
    pub fn without_restore(mut self) -> Self {
        self.restore = false;
        self
    }

    fn retype<S2, N2, H2>(self) -> MonitorBuilder<S2, N2, H2> {
        MonitorBuilder {
            cfg: self.cfg,
            clock: self.clock,
            store: self.store,
            sink: self.sink,
            history: self.history,
            restore: self.restore,
            _s: PhantomData,
            _n: PhantomData,
            _h: PhantomData,
        }
    }
}

// Setters that advance type-state
impl<N, H> MonitorBuilder<Missing, N, H> {
    pub fn with_store(mut self, store: impl KeyValueStore + Send + 'static) -> MonitorBuilder<Set, N, H> {
        self.store = Some(Box::new(store));
        self.retype()
    }
}

impl<S, H> MonitorBuilder<S, Missing, H> {
    pub fn with_sink(
        mut self,
        sink: impl NotificationSink + Send + 'static,
    ) -> MonitorBuilder<S, Set, H> {
        self.sink = Some(Box::new(sink));
        self.retype()
    }
}

impl<S, N> MonitorBuilder<S, N, Missing> {
    pub fn with_history(
        mut self,
        history: impl HistoryStore + Send + 'static,
    ) -> MonitorBuilder<S, N, Set> {
        self.history = Some(Box::new(history));
        self.retype()
    }
}

impl MonitorBuilder<Set, Set, Set> {
    /// Validate and build. Only available once every collaborator is set.
    pub fn build(self) -> Result<AggregatorContext> {
        self.try_build()
    }
}
