//! Configuration types for the aggregator.
//!
//! These are the runtime configuration structs used by `AggregatorContext`.
//! They are separate from the TOML-deserialized config in `pmon_config`.

/// Threshold sets for the one-shot notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneCfg {
    /// Progress percentages, each fired once per job when crossed upward.
    pub progress_pct: Vec<u32>,
    /// Remaining-time thresholds in minutes, fired once when crossed downward.
    pub time_left_min: Vec<u32>,
    /// Current/target temperature ratios, fired once per heat zone.
    pub temp_ratios: Vec<f64>,
}

impl Default for MilestoneCfg {
    fn default() -> Self {
        Self {
            progress_pct: vec![50, 80, 90, 95, 98],
            time_left_min: vec![10, 5, 3, 1],
            temp_ratios: vec![0.8, 0.9, 0.95, 0.98, 1.0],
        }
    }
}

/// Stalled-progress detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallCfg {
    /// Unchanged progress for at least this long raises a stall notice.
    pub progress_stall_ms: u64,
}

impl Default for StallCfg {
    fn default() -> Self {
        Self {
            progress_stall_ms: 600_000,
        }
    }
}

/// Material presence and ledger automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialCfg {
    /// A runout still present after this delay is confirmed with a second notice.
    pub runout_confirm_ms: u64,
    /// Reserve the current spool when a job is observed printing.
    pub auto_reserve: bool,
}

impl Default for MaterialCfg {
    fn default() -> Self {
        Self {
            runout_confirm_ms: 60_000,
            auto_reserve: true,
        }
    }
}

/// Scheduling of the single-consumer runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerCfg {
    pub tick_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self { tick_ms: 1_000 }
    }
}

/// Everything an `AggregatorContext` needs besides its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorCfg {
    /// Device name; namespaces persisted keys.
    pub device: String,
    pub milestones: MilestoneCfg,
    pub stall: StallCfg,
    pub material: MaterialCfg,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            milestones: MilestoneCfg::default(),
            stall: StallCfg::default(),
            material: MaterialCfg::default(),
        }
    }
}
