//! `From` implementations bridging `pmon_config` types to `pmon_core` types.

use crate::config::{MaterialCfg, MilestoneCfg, MonitorCfg, RunnerCfg, StallCfg};

// ── MilestoneCfg ─────────────────────────────────────────────────────────────

impl From<&pmon_config::MilestoneCfg> for MilestoneCfg {
    fn from(c: &pmon_config::MilestoneCfg) -> Self {
        Self {
            progress_pct: c.progress_pct.clone(),
            time_left_min: c.time_left_min.clone(),
            temp_ratios: c.temp_ratios.clone(),
        }
    }
}

// ── StallCfg ─────────────────────────────────────────────────────────────────

impl From<&pmon_config::StallCfg> for StallCfg {
    fn from(c: &pmon_config::StallCfg) -> Self {
        Self {
            progress_stall_ms: c.progress_stall_ms,
        }
    }
}

// ── MaterialCfg ──────────────────────────────────────────────────────────────

impl From<&pmon_config::MaterialCfg> for MaterialCfg {
    fn from(c: &pmon_config::MaterialCfg) -> Self {
        Self {
            runout_confirm_ms: c.runout_confirm_ms,
            auto_reserve: c.auto_reserve,
        }
    }
}

// ── RunnerCfg ────────────────────────────────────────────────────────────────

impl From<&pmon_config::RunnerCfg> for RunnerCfg {
    fn from(c: &pmon_config::RunnerCfg) -> Self {
        Self { tick_ms: c.tick_ms }
    }
}

// ── MonitorCfg ───────────────────────────────────────────────────────────────

impl From<&pmon_config::Config> for MonitorCfg {
    fn from(c: &pmon_config::Config) -> Self {
        Self {
            device: c.device.name.clone(),
            milestones: (&c.milestones).into(),
            stall: (&c.stall).into(),
            material: (&c.material).into(),
        }
    }
}
