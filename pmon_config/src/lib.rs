#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the print monitor.
//!
//! - `Config` and sub-structs are deserialized from TOML; every section is optional.
//! - `Config::validate` rejects values the aggregator cannot work with.
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceCfg {
    /// Persistence namespace; keys are written as `aggr_{name}_{field}`
    pub name: String,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerCfg {
    /// Fixed tick interval in milliseconds
    pub tick_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MilestoneCfg {
    /// Progress percentages that notify once per job
    pub progress_pct: Vec<u32>,
    /// Remaining-time thresholds in minutes
    pub time_left_min: Vec<u32>,
    /// Temperature-to-target ratios, applied to nozzle and bed separately
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StallCfg {
    /// Progress unchanged for this long while printing raises a stall notice
    pub progress_stall_ms: u64,
}

impl Default for StallCfg {
    fn default() -> Self {
        Self {
            progress_stall_ms: 600_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MaterialCfg {
    /// Delay before a runout that is still present is confirmed
    pub runout_confirm_ms: u64,
    /// Reserve the current spool automatically when a job starts
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

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageCfg {
    /// JSON file backing the key-value store (CLI only)
    pub state_file: Option<String>,
    /// JSON file keeping finished-job records (CLI only)
    pub history_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceCfg,
    pub runner: RunnerCfg,
    pub milestones: MilestoneCfg,
    pub stall: StallCfg,
    pub material: MaterialCfg,
    pub storage: StorageCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if self.device.name.trim().is_empty() {
            eyre::bail!("device.name must not be empty");
        }
        if self.device.name.chars().any(char::is_whitespace) {
            eyre::bail!("device.name must not contain whitespace");
        }

        // Runner
        if self.runner.tick_ms == 0 {
            eyre::bail!("runner.tick_ms must be > 0");
        }

        // Milestones
        for &p in &self.milestones.progress_pct {
            if p == 0 || p >= 100 {
                eyre::bail!("milestones.progress_pct entries must be in 1..=99 (got {p})");
            }
        }
        if self.milestones.time_left_min.contains(&0) {
            eyre::bail!("milestones.time_left_min entries must be > 0");
        }
        for &r in &self.milestones.temp_ratios {
            if !(r.is_finite() && r > 0.0 && r <= 1.5) {
                eyre::bail!("milestones.temp_ratios entries must be in (0, 1.5] (got {r})");
            }
        }

        // Stall / material
        if self.stall.progress_stall_ms == 0 {
            eyre::bail!("stall.progress_stall_ms must be > 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref() {
            let r = rot.to_ascii_lowercase();
            if r != "never" && r != "daily" && r != "hourly" {
                eyre::bail!("logging.rotation must be one of: never, daily, hourly");
            }
        }

        Ok(())
    }
}
