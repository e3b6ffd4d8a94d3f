//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pmon", version, about = "Print telemetry monitor")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit notifications, summary and errors as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed recorded status snapshots (JSON lines) through the aggregator
    Replay {
        /// Input file, one snapshot per line
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// JSON file persisting aggregator state between runs (overrides storage.state_file)
        #[arg(long, value_name = "FILE")]
        state_file: Option<PathBuf>,
        /// JSON file keeping finished-job records (overrides storage.history_file)
        #[arg(long, value_name = "FILE")]
        history_file: Option<PathBuf>,
        /// Device name; namespaces persisted keys (overrides device.name)
        #[arg(long, value_name = "NAME")]
        device: Option<String>,
        /// Seconds between frames without an explicit timestamp
        #[arg(long, value_name = "SECS", default_value_t = 1)]
        step_secs: u64,
        /// Load a fresh spool of this length (mm) when none is current
        #[arg(long = "spool-mm", value_name = "MM")]
        spool_mm: Option<f64>,
        /// Print the derived fields after the last frame
        #[arg(long, action = ArgAction::SetTrue)]
        fields: bool,
    },
    /// Parse and validate the config, then exit
    CheckConfig,
}
