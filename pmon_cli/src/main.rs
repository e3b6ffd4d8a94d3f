#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod replay;
mod store;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::{Result, WrapErr};
use replay::ReplayOpts;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    color_eyre::install()?;

    let mut cfg = load_config(cli.config.as_deref())?;
    init_tracing(&cli, &cfg.logging)?;
    cfg.validate()?;

    match cli.cmd {
        Commands::CheckConfig => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "event": "config", "payload": { "ok": true, "device": cfg.device.name } })
                );
            } else {
                println!("config OK (device {})", cfg.device.name);
            }
            Ok(())
        }
        Commands::Replay {
            input,
            state_file,
            history_file,
            device,
            step_secs,
            spool_mm,
            fields,
        } => {
            if let Some(name) = device {
                cfg.device.name = name;
                cfg.validate()?;
            }
            let opts = ReplayOpts {
                input,
                state_file: state_file.or_else(|| cfg.storage.state_file.as_ref().map(Into::into)),
                history_file: history_file
                    .or_else(|| cfg.storage.history_file.as_ref().map(Into::into)),
                step_secs,
                spool_length_mm: spool_mm,
                show_fields: fields,
                json: cli.json,
            };

            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = Arc::clone(&shutdown);
                if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
                    tracing::warn!(error = %e, "could not install Ctrl-C handler");
                }
            }

            let monitor: pmon_core::MonitorCfg = (&cfg).into();
            let runner: pmon_core::RunnerCfg = (&cfg.runner).into();
            tracing::info!(device = %monitor.device, input = %opts.input.display(), "replay starting");
            let stats = replay::run_replay(monitor, runner, &opts, &shutdown)?;
            tracing::info!(
                frames = stats.frames,
                skipped = stats.skipped,
                notifications = stats.notifications,
                "replay finished"
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<pmon_config::Config> {
    let Some(path) = path else {
        return Ok(pmon_config::Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    pmon_config::load_toml(&text)
        .wrap_err_with(|| format!("failed to parse config {}", path.display()))
}

/// Console layer on stderr (JSON with --json), plus an optional JSON file layer.
///
/// `RUST_LOG` wins over `--log-level`, which wins over `logging.level`.
fn init_tracing(cli: &Cli, logging: &pmon_config::Logging) -> Result<()> {
    let level = if cli.log_level == "warn" {
        logging.level.as_deref().unwrap_or("warn")
    } else {
        cli.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_json = cli
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_text = (!cli.json).then(|| fmt::layer().with_writer(std::io::stderr));

    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file must name a file (got {file})"))?;
            let rotation = match logging.rotation.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                _ => Rotation::NEVER,
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(name.to_string_lossy())
                .build(dir)
                .wrap_err_with(|| format!("failed to open log file {file}"))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()
        .wrap_err("failed to initialize logging")?;
    Ok(())
}
