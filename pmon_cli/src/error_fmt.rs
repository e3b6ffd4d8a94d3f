//! Human-readable error descriptions and structured JSON error formatting.

use pmon_core::error::{BuildError, LedgerError, MonitorError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingStore => {
                "What happened: No key-value store was provided to the aggregator.\nLikely causes: The state file could not be opened or was not wired into the builder.\nHow to fix: Check --state-file / storage.state_file and make sure the store is passed via with_store(...).".to_string()
            }
            BuildError::MissingSink => {
                "What happened: No notification sink was provided to the aggregator.\nLikely causes: The output sink was not wired into the builder.\nHow to fix: Pass a sink via with_sink(...).".to_string()
            }
            BuildError::MissingHistory => {
                "What happened: No history store was provided to the aggregator.\nLikely causes: The history file could not be opened or was not wired into the builder.\nHow to fix: Check --history-file / storage.history_file and pass the store via with_history(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `pmon check-config`."
            ),
        };
    }

    if let Some(me) = err.downcast_ref::<MonitorError>() {
        if let MonitorError::Ledger(le) = me {
            return match le {
                LedgerError::NoCurrentSpool => "What happened: No spool is selected.\nLikely causes: No spool was loaded before material was reserved.\nHow to fix: Add a spool (e.g. `--spool-mm 330000`) and select it.".to_string(),
                LedgerError::UnknownSpool(id) => format!("What happened: Spool {id} does not exist.\nLikely causes: The state file was replaced or the id is mistyped.\nHow to fix: Use an id from the replay summary."),
                LedgerError::SpoolDeleted(id) => format!("What happened: Spool {id} was deleted.\nLikely causes: A deleted spool was selected again.\nHow to fix: Select or add another spool."),
                LedgerError::InvalidLength(mm) => format!("What happened: {mm} mm is not a valid length.\nLikely causes: Negative or non-finite value.\nHow to fix: Pass a finite length >= 0."),
            };
        }
        if let MonitorError::Io(msg) = me {
            return format!(
                "What happened: A persistence file could not be opened ({msg}).\nLikely causes: The file is corrupt or was written by something else.\nHow to fix: Move the file aside; a fresh one is created on the next run."
            );
        }
        // Fallback to generic for other domain errors
        return format!(
            "What happened: {me}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("failed to read config") {
        return format!(
            "What happened: The config file could not be read ({msg}).\nLikely causes: Wrong path or missing permissions.\nHow to fix: Pass an existing file with --config, or omit it to use defaults."
        );
    }

    if lower.contains("failed to parse config") {
        return format!(
            "What happened: The config file is not valid TOML for this tool ({msg}).\nLikely causes: A typo, a wrong value type, or a misplaced section.\nHow to fix: Fix the TOML and run `pmon check-config`."
        );
    }

    if lower.contains("must be") || lower.contains("must not") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: An out-of-range value.\nHow to fix: Edit the TOML config and run `pmon check-config`."
        );
    }

    if lower.contains("failed to read input") {
        return format!(
            "What happened: The snapshot file could not be read ({msg}).\nLikely causes: Wrong path or missing permissions.\nHow to fix: Pass an existing JSON-lines file with --input."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 for configuration problems, 3 for I/O, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if matches!(err.downcast_ref::<BuildError>(), Some(BuildError::InvalidConfig(_))) {
        return 2;
    }
    if matches!(err.downcast_ref::<MonitorError>(), Some(MonitorError::Io(_))) {
        return 3;
    }
    let lower = err.to_string().to_ascii_lowercase();
    if lower.contains("config") || lower.contains("must be") || lower.contains("must not") {
        return 2;
    }
    if lower.contains("failed to read input") {
        return 3;
    }
    1
}

/// Stable reason name used in JSON error output.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    match exit_code_for_error(err) {
        2 => "Config",
        3 => "Io",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}
