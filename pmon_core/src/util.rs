//! Common time and numeric helpers for pmon_core.

use serde_json::Value;

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: i64 = 1_000;
/// Ticks faster than this are coerced to `FALLBACK_TICK_MS`.
pub const MIN_TICK_MS: u64 = 100;
pub const FALLBACK_TICK_MS: u64 = 500;

/// Safe numeric parse for telemetry values.
///
/// Numbers and numeric strings yield `Some` when finite; everything else
/// (null, bools, objects, garbage text, NaN/inf) is treated as absent.
pub fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Convert fractional seconds to milliseconds, rounding to nearest.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn secs_to_ms(secs: f64) -> i64 {
    (secs * 1_000.0).round() as i64
}

/// `h:mm:ss` rendering used for the display variant of duration fields.
pub fn format_hms(secs: i64) -> String {
    let s = secs.max(0);
    format!("{}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

/// Apply the minimum tick interval.
pub fn effective_tick_ms(requested: u64) -> u64 {
    if requested < MIN_TICK_MS {
        tracing::warn!(
            requested,
            fallback = FALLBACK_TICK_MS,
            "tick interval too small, using fallback"
        );
        FALLBACK_TICK_MS
    } else {
        requested
    }
}
