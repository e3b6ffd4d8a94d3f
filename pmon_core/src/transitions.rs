//! Job-state transition notices and device fault pass-through.

use crate::snapshot::JobState;
use crate::util::as_number;
use pmon_traits::Notification;
use serde_json::{json, Value};
use std::collections::VecDeque;

const HISTORY_LEN: usize = 4;

use crate::snapshot::JobState::{Done, Failed, Idle, Paused, Started};

/// Multi-step patterns, matched against the tail of the history before direct transitions.
const PATTERNS: [(&[JobState], &str); 3] = [
    (&[Started, Paused, Idle, Started], "printStarted"),
    (&[Started, Paused, Failed], "printFailed"),
    (&[Started, Paused, Started], "printResumed"),
];

fn pattern_label(states: &[JobState]) -> String {
    states
        .iter()
        .map(|s| s.code().to_string())
        .collect::<Vec<_>>()
        .join(">")
}

#[derive(Debug, Clone, Default)]
pub struct TransitionTracker {
    history: VecDeque<JobState>,
    last_fault: Option<(i64, i64)>,
}

impl TransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> impl Iterator<Item = &JobState> {
        self.history.iter()
    }

    /// Record `to` and describe the transition from `from`, if it is one worth announcing.
    /// The first-layer check state is not part of the lifecycle history.
    pub fn observe_state(&mut self, from: Option<JobState>, to: JobState) -> Option<Notification> {
        if to == JobState::Check || self.history.back() == Some(&to) {
            return None;
        }
        self.history.push_back(to);
        while self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }

        let seq: Vec<JobState> = self.history.iter().copied().collect();
        for (pattern, kind) in PATTERNS {
            if seq.ends_with(pattern) {
                self.history.clear();
                return Some(Notification::new(
                    kind,
                    json!({
                        "from": from.map(JobState::as_str),
                        "to": to.as_str(),
                        "pattern": pattern_label(pattern),
                    }),
                ));
            }
        }

        let kind = match (from, to) {
            (Some(Idle | Done | Failed) | None, Started) => "printStarted",
            (Some(Paused), Started) => "printResumed",
            (_, Paused) => "printPaused",
            (_, Done) => "printCompleted",
            (_, Failed) => "printFailed",
            (Some(Started | Paused | JobState::Check), Idle) => "printStopped",
            _ => return None,
        };
        Some(Notification::new(
            kind,
            json!({
                "from": from.map(JobState::as_str),
                "to": to.as_str(),
            }),
        ))
    }

    /// Device-reported fault object `{errcode, key}`; only changes are announced.
    #[allow(clippy::cast_possible_truncation)]
    pub fn observe_fault(&mut self, err: &Value) -> Option<Notification> {
        let code = err.get("errcode").and_then(as_number)? as i64;
        let key = err.get("key").and_then(as_number).unwrap_or(0.0) as i64;
        let prev = self.last_fault.replace((code, key));
        if prev == Some((code, key)) {
            return None;
        }
        if code == 0 && key == 0 {
            return match prev {
                Some(_) => Some(Notification::new("errorResolved", json!({}))),
                None => None,
            };
        }
        tracing::info!(error_code = code, error_key = key, "device fault reported");
        Some(Notification::new(
            "errorOccurred",
            json!({
                "error_code": code,
                "error_key": key,
                "error_msg": err.get("msg").cloned().unwrap_or(Value::Null),
            }),
        ))
    }
}
