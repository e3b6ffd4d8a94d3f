//! One-shot threshold notifications.
//!
//! A milestone fires when its condition *becomes* true between two
//! observations, never merely because it is true. The first observation of a
//! signal only records a baseline, so a monitor attached mid-job (or restored
//! after a restart) does not replay milestones already passed.

use crate::config::{MaterialCfg, MilestoneCfg, StallCfg};
use crate::util::{format_hms, MILLIS_PER_SEC};
use pmon_traits::Notification;
use serde_json::json;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Nozzle,
    Bed,
}

impl Zone {
    fn label(self) -> &'static str {
        match self {
            Self::Nozzle => "Nozzle",
            Self::Bed => "Bed",
        }
    }

    fn from_label(s: &str) -> Option<Self> {
        match s {
            "Nozzle" => Some(Self::Nozzle),
            "Bed" => Some(Self::Bed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MilestoneKey {
    Progress(u32),
    TimeLeft(u32),
    /// Zone and ratio in percent.
    Temp(Zone, u32),
    Complete,
}

impl MilestoneKey {
    /// Stable textual id, used when the fired set is persisted.
    pub fn id(self) -> String {
        match self {
            Self::Progress(p) => format!("progress:{p}"),
            Self::TimeLeft(m) => format!("timeLeft:{m}"),
            Self::Temp(z, pct) => format!("temp{}:{pct}", z.label()),
            Self::Complete => "complete".to_string(),
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        if id == "complete" {
            return Some(Self::Complete);
        }
        let (head, n) = id.split_once(':')?;
        let n: u32 = n.parse().ok()?;
        match head {
            "progress" => Some(Self::Progress(n)),
            "timeLeft" => Some(Self::TimeLeft(n)),
            _ => Zone::from_label(head.strip_prefix("temp")?).map(|z| Self::Temp(z, n)),
        }
    }
}

/// Which job the fired sets currently belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Previous job finished; the next job start must clear.
    Stale,
    /// Cleared because preparation started, identifier not known yet.
    Pending,
    Job(i64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MilestoneInputs {
    pub now_ms: i64,
    pub progress: Option<f64>,
    pub remaining_secs: Option<f64>,
    pub nozzle: Option<f64>,
    pub nozzle_max: Option<f64>,
    pub bed: Option<f64>,
    pub bed_max: Option<f64>,
    pub material_status: Option<u8>,
    /// Printing with progress strictly between 0 and 100.
    pub mid_job: bool,
}

#[derive(Debug, Clone)]
pub struct MilestoneNotifier {
    cfg: MilestoneCfg,
    stall: StallCfg,
    material: MaterialCfg,
    fired: HashSet<MilestoneKey>,
    scope: Scope,
    prev_progress: Option<f64>,
    prev_remaining: Option<f64>,
    prev_nozzle_ratio: Option<f64>,
    prev_bed_ratio: Option<f64>,
    prev_material: Option<u8>,
    progress_baseline_ms: Option<i64>,
    runout_at_ms: Option<i64>,
}

impl MilestoneNotifier {
    pub fn new(cfg: MilestoneCfg, stall: StallCfg, material: MaterialCfg) -> Self {
        Self {
            cfg,
            stall,
            material,
            fired: HashSet::new(),
            scope: Scope::Stale,
            prev_progress: None,
            prev_remaining: None,
            prev_nozzle_ratio: None,
            prev_bed_ratio: None,
            prev_material: None,
            progress_baseline_ms: None,
            runout_at_ms: None,
        }
    }

    pub fn fired(&self) -> &HashSet<MilestoneKey> {
        &self.fired
    }

    pub fn has_fired(&self, key: MilestoneKey) -> bool {
        self.fired.contains(&key)
    }

    /// Fired keys as sorted ids.
    pub fn fired_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.fired.iter().map(|k| k.id()).collect();
        ids.sort();
        ids
    }

    /// Re-arm the fired set after a restart; unknown ids are skipped.
    pub fn restore_fired(&mut self, ids: &[String]) {
        self.fired = ids.iter().filter_map(|id| MilestoneKey::from_id(id)).collect();
    }

    pub fn runout_pending(&self) -> bool {
        self.runout_at_ms.is_some()
    }

    fn clear(&mut self) {
        self.fired.clear();
        self.progress_baseline_ms = None;
        tracing::debug!("milestone sets cleared");
    }

    /// A job identifier was observed (opened, changed or reconciled).
    /// Returns true if the fired sets were cleared.
    pub fn on_job_identified(&mut self, job_id: i64) -> bool {
        match self.scope {
            Scope::Job(id) if id == job_id => false,
            Scope::Pending => {
                self.scope = Scope::Job(job_id);
                false
            }
            _ => {
                self.clear();
                self.scope = Scope::Job(job_id);
                true
            }
        }
    }

    /// Preparation time started advancing. Clears only if the current job has not been cleared yet.
    pub fn on_prep_started(&mut self) -> bool {
        if self.scope == Scope::Stale {
            self.clear();
            self.scope = Scope::Pending;
            true
        } else {
            false
        }
    }

    /// The job reached a terminal state; whatever starts next is a new job.
    pub fn on_job_finished(&mut self) {
        self.scope = Scope::Stale;
    }

    /// Keep the scope bound to a restored job so reconnecting does not clear.
    pub fn bind_restored(&mut self, job_id: Option<i64>) {
        if let Some(id) = job_id {
            self.scope = Scope::Job(id);
        }
    }

    fn fire(&mut self, key: MilestoneKey, n: Notification, out: &mut Vec<Notification>) {
        if self.fired.insert(key) {
            tracing::debug!(kind = %n.kind, "milestone fired");
            out.push(n);
        }
    }

    pub fn observe(&mut self, inp: &MilestoneInputs) -> Vec<Notification> {
        let mut out = Vec::new();
        self.observe_progress(inp, &mut out);
        self.observe_time_left(inp, &mut out);
        self.observe_temp(Zone::Nozzle, inp.nozzle, inp.nozzle_max, &mut out);
        self.observe_temp(Zone::Bed, inp.bed, inp.bed_max, &mut out);
        self.observe_material(inp, &mut out);
        self.check_stall(inp.now_ms, inp.progress, inp.mid_job, &mut out);
        out
    }

    /// Time-only checks run on every tick: stall and delayed runout confirmation.
    pub fn tick(&mut self, now_ms: i64, mid_job: bool) -> Vec<Notification> {
        let mut out = Vec::new();
        let progress = self.prev_progress;
        self.check_stall(now_ms, progress, mid_job, &mut out);
        if let Some(at) = self.runout_at_ms {
            let confirm = i64::try_from(self.material.runout_confirm_ms).unwrap_or(i64::MAX);
            if now_ms.saturating_sub(at) >= confirm {
                self.runout_at_ms = None;
                if self.prev_material == Some(1) {
                    out.push(Notification::new(
                        "filamentOutConfirmed",
                        json!({ "sinceMs": at }),
                    ));
                }
            }
        }
        out
    }

    fn observe_progress(&mut self, inp: &MilestoneInputs, out: &mut Vec<Notification>) {
        let Some(cur) = inp.progress else {
            return;
        };
        let Some(prev) = self.prev_progress else {
            self.prev_progress = Some(cur);
            self.progress_baseline_ms = Some(inp.now_ms);
            return;
        };
        if cur != prev {
            out.push(Notification::new(
                "printProgressUpdated",
                json!({ "previous": prev, "current": cur }),
            ));
            self.progress_baseline_ms = Some(inp.now_ms);
        }
        let thresholds = self.cfg.progress_pct.clone();
        for ms in thresholds {
            let m = f64::from(ms);
            if prev < m && cur >= m {
                self.fire(
                    MilestoneKey::Progress(ms),
                    Notification::new("printProgressMilestone", json!({ "milestone": ms })),
                    out,
                );
            }
        }
        if prev < 100.0 && cur >= 100.0 {
            self.fire(
                MilestoneKey::Complete,
                Notification::new("printProgressComplete", json!({})),
                out,
            );
        }
        self.prev_progress = Some(cur);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn observe_time_left(&mut self, inp: &MilestoneInputs, out: &mut Vec<Notification>) {
        let Some(cur) = inp.remaining_secs.filter(|v| *v >= 0.0) else {
            return;
        };
        if let Some(prev) = self.prev_remaining {
            let thresholds = self.cfg.time_left_min.clone();
            for mins in thresholds {
                let thr = f64::from(mins) * 60.0;
                if prev > thr && cur <= thr {
                    self.fire(
                        MilestoneKey::TimeLeft(mins),
                        Notification::new(
                            format!("timeLeft{mins}"),
                            json!({
                                "thresholdMin": mins,
                                "remainingSec": cur,
                                "remainingPretty": format_hms(cur as i64),
                            }),
                        ),
                        out,
                    );
                }
            }
        }
        self.prev_remaining = Some(cur);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn observe_temp(
        &mut self,
        zone: Zone,
        cur: Option<f64>,
        max: Option<f64>,
        out: &mut Vec<Notification>,
    ) {
        let (Some(t), Some(m)) = (cur, max) else {
            return;
        };
        if m <= 0.0 {
            return;
        }
        let ratio = t / m;
        let prev = match zone {
            Zone::Nozzle => self.prev_nozzle_ratio.replace(ratio),
            Zone::Bed => self.prev_bed_ratio.replace(ratio),
        };
        let Some(prev) = prev else {
            return;
        };
        let ratios = self.cfg.temp_ratios.clone();
        for r in ratios {
            if prev < r && ratio >= r {
                let pct = (r * 100.0).round() as u32;
                self.fire(
                    MilestoneKey::Temp(zone, pct),
                    Notification::new(
                        format!("tempNear{}{pct}", zone.label()),
                        json!({ "ratio": r, "currentTemp": t, "maxTemp": m }),
                    ),
                    out,
                );
            }
        }
    }

    fn observe_material(&mut self, inp: &MilestoneInputs, out: &mut Vec<Notification>) {
        let Some(cur) = inp.material_status else {
            return;
        };
        match (self.prev_material, cur) {
            (Some(0), 1) => {
                out.push(Notification::new("filamentOut", json!({})));
                self.runout_at_ms = Some(inp.now_ms);
            }
            (Some(1), 0) => {
                out.push(Notification::new("filamentReplaced", json!({})));
                self.runout_at_ms = None;
            }
            _ => {}
        }
        self.prev_material = Some(cur);
    }

    fn check_stall(
        &mut self,
        now_ms: i64,
        progress: Option<f64>,
        mid_job: bool,
        out: &mut Vec<Notification>,
    ) {
        if !mid_job {
            self.progress_baseline_ms = Some(now_ms);
            return;
        }
        let base = *self.progress_baseline_ms.get_or_insert(now_ms);
        let limit = i64::try_from(self.stall.progress_stall_ms).unwrap_or(i64::MAX);
        let stalled = now_ms.saturating_sub(base);
        if stalled >= limit {
            out.push(Notification::new(
                "printProgressStalled",
                json!({
                    "progress": progress,
                    "stalledFor": format_hms(stalled / MILLIS_PER_SEC),
                }),
            ));
            self.progress_baseline_ms = Some(now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> MilestoneNotifier {
        MilestoneNotifier::new(
            MilestoneCfg::default(),
            StallCfg::default(),
            MaterialCfg::default(),
        )
    }

    fn kinds(v: &[Notification]) -> Vec<&str> {
        v.iter().map(|n| n.kind.as_str()).collect()
    }

    fn progress(now: i64, p: f64) -> MilestoneInputs {
        MilestoneInputs {
            now_ms: now,
            progress: Some(p),
            mid_job: p > 0.0 && p < 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn fired_ids_survive_a_restart() {
        let mut m = notifier();
        m.observe(&progress(0, 40.0));
        m.observe(&progress(1_000, 60.0));
        let ids = m.fired_ids();
        assert_eq!(ids, vec!["progress:50".to_string()]);

        let mut again = notifier();
        again.restore_fired(&ids);
        again.observe(&progress(2_000, 45.0));
        let out = again.observe(&progress(3_000, 55.0));
        assert_eq!(kinds(&out), vec!["printProgressUpdated"]);
    }

    #[test]
    fn key_ids_parse_back() {
        for k in [
            MilestoneKey::Progress(75),
            MilestoneKey::TimeLeft(3),
            MilestoneKey::Temp(Zone::Bed, 95),
            MilestoneKey::Complete,
        ] {
            assert_eq!(MilestoneKey::from_id(&k.id()), Some(k));
        }
        assert_eq!(MilestoneKey::from_id("tempLid:5"), None);
    }

    #[test]
    fn first_observation_is_baseline_only() {
        let mut m = notifier();
        assert!(m.observe(&progress(0, 85.0)).is_empty());
        let out = m.observe(&progress(1_000, 91.0));
        assert_eq!(kinds(&out), vec!["printProgressUpdated", "printProgressMilestone"]);
        assert!(m.has_fired(MilestoneKey::Progress(90)));
        assert!(!m.has_fired(MilestoneKey::Progress(80)));
    }

    #[test]
    fn progress_jump_fires_every_crossed_milestone_once() {
        let mut m = notifier();
        m.observe(&progress(0, 10.0));
        let out = m.observe(&progress(1_000, 100.0));
        let milestones = out.iter().filter(|n| n.kind == "printProgressMilestone").count();
        assert_eq!(milestones, 5);
        assert_eq!(out.iter().filter(|n| n.kind == "printProgressComplete").count(), 1);
        // drop back and re-cross within the same job
        m.observe(&progress(2_000, 40.0));
        let out = m.observe(&progress(3_000, 100.0));
        assert!(out.iter().all(|n| n.kind == "printProgressUpdated"));
    }

    #[test]
    fn time_left_crossings() {
        let mut m = notifier();
        let at = |now, secs| MilestoneInputs {
            now_ms: now,
            remaining_secs: Some(secs),
            ..Default::default()
        };
        assert!(m.observe(&at(0, 700.0)).is_empty());
        let out = m.observe(&at(1_000, 290.0));
        assert_eq!(kinds(&out), vec!["timeLeft10", "timeLeft5"]);
        assert_eq!(out[1].payload["remainingPretty"], "0:04:50");
        assert!(m.observe(&at(2_000, 290.0)).is_empty());
        let out = m.observe(&at(3_000, 30.0));
        assert_eq!(kinds(&out), vec!["timeLeft3", "timeLeft1"]);
    }

    #[test]
    fn temperature_ratio_per_zone() {
        let mut m = notifier();
        let at = |n: f64, b: f64| MilestoneInputs {
            nozzle: Some(n),
            nozzle_max: Some(200.0),
            bed: Some(b),
            bed_max: Some(60.0),
            ..Default::default()
        };
        m.observe(&at(20.0, 20.0));
        let out = m.observe(&at(185.0, 20.0));
        assert_eq!(kinds(&out), vec!["tempNearNozzle80", "tempNearNozzle90"]);
        let out = m.observe(&at(185.0, 60.0));
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|n| n.kind.starts_with("tempNearBed")));
        assert!(m.has_fired(MilestoneKey::Temp(Zone::Bed, 100)));
    }

    #[test]
    fn zero_target_temperature_is_ignored() {
        let mut m = notifier();
        let at = |n: f64| MilestoneInputs {
            nozzle: Some(n),
            nozzle_max: Some(0.0),
            ..Default::default()
        };
        m.observe(&at(20.0));
        assert!(m.observe(&at(200.0)).is_empty());
    }

    #[test]
    fn material_runout_and_confirmation() {
        let mut m = notifier();
        let at = |now, s| MilestoneInputs {
            now_ms: now,
            material_status: Some(s),
            ..Default::default()
        };
        assert!(m.observe(&at(0, 0)).is_empty());
        assert_eq!(kinds(&m.observe(&at(1_000, 1))), vec!["filamentOut"]);
        assert!(m.runout_pending());
        assert!(m.tick(30_000, false).is_empty());
        assert_eq!(kinds(&m.tick(61_000, false)), vec!["filamentOutConfirmed"]);
        assert!(!m.runout_pending());
        assert_eq!(kinds(&m.observe(&at(70_000, 0))), vec!["filamentReplaced"]);
    }

    #[test]
    fn replaced_before_confirmation_disarms() {
        let mut m = notifier();
        let at = |now, s| MilestoneInputs {
            now_ms: now,
            material_status: Some(s),
            ..Default::default()
        };
        m.observe(&at(0, 0));
        m.observe(&at(1_000, 1));
        m.observe(&at(2_000, 0));
        assert!(m.tick(100_000, false).is_empty());
    }

    #[test]
    fn stall_repeats_with_fresh_baseline() {
        let mut m = notifier();
        m.observe(&progress(0, 40.0));
        assert!(m.tick(599_000, true).is_empty());
        assert_eq!(kinds(&m.tick(600_000, true)), vec!["printProgressStalled"]);
        assert!(m.tick(900_000, true).is_empty());
        assert_eq!(kinds(&m.tick(1_200_000, true)), vec!["printProgressStalled"]);
    }

    #[test]
    fn no_stall_outside_mid_job() {
        let mut m = notifier();
        m.observe(&progress(0, 40.0));
        assert!(m.tick(700_000, false).is_empty());
        assert!(m.tick(800_000, true).is_empty(), "baseline moved while not printing");
    }

    #[test]
    fn clear_once_per_job() {
        let mut m = notifier();
        m.observe(&progress(0, 10.0));
        m.observe(&progress(1, 60.0));
        assert!(m.on_job_identified(1));
        assert!(m.fired().is_empty());
        m.observe(&progress(2, 85.0));
        assert!(!m.on_prep_started(), "job already cleared");
        assert!(!m.on_job_identified(1));
        assert_eq!(m.fired().len(), 1);

        m.on_job_finished();
        assert!(m.on_prep_started(), "prep of the next job clears first");
        m.observe(&progress(3, 5.0));
        m.observe(&progress(4, 55.0));
        assert!(!m.on_job_identified(2), "identifier arrives after prep, no second clear");
        assert!(m.has_fired(MilestoneKey::Progress(50)));
        assert!(m.on_job_identified(3));
    }
}
