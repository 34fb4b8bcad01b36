//! Mission progress: per-target progress, found and flashed flags.
//!
//! Purely synchronous. Decay of unrefreshed progress is scheduled by the caller
//! (see `hunt_session`); this type only records values and reports what changed.
//!
//! Per target: `Idle (0) → InProgress (0 < p < 1) → Completed (p = 1, found)`.
//! Completed is a latch: later updates are ignored until `reset()`.

use serde::Serialize;
use tracing::{debug, info};

// ─── Types ───────────────────────────────────────────────────────────────────

/// Progress of one target class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProgress {
    pub class_id: String,
    pub progress: f64,
    pub found:    bool,
    pub flashed:  bool,
}

impl TargetProgress {
    fn idle(class_id: &str) -> Self {
        Self {
            class_id: class_id.to_string(),
            progress: 0.0,
            found: false,
            flashed: false,
        }
    }
}

/// What a `set_progress` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressChange {
    /// Not a target, or already completed.
    Ignored,
    /// Value written but equal to the previous one.
    Unchanged,
    /// New partial value.
    Updated { progress: f64 },
    /// Class reached 1 on this call.
    Completed { mission_complete: bool },
}

impl ProgressChange {
    /// A non-completing value was written; the caller refreshes its decay.
    pub fn needs_decay(&self) -> bool {
        matches!(self, ProgressChange::Updated { .. } | ProgressChange::Unchanged)
    }
}

/// Read-only view handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub targets:          Vec<TargetProgress>,
    pub found_classes:    Vec<String>,
    pub flashed_classes:  Vec<String>,
    pub mission_complete: bool,
}

impl ProgressSnapshot {
    pub fn progress(&self, class_id: &str) -> Option<f64> {
        self.targets.iter().find(|t| t.class_id == class_id).map(|t| t.progress)
    }
}

// ─── MissionProgress ─────────────────────────────────────────────────────────

pub struct MissionProgress {
    targets:          Vec<TargetProgress>,
    found_order:      Vec<String>,
    flashed_order:    Vec<String>,
    mission_complete: bool,
}

impl MissionProgress {
    /// Duplicate class names are collapsed, first occurrence wins.
    pub fn new<I, S>(target_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut targets: Vec<TargetProgress> = Vec::new();
        for class in target_classes {
            let class = class.as_ref();
            if !targets.iter().any(|t| t.class_id == class) {
                targets.push(TargetProgress::idle(class));
            }
        }
        Self {
            targets,
            found_order: Vec::new(),
            flashed_order: Vec::new(),
            mission_complete: false,
        }
    }

    pub fn is_target(&self, class_id: &str) -> bool {
        self.targets.iter().any(|t| t.class_id == class_id)
    }

    pub fn target_classes(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.class_id.as_str())
    }

    pub fn get(&self, class_id: &str) -> Option<&TargetProgress> {
        self.targets.iter().find(|t| t.class_id == class_id)
    }

    pub fn progress(&self, class_id: &str) -> Option<f64> {
        self.get(class_id).map(|t| t.progress)
    }

    pub fn is_found(&self, class_id: &str) -> bool {
        self.get(class_id).is_some_and(|t| t.found)
    }

    pub fn is_flashed(&self, class_id: &str) -> bool {
        self.get(class_id).is_some_and(|t| t.flashed)
    }

    pub fn mission_complete(&self) -> bool {
        self.mission_complete
    }

    /// Record progress for a class. Fractions are clamped to [0, 1]; NaN is 0.
    pub fn set_progress(&mut self, class_id: &str, fraction: f64) -> ProgressChange {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };

        let change = match self.targets.iter_mut().find(|t| t.class_id == class_id) {
            None => ProgressChange::Ignored,
            Some(t) if t.found => ProgressChange::Ignored,
            Some(t) if fraction >= 1.0 => {
                t.progress = 1.0;
                t.found = true;
                self.found_order.push(class_id.to_string());
                info!("Target found: {}", class_id);
                ProgressChange::Completed { mission_complete: false }
            }
            Some(t) => {
                let previous = t.progress;
                t.progress = fraction;
                if previous == fraction {
                    ProgressChange::Unchanged
                } else {
                    ProgressChange::Updated { progress: fraction }
                }
            }
        };

        let was_complete = self.mission_complete;
        self.recompute_mission();

        match change {
            ProgressChange::Completed { .. } => ProgressChange::Completed {
                mission_complete: self.mission_complete && !was_complete,
            },
            other => other,
        }
    }

    /// One-way flag marking that the completion flash was shown.
    /// Returns `true` only on the transition.
    pub fn mark_flashed(&mut self, class_id: &str) -> bool {
        match self.targets.iter_mut().find(|t| t.class_id == class_id) {
            Some(t) if !t.flashed => {
                t.flashed = true;
                self.flashed_order.push(class_id.to_string());
                debug!("Flash shown for {}", class_id);
                true
            }
            _ => false,
        }
    }

    /// Back to the session start: all progress 0, all flags cleared.
    pub fn reset(&mut self) {
        for t in &mut self.targets {
            t.progress = 0.0;
            t.found = false;
            t.flashed = false;
        }
        self.found_order.clear();
        self.flashed_order.clear();
        self.mission_complete = false;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            targets: self.targets.clone(),
            found_classes: self.found_order.clone(),
            flashed_classes: self.flashed_order.clone(),
            mission_complete: self.mission_complete,
        }
    }

    // Every target exactly at 1.0. With no targets this is vacuously true;
    // configuration validation rejects an empty target list.
    fn recompute_mission(&mut self) {
        let complete = self.targets.iter().all(|t| t.progress == 1.0);
        if complete && !self.mission_complete {
            info!("Mission complete: all {} targets found", self.targets.len());
        }
        self.mission_complete = complete;
    }
}
