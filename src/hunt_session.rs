//! Hunt session: the per-frame detection orchestrator.
//!
//! Owns the track history, the mission progress and the decay timers of one
//! game session. Every method runs on the caller's thread; the async pipeline
//! confines a session to a single task so none of this state is ever shared.
//!
//! Per frame:
//!   1. drop everything while the mission is complete (award is showing)
//!   2. keep known classes above their confidence threshold
//!   3. clip or drop boxes under the reserved results panel
//!   4. match against the previous frame's tracks
//!   5. turn dwell time into progress, refresh decay timers, run the flash fade
//!   6. publish a snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::hunt_config::HuntConfig;
use crate::hunt_decay::{DecayScheduler, VirtualDecayTimers};
use crate::hunt_detector::Detection;
use crate::hunt_geometry::{overlap_fraction, Rect};
use crate::hunt_progress::{MissionProgress, ProgressChange, ProgressSnapshot};
use crate::hunt_tracker::TrackMatcher;

/// Length of the linear flash fade after the dwell threshold, in seconds.
const FLASH_FADE_SECS: f64 = 1.0;

// ─── Outbound state ──────────────────────────────────────────────────────────

/// One tracked detection as a renderer would annotate it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedObject {
    pub track_id:          Uuid,
    pub class_id:          String,
    pub confidence:        f32,
    /// Box after the results-panel adjustment.
    pub bbox:              Rect,
    pub age_secs:          f64,
    /// 1 once the class is found, otherwise dwell time over the timer length.
    pub timer_fraction:    f64,
    pub is_target:         bool,
    /// Fill opacity of the completion flash, 0 when no flash is showing.
    pub highlight_opacity: f64,
}

/// Everything the UI needs after a pipeline pass. Read-only for consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HuntSnapshot {
    pub frame_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub progress:        ProgressSnapshot,
    pub objects:         Vec<TrackedObject>,
}

impl HuntSnapshot {
    pub fn mission_complete(&self) -> bool {
        self.progress.mission_complete
    }

    pub fn progress(&self, class_id: &str) -> Option<f64> {
        self.progress.progress(class_id)
    }

    pub fn progress_by_class(&self) -> BTreeMap<String, f64> {
        self.progress
            .targets
            .iter()
            .map(|t| (t.class_id.clone(), t.progress))
            .collect()
    }

    pub fn is_found(&self, class_id: &str) -> bool {
        self.progress.found_classes.iter().any(|c| c == class_id)
    }

    pub fn is_flashed(&self, class_id: &str) -> bool {
        self.progress.flashed_classes.iter().any(|c| c == class_id)
    }
}

// ─── Occlusion ───────────────────────────────────────────────────────────────

/// Adjust a box for the results panel occupying `reserved` on the left.
///
/// Boxes that start under the panel are clipped to its right edge when they
/// reach past it and less than `max_overlap` of their area is covered;
/// otherwise they are dropped (`None`). Boxes right of the panel pass as-is.
pub fn adjust_for_reserved_region(bbox: Rect, reserved: &Rect, max_overlap: f64) -> Option<Rect> {
    let edge = reserved.max_x();
    if bbox.min_x() >= edge {
        return Some(bbox);
    }
    let covered = overlap_fraction(reserved, &bbox);
    if bbox.max_x() > edge && covered < max_overlap {
        Some(bbox.clip_left_of(edge))
    } else {
        None
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

pub struct HuntSession<S> {
    known_classes:  BTreeSet<String>,
    cfg:            HuntConfig,
    reserved:       Rect,
    decay_delay:    Duration,
    matcher:        TrackMatcher,
    progress:       MissionProgress,
    timers:         S,
    last_frame:     Option<DateTime<Utc>>,
    last_objects:   Vec<TrackedObject>,
}

impl<S: DecayScheduler> HuntSession<S> {
    pub fn new(cfg: HuntConfig, timers: S) -> Self {
        Self {
            known_classes: cfg.known_classes(),
            reserved: cfg.layout.reserved_region(),
            decay_delay: cfg.progress_decay(),
            matcher: TrackMatcher::new(cfg.tracker.required_intersection),
            progress: MissionProgress::new(&cfg.game.target_objects),
            timers,
            last_frame: None,
            last_objects: Vec::new(),
            cfg,
        }
    }

    pub fn config(&self) -> &HuntConfig {
        &self.cfg
    }

    pub fn mission_complete(&self) -> bool {
        self.progress.mission_complete()
    }

    pub fn progress(&self) -> &MissionProgress {
        &self.progress
    }

    pub fn matcher(&self) -> &TrackMatcher {
        &self.matcher
    }

    pub fn timers(&self) -> &S {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut S {
        &mut self.timers
    }

    /// Run one inference result through the session.
    ///
    /// Returns `None` without touching any state while the mission is complete;
    /// frames stay paused until [`HuntSession::reset`].
    pub fn process_frame(&mut self, now: DateTime<Utc>, detections: &[Detection]) -> Option<HuntSnapshot> {
        if self.progress.mission_complete() {
            trace!("Frame at {} dropped: mission complete", now);
            return None;
        }

        let admitted: Vec<Detection> = detections.iter().filter_map(|d| self.admit(d)).collect();
        if admitted.len() != detections.len() {
            trace!("{} of {} detections admitted", admitted.len(), detections.len());
        }

        let timer_len = self.cfg.game.object_timer_length;
        let matched = self.matcher.advance(now, &admitted);
        let mut objects = Vec::with_capacity(matched.len());

        for m in matched {
            let class = m.detection.class_id.as_str();
            let age = m.track.age_secs(now);
            let is_target = self.progress.is_target(class);
            let timer_passed = age > timer_len;

            if is_target {
                if timer_passed {
                    if !self.progress.is_found(class) {
                        self.apply_progress(class, 1.0, now);
                    }
                } else {
                    self.apply_progress(class, (age / timer_len).clamp(0.0, 1.0), now);
                }
            }

            let opacity = if is_target && timer_passed && !self.progress.is_flashed(class) {
                1.0 - (age - timer_len) / FLASH_FADE_SECS
            } else {
                0.0
            };
            if opacity <= 0.0 && timer_passed {
                self.progress.mark_flashed(class);
            }

            let timer_fraction = if self.progress.is_found(class) {
                1.0
            } else {
                (age / timer_len).clamp(0.0, 1.0)
            };

            objects.push(TrackedObject {
                track_id: m.track.id,
                class_id: m.detection.class_id,
                confidence: m.detection.confidence,
                bbox: m.detection.bbox,
                age_secs: age,
                timer_fraction,
                is_target,
                highlight_opacity: opacity.clamp(0.0, 1.0),
            });
        }

        self.last_frame = Some(now);
        self.last_objects = objects;
        Some(self.snapshot())
    }

    /// Apply an expired decay timer: unrefreshed partial progress drops to 0.
    pub fn decay(&mut self, class_id: &str) -> ProgressChange {
        let change = self.progress.set_progress(class_id, 0.0);
        if matches!(change, ProgressChange::Updated { .. }) {
            debug!("Progress for {} decayed", class_id);
        }
        change
    }

    /// Start the session over: timers cancelled first, then progress, flags
    /// and track history cleared.
    pub fn reset(&mut self) {
        self.timers.cancel_all();
        self.progress.reset();
        self.matcher.clear();
        self.last_frame = None;
        self.last_objects.clear();
        info!("Hunt session reset");
    }

    pub fn snapshot(&self) -> HuntSnapshot {
        HuntSnapshot {
            frame_timestamp: self.last_frame,
            progress: self.progress.snapshot(),
            objects: self.last_objects.clone(),
        }
    }

    fn admit(&self, det: &Detection) -> Option<Detection> {
        if !self.known_classes.contains(&det.class_id) {
            return None;
        }
        if det.confidence < self.cfg.confidence_threshold(&det.class_id) {
            return None;
        }
        let bbox = adjust_for_reserved_region(det.bbox, &self.reserved, self.cfg.layout.max_ui_overlap)?;
        Some(Detection {
            class_id: det.class_id.clone(),
            confidence: det.confidence,
            bbox,
        })
    }

    fn apply_progress(&mut self, class_id: &str, fraction: f64, now: DateTime<Utc>) {
        let change = self.progress.set_progress(class_id, fraction);
        match change {
            c if c.needs_decay() => self.timers.schedule(class_id, now, self.decay_delay),
            ProgressChange::Completed { .. } => self.timers.cancel(class_id),
            _ => {}
        }
    }
}

impl HuntSession<VirtualDecayTimers> {
    /// Session whose decay timers run on frame time.
    pub fn virtual_time(cfg: HuntConfig) -> Self {
        Self::new(cfg, VirtualDecayTimers::new())
    }

    /// Fire every decay whose deadline is at or before `now`.
    /// Returns how many fired.
    pub fn advance_clock(&mut self, now: DateTime<Utc>) -> usize {
        let due = self.timers.take_due(now);
        for class in &due {
            self.decay(class);
        }
        due.len()
    }
}
