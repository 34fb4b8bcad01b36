//! Frame-to-frame track matcher.
//!
//! Links a detection to the previous frame's track of the same class when their
//! boxes overlap by more than `required_intersection` (mean-area intersection
//! fraction). A matched detection inherits the track's `first_observed_at`, so
//! the track's age keeps growing; anything unmatched starts over at age 0.
//!
//! Memory is exactly one frame deep: a track that finds no detection in the
//! current frame is forgotten.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::hunt_detector::Detection;
use crate::hunt_geometry::{intersection_fraction, Rect};

// ─── Types ───────────────────────────────────────────────────────────────────

/// One continuously observed object instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id:                Uuid,
    pub class_id:          String,
    pub bbox:              Rect,
    pub first_observed_at: DateTime<Utc>,
}

impl Track {
    fn start(det: &Detection, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_id: det.class_id.clone(),
            bbox: det.bbox,
            first_observed_at: now,
        }
    }

    /// Continuation of `self` with the latest box.
    fn carried(&self, det: &Detection) -> Self {
        Self {
            id: self.id,
            class_id: self.class_id.clone(),
            bbox: det.bbox,
            first_observed_at: self.first_observed_at,
        }
    }

    /// Dwell time at `now`, never negative.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.first_observed_at).max(chrono::Duration::zero())
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        self.age(now).num_milliseconds() as f64 / 1000.0
    }
}

/// Tracks of one frame, grouped by class in detection order.
pub type TrackIndex = HashMap<String, Vec<Track>>;

/// A detection bound to the track it was assigned this frame.
#[derive(Debug, Clone)]
pub struct TrackedDetection {
    pub detection: Detection,
    pub track:     Track,
    /// Whether the track was carried over from the previous frame.
    pub continued: bool,
}

/// Result of matching one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameMatch {
    pub tracks:  TrackIndex,
    pub matches: Vec<TrackedDetection>,
}

// ─── Matching ────────────────────────────────────────────────────────────────

/// Match `detections` against `prior` tracks.
///
/// For every detection the *first* prior track of the same class (in list
/// order) whose intersection fraction exceeds `required_intersection` is
/// continued, even if a later track overlaps better. Several detections may
/// continue the same prior track.
pub fn match_frame(
    now: DateTime<Utc>,
    detections: &[Detection],
    prior: &TrackIndex,
    required_intersection: f64,
) -> FrameMatch {
    let mut out = FrameMatch::default();

    for det in detections {
        let carried = prior
            .get(&det.class_id)
            .and_then(|tracks| {
                tracks.iter().find(|t| {
                    intersection_fraction(&t.bbox, &det.bbox) > required_intersection
                })
            });

        let (track, continued) = match carried {
            Some(prev) => (prev.carried(det), true),
            None => {
                let t = Track::start(det, now);
                debug!("Track {} started ({})", t.id, t.class_id);
                (t, false)
            }
        };

        out.tracks
            .entry(det.class_id.clone())
            .or_default()
            .push(track.clone());
        out.matches.push(TrackedDetection {
            detection: det.clone(),
            track,
            continued,
        });
    }

    out
}

// ─── Matcher ─────────────────────────────────────────────────────────────────

/// Stateful wrapper that keeps the previous frame's tracks.
pub struct TrackMatcher {
    tracks:                TrackIndex,
    required_intersection: f64,
}

impl TrackMatcher {
    pub fn new(required_intersection: f64) -> Self {
        Self {
            tracks: TrackIndex::new(),
            required_intersection,
        }
    }

    /// Match the frame and make its tracks the new history.
    pub fn advance(&mut self, now: DateTime<Utc>, detections: &[Detection]) -> Vec<TrackedDetection> {
        let FrameMatch { tracks, matches } =
            match_frame(now, detections, &self.tracks, self.required_intersection);

        for (class, prior) in &self.tracks {
            let survivors = tracks.get(class).map(Vec::as_slice).unwrap_or_default();
            for lost in prior.iter().filter(|p| survivors.iter().all(|s| s.id != p.id)) {
                debug!(
                    "Track {} lost ({}, age {:.2}s)",
                    lost.id,
                    lost.class_id,
                    lost.age_secs(now)
                );
            }
        }

        self.tracks = tracks;
        matches
    }

    pub fn tracks(&self) -> &TrackIndex {
        &self.tracks
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
