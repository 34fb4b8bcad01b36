//! Recorded detection streams.
//!
//! A recording is JSON lines, one inference result per line:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00Z","detections":[{"class_id":"cup","confidence":0.9,"bbox":{"x":0.4,"y":0.3,"width":0.2,"height":0.2}}]}
//! ```
//!
//! Recordings drive the core two ways: [`replay`] runs them through a
//! [`HuntSession`] in frame time (deterministic, no runtime needed), and
//! [`RecordingSource`] feeds them to the live pipeline as a [`FrameSource`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::hunt_capture::{Frame, FrameSource};
use crate::hunt_config::HuntConfig;
use crate::hunt_detector::Detection;
use crate::hunt_error::HuntError;
use crate::hunt_session::{HuntSession, HuntSnapshot};

// ─── Recording ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub timestamp:  DateTime<Utc>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl RecordedFrame {
    /// Frame whose payload [`crate::hunt_detector::RecordedDetector`] decodes.
    pub fn to_frame(&self, sequence: u64) -> Result<Frame> {
        let data = serde_json::to_vec(&self.detections)?;
        Ok(Frame::new(sequence, self.timestamp, data))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    /// Parse JSON lines. Blank lines are skipped; line numbers in errors are 1-based.
    pub fn parse(text: &str) -> Result<Self, HuntError> {
        let mut frames = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let frame: RecordedFrame = serde_json::from_str(line)
                .map_err(|source| HuntError::Recording { line: idx + 1, source })?;
            frames.push(frame);
        }
        Ok(Self { frames })
    }

    pub fn load(path: &Path) -> Result<Self, HuntError> {
        let text = std::fs::read_to_string(path)?;
        let recording = Self::parse(&text)?;
        info!("Loaded {} frames from {}", recording.frames.len(), path.display());
        Ok(recording)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Time between the first and the last frame.
    pub fn duration(&self) -> chrono::Duration {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).max(chrono::Duration::zero()),
            _ => chrono::Duration::zero(),
        }
    }
}

// ─── Frame-time replay ──────────────────────────────────────────────────────

/// Outcome of one recorded frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStep {
    pub timestamp:  DateTime<Utc>,
    /// Decay timers that expired since the previous frame.
    pub decayed:    usize,
    /// The award display ran out before this frame and the session restarted.
    pub auto_reset: bool,
    /// `None` when the frame was dropped because the mission was complete.
    pub snapshot:   Option<HuntSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub steps:          Vec<ReplayStep>,
    /// How many times the mission was completed over the recording.
    pub completions:    usize,
    pub final_snapshot: HuntSnapshot,
}

/// Run a recording through a fresh session with timers on frame time.
///
/// Decays fire when a later frame's timestamp passes their deadline, and a
/// completed mission resets once `award_display_time` of frame time has passed.
/// The same recording and configuration always produce the same progress,
/// flags and object ages; only the random track ids differ between runs.
pub fn replay(cfg: &HuntConfig, recording: &Recording) -> Result<ReplayReport, HuntError> {
    cfg.validate()?;
    let award = chrono::Duration::from_std(cfg.award_display()).unwrap_or(chrono::Duration::MAX);

    let mut session = HuntSession::virtual_time(cfg.clone());
    let mut award_deadline: Option<DateTime<Utc>> = None;
    let mut completions = 0;
    let mut steps = Vec::with_capacity(recording.len());

    for frame in &recording.frames {
        let now = frame.timestamp;

        let auto_reset = match award_deadline {
            Some(deadline) if now >= deadline => {
                session.reset();
                award_deadline = None;
                true
            }
            _ => false,
        };

        let decayed = session.advance_clock(now);
        let snapshot = session.process_frame(now, &frame.detections);

        if let Some(s) = &snapshot {
            if s.mission_complete() && award_deadline.is_none() {
                completions += 1;
                award_deadline = Some(now.checked_add_signed(award).unwrap_or(DateTime::<Utc>::MAX_UTC));
                debug!("Mission completed at {}", now);
            }
        }

        steps.push(ReplayStep { timestamp: now, decayed, auto_reset, snapshot });
    }

    Ok(ReplayReport {
        steps,
        completions,
        final_snapshot: session.snapshot(),
    })
}

// ─── Live source ────────────────────────────────────────────────────────────

/// Plays a recording into the live pipeline, optionally sleeping between
/// frames to reproduce the recorded pace.
pub struct RecordingSource {
    frames:    std::vec::IntoIter<RecordedFrame>,
    sequence:  u64,
    paced:     bool,
    last:      Option<DateTime<Utc>>,
    exhausted: bool,
}

impl RecordingSource {
    pub fn new(recording: Recording, paced: bool) -> Self {
        Self {
            frames: recording.frames.into_iter(),
            sequence: 0,
            paced,
            last: None,
            exhausted: false,
        }
    }
}

impl FrameSource for RecordingSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(recorded) = self.frames.next() else {
            self.exhausted = true;
            return Ok(None);
        };

        if self.paced {
            if let Some(last) = self.last {
                if let Ok(gap) = (recorded.timestamp - last).to_std() {
                    std::thread::sleep(gap);
                }
            }
            self.last = Some(recorded.timestamp);
        }

        self.sequence += 1;
        recorded.to_frame(self.sequence).map(Some)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
