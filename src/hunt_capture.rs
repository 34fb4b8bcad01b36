//! Frame capture seam.
//!
//! A [`FrameSource`] produces frames on the capture thread. The camera itself is
//! an external collaborator; it either implements `FrameSource` directly or
//! pushes frames through a [`FrameFeed`] from its own callback.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::hunt_detector::Detection;

/// One captured frame. The payload format is an agreement between the source
/// and the detector; the pipeline never looks inside it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence:    u64,
    pub captured_at: DateTime<Utc>,
    pub data:        Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self { sequence, captured_at, data }
    }
}

/// Producer side of the pipeline, polled from a blocking capture thread.
pub trait FrameSource: Send {
    /// Next frame, or `None` when nothing is available this tick.
    /// Sources may block while waiting for a frame; after `None` or an error
    /// the capture loop backs off briefly before polling again.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Whether the source will never produce another frame.
    fn is_exhausted(&self) -> bool {
        false
    }
}

// ─── Push-style feed ─────────────────────────────────────────────────────────

/// Sender half handed to a camera callback.
#[derive(Clone)]
pub struct FrameFeed {
    tx: flume::Sender<Frame>,
}

/// Receiver half consumed by the pipeline's capture loop.
pub struct FeedSource {
    rx:        flume::Receiver<Frame>,
    poll:      Duration,
    exhausted: bool,
}

/// Create a connected feed/source pair. The channel holds a single frame:
/// a camera pushing faster than capture polls overwrites nothing and simply
/// has its newer frame rejected.
pub fn frame_feed(poll: Duration) -> (FrameFeed, FeedSource) {
    let (tx, rx) = flume::bounded(1);
    (
        FrameFeed { tx },
        FeedSource { rx, poll, exhausted: false },
    )
}

impl FrameFeed {
    /// Offer a frame. Returns `false` if the capture loop has not yet picked up
    /// the previous one (the frame is dropped) or the pipeline is gone.
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(f)) => {
                debug!("frame #{} dropped: capture busy", f.sequence);
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Convenience for feeding pre-computed detections (tests, recordings):
    /// the detections become the frame payload for [`crate::hunt_detector::RecordedDetector`].
    pub fn push_detections(
        &self,
        sequence: u64,
        captured_at: DateTime<Utc>,
        detections: &[Detection],
    ) -> Result<bool> {
        let data = serde_json::to_vec(detections)?;
        Ok(self.push(Frame::new(sequence, captured_at, data)))
    }
}

impl FrameSource for FeedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.rx.recv_timeout(self.poll) {
            Ok(frame) => Ok(Some(frame)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => {
                info!("Frame feed closed");
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
