//! Object detector seam.
//!
//! The vision model itself lives outside this crate. Anything that can turn a
//! captured frame into a list of labelled boxes implements [`ObjectDetector`];
//! the pipeline treats it as a black box and only consumes its output.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hunt_capture::Frame;
use crate::hunt_geometry::Rect;

/// One labelled box from a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id:   String,
    pub confidence: f32,
    /// Bounding box in normalised [0..1] frame coordinates.
    pub bbox:       Rect,
}

impl Detection {
    pub fn new(class_id: impl Into<String>, confidence: f32, bbox: Rect) -> Self {
        Self {
            class_id: class_id.into(),
            confidence,
            bbox,
        }
    }
}

/// Black-box detector: frame in, detections out.
pub trait ObjectDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

impl<F> ObjectDetector for F
where
    F: FnMut(&Frame) -> Result<Vec<Detection>> + Send,
{
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self(frame)
    }
}

/// Detector for frames whose payload already carries JSON-encoded detections,
/// as produced by recordings and [`crate::hunt_capture::FrameFeed::push_detections`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordedDetector;

impl ObjectDetector for RecordedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.data.is_empty() {
            return Ok(Vec::new());
        }
        let detections: Vec<Detection> = serde_json::from_slice(&frame.data)
            .with_context(|| format!("frame #{} does not carry recorded detections", frame.sequence))?;
        debug!("frame #{}: {} recorded detections", frame.sequence, detections.len());
        Ok(detections)
    }
}
