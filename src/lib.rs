//! Tunnistin: detection tracking and mission progress for a camera scavenger hunt.
//!
//! The player points a camera at everyday objects; an external detector labels
//! each frame. This crate links detections across frames, turns continuous
//! dwell time into per-target progress and decides when the mission is complete.

pub mod hunt_capture;
pub mod hunt_config;
pub mod hunt_decay;
pub mod hunt_detector;
pub mod hunt_error;
pub mod hunt_geometry;
pub mod hunt_pipeline;
pub mod hunt_progress;
pub mod hunt_replay;
pub mod hunt_session;
pub mod hunt_tracker;
pub mod logging;

pub use hunt_config::{load_config, HuntConfig};
pub use hunt_detector::{Detection, ObjectDetector};
pub use hunt_error::HuntError;
pub use hunt_geometry::Rect;
pub use hunt_session::{HuntSession, HuntSnapshot};
