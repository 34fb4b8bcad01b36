//! Hunt configuration
//!
//! Loaded from tunnistin.toml (or tunnistin.json) with env-var overrides.
//! Env format: TUNNISTIN__SECTION__KEY (double underscore separators), e.g.
//! `TUNNISTIN__GAME__OBJECT_TIMER_LENGTH=3.5` or
//! `TUNNISTIN__GAME__TARGET_OBJECTS=cup,book`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::hunt_error::HuntError;
use crate::hunt_geometry::Rect;

/// Upper bound for every configured duration, one day.
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Saturating seconds-to-Duration; negative and NaN map to zero.
fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HuntConfig {
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Classes the detector may report; detections of anything else are dropped.
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_target_objects")]
    pub target_objects: Vec<String>,
    /// Seconds an object must stay tracked before its class counts as found.
    #[serde(default = "default_object_timer_length")]
    pub object_timer_length: f64,
    /// Seconds the award stays up after mission completion before the game resets.
    #[serde(default = "default_award_display_time")]
    pub award_display_time: f64,
    /// Seconds a partial progress value survives without being refreshed.
    #[serde(default = "default_progress_decay_delay")]
    pub progress_decay_delay: f64,
}

fn default_target_objects() -> Vec<String> {
    ["cell phone", "bag", "toothbrush", "cup", "book"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_object_timer_length() -> f64 {
    2.0
}
fn default_award_display_time() -> f64 {
    8.0
}
fn default_progress_decay_delay() -> f64 {
    0.1
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            target_objects: default_target_objects(),
            object_timer_length: default_object_timer_length(),
            award_display_time: default_award_display_time(),
            progress_decay_delay: default_progress_decay_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum intersection fraction for a box to continue a previous track.
    #[serde(default = "default_required_intersection")]
    pub required_intersection: f64,
}

fn default_required_intersection() -> f64 {
    0.9
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            required_intersection: default_required_intersection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Fraction of the frame width covered by the results panel on the left.
    #[serde(default = "default_results_view_width")]
    pub results_view_width: f64,
    /// Boxes with at least this much of their area under the panel are dropped.
    #[serde(default = "default_max_ui_overlap")]
    pub max_ui_overlap: f64,
}

fn default_results_view_width() -> f64 {
    0.14
}
fn default_max_ui_overlap() -> f64 {
    0.75
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            results_view_width: default_results_view_width(),
            max_ui_overlap: default_max_ui_overlap(),
        }
    }
}

impl LayoutConfig {
    /// The reserved strip in normalised frame coordinates.
    pub fn reserved_region(&self) -> Rect {
        Rect::new(0.0, 0.0, self.results_view_width, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the processing task's event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Replay recordings at their recorded pace in real-time mode.
    #[serde(default = "default_pace_replay")]
    pub pace_replay: bool,
}

fn default_event_buffer() -> usize {
    64
}
fn default_pace_replay() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            pace_replay: default_pace_replay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub classification: String,
    /// Overrides `detector.confidence_threshold` for this class.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
}

impl HuntConfig {
    /// Classes that survive the first filtering step: configured objects plus
    /// every target.
    pub fn known_classes(&self) -> BTreeSet<String> {
        self.objects
            .iter()
            .map(|o| o.classification.clone())
            .chain(self.game.target_objects.iter().cloned())
            .collect()
    }

    pub fn confidence_threshold(&self, class_id: &str) -> f32 {
        self.objects
            .iter()
            .find(|o| o.classification == class_id)
            .and_then(|o| o.confidence_threshold)
            .unwrap_or(self.detector.confidence_threshold)
    }

    pub fn award_display(&self) -> Duration {
        seconds(self.game.award_display_time)
    }

    pub fn progress_decay(&self) -> Duration {
        seconds(self.game.progress_decay_delay)
    }

    /// Reject values the core cannot work with.
    pub fn validate(&self) -> Result<(), HuntError> {
        let invalid = |msg: String| Err(HuntError::InvalidConfig(msg));

        if self.game.target_objects.is_empty() {
            return invalid("game.target_objects must list at least one class".into());
        }
        if self.game.target_objects.iter().any(|c| c.trim().is_empty()) {
            return invalid("game.target_objects contains an empty class name".into());
        }
        let timer = self.game.object_timer_length;
        if !(timer > 0.0 && timer <= MAX_DURATION_SECS) {
            return invalid(format!(
                "game.object_timer_length must be within (0, {}], got {}",
                MAX_DURATION_SECS, timer
            ));
        }
        for (key, value) in [
            ("game.award_display_time", self.game.award_display_time),
            ("game.progress_decay_delay", self.game.progress_decay_delay),
        ] {
            if !(0.0..=MAX_DURATION_SECS).contains(&value) {
                return invalid(format!(
                    "{} must be within 0..{}, got {}",
                    key, MAX_DURATION_SECS, value
                ));
            }
        }
        for (key, value) in [
            ("tracker.required_intersection", self.tracker.required_intersection),
            ("layout.results_view_width", self.layout.results_view_width),
            ("layout.max_ui_overlap", self.layout.max_ui_overlap),
            ("detector.confidence_threshold", self.detector.confidence_threshold as f64),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within 0..1, got {}", key, value));
            }
        }
        if self.pipeline.event_buffer == 0 {
            return invalid("pipeline.event_buffer must be > 0".into());
        }
        Ok(())
    }
}

fn builder_with_env(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> config::ConfigBuilder<config::builder::DefaultState> {
    builder.add_source(
        config::Environment::with_prefix("TUNNISTIN")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("game.target_objects")
            .try_parsing(true),
    )
}

/// Load configuration from tunnistin.{toml,json} + environment variable overrides.
///
/// Search order:
///   1. `path` when given (must exist)
///   2. ./tunnistin.toml / ./tunnistin.json (working directory, optional)
///   3. Environment variables: TUNNISTIN__GAME__TARGET_OBJECTS, etc.
pub fn load_config(path: Option<&Path>) -> Result<HuntConfig, HuntError> {
    let builder = match path {
        Some(p) => config::Config::builder().add_source(config::File::from(p).required(true)),
        None => config::Config::builder()
            .add_source(config::File::with_name("tunnistin").required(false)),
    };

    let settings = builder_with_env(builder).build()?;
    let cfg: HuntConfig = settings.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
