// THEORY:
// `CounterConfig` is the single description of a counter: what kind of target it
// follows, which rule family counts it, and every tunable the engine reads. It is
// plain data (serde + TOML) so presets can ship as files, and it is the only input
// a `RepCounter` needs to be built.
//
// Key architectural principles:
// 1.  **Tagged Kinds**: Settings that only make sense for one kind of target (pose
//     validation landmarks for humans, the size history for animals) live inside
//     the `KindConfig` variant for that kind. There is no attribute probing; a
//     closed `match` decides what a counter carries.
// 2.  **Kind-Aware Defaults**: Normalized pose coordinates and pixel coordinates
//     need very different defaults (a threshold of 0.1 vs 40). Any field missing
//     from a TOML table is filled from the defaults of the table's kind, not from a
//     single global default.
// 3.  **Validate Once**: `validate` rejects configurations the engine can not run
//     (non-positive thresholds, frames too small to hold a zone) up front, so the
//     hot path never has to.

use crate::core_modules::calibration_window::DEFAULT_CALIBRATION_FRAMES;
use crate::core_modules::calibrator::{Calibrator, DetectionProfile, FrameBounds, ThresholdLayout};
use crate::core_modules::pattern_detector::{DEFAULT_BOUNCE_THRESHOLD, DEFAULT_JUMP_THRESHOLD, DEFAULT_OSCILLATION_WINDOW};
use crate::core_modules::sample::LandmarkId;
use crate::core_modules::state_machine::{Direction, LogicType};
use crate::core_modules::threshold_model::MAX_SENSITIVITY;
use crate::core_modules::validation::{DEFAULT_MIN_VALIDATION_SCORE, DEFAULT_VALIDATION_THRESHOLD, ValidationSettings};
use crate::error::{CounterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame height assumed for pixel-space targets.
pub const DEFAULT_FRAME_HEIGHT: f64 = 1080.0;
/// Number of recent bounding-box heights kept for the animal size proxy.
pub const DEFAULT_SIZE_HISTORY: usize = 50;
/// Upper bound for every window length (calibration, size history, pattern window).
pub const MAX_WINDOW_FRAMES: usize = 10_000;

/// The kind of target, without its settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Human,
    Animal,
    Object,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Animal => "animal",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pose-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanSettings {
    /// Secondary landmarks that must move coherently with the primary one.
    pub validation_landmarks: Vec<LandmarkId>,
    pub enable_anti_cheat: bool,
    /// Minimum secondary movement that counts as "moving".
    pub validation_threshold: f64,
    /// Minimum validation score for transitions to fire.
    pub min_validation_score: f64,
}

impl Default for HumanSettings {
    fn default() -> Self {
        Self {
            validation_landmarks: Vec::new(),
            enable_anti_cheat: true,
            validation_threshold: DEFAULT_VALIDATION_THRESHOLD,
            min_validation_score: DEFAULT_MIN_VALIDATION_SCORE,
        }
    }
}

/// Settings for animals tracked by bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimalSettings {
    /// The detector class this counter follows (informational).
    pub object_class: String,
    /// How many recent body heights feed the size proxy.
    pub size_history: usize,
}

impl Default for AnimalSettings {
    fn default() -> Self {
        Self {
            object_class: "cat".to_string(),
            size_history: DEFAULT_SIZE_HISTORY,
        }
    }
}

/// Settings for inanimate objects tracked by bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectSettings {
    pub object_class: String,
}

impl Default for ObjectSettings {
    fn default() -> Self {
        Self {
            object_class: "sports ball".to_string(),
        }
    }
}

/// The kind of target, with its kind-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindConfig {
    Human(HumanSettings),
    Animal(AnimalSettings),
    Object(ObjectSettings),
}

impl KindConfig {
    pub fn kind(&self) -> CounterKind {
        match self {
            Self::Human(_) => CounterKind::Human,
            Self::Animal(_) => CounterKind::Animal,
            Self::Object(_) => CounterKind::Object,
        }
    }
}

/// Complete configuration of one counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CounterConfigTable")]
pub struct CounterConfig {
    pub name: String,
    pub description: String,
    pub logic_type: LogicType,
    pub direction: Direction,
    /// Minimum movement, in signal units, that counts as an excursion.
    pub threshold: f64,
    /// Consecutive qualifying samples needed to confirm a return.
    pub stable_frames: u32,
    /// Samples below this confidence/visibility are skipped entirely.
    pub min_confidence: f64,
    /// Samples in the warm-up window.
    pub calibration_frames: usize,
    pub sensitivity_multiplier: f64,
    /// Full height of the coordinate space.
    pub frame_extent: f64,
    /// Distance from either frame edge that lines must keep.
    pub frame_margin: f64,
    /// Narrowest detection zone ever produced.
    pub min_zone_width: f64,
    /// Distance above the ground that still counts as landed (bounce only).
    pub ground_tolerance: f64,
    /// Oscillation window length, also used as the post-oscillation cooldown.
    pub pattern_window: usize,
    pub bounce_pattern_threshold: f64,
    pub jump_pattern_threshold: f64,
    /// Must stay the last field: TOML writes plain values before tables.
    pub kind: KindConfig,
}

impl CounterConfig {
    /// A pose counter with the defaults of a vertical, down-first exercise.
    pub fn human(name: impl Into<String>) -> Self {
        Self::for_kind(name.into(), KindConfig::Human(HumanSettings::default()))
    }

    /// An animal counter with the defaults of a jumping cat.
    pub fn animal(name: impl Into<String>) -> Self {
        Self::for_kind(name.into(), KindConfig::Animal(AnimalSettings::default()))
    }

    /// An object counter with the defaults of a bouncing ball.
    pub fn object(name: impl Into<String>) -> Self {
        Self::for_kind(name.into(), KindConfig::Object(ObjectSettings::default()))
    }

    fn for_kind(name: String, kind: KindConfig) -> Self {
        let normalized = FrameBounds::normalized();
        let pixels = FrameBounds::pixels(DEFAULT_FRAME_HEIGHT);
        let base = Self {
            name,
            description: String::new(),
            kind: kind.clone(),
            logic_type: LogicType::VerticalMovement,
            direction: Direction::DownFirst,
            threshold: 40.0,
            stable_frames: 5,
            min_confidence: 0.4,
            calibration_frames: DEFAULT_CALIBRATION_FRAMES,
            sensitivity_multiplier: 1.0,
            frame_extent: pixels.extent,
            frame_margin: pixels.margin,
            min_zone_width: pixels.min_zone_width,
            ground_tolerance: 20.0,
            pattern_window: DEFAULT_OSCILLATION_WINDOW,
            bounce_pattern_threshold: DEFAULT_BOUNCE_THRESHOLD,
            jump_pattern_threshold: DEFAULT_JUMP_THRESHOLD,
        };
        match kind {
            KindConfig::Human(_) => Self {
                threshold: 0.1,
                stable_frames: 3,
                min_confidence: 0.5,
                frame_extent: normalized.extent,
                frame_margin: normalized.margin,
                min_zone_width: normalized.min_zone_width,
                ground_tolerance: 0.02,
                bounce_pattern_threshold: 0.03,
                jump_pattern_threshold: 0.05,
                ..base
            },
            KindConfig::Animal(_) => Self {
                logic_type: LogicType::MovementDetection,
                ..base
            },
            KindConfig::Object(_) => Self {
                logic_type: LogicType::BounceDetection,
                min_confidence: 0.25,
                ..base
            },
        }
    }

    pub fn counter_kind(&self) -> CounterKind {
        self.kind.kind()
    }

    pub fn bounds(&self) -> FrameBounds {
        FrameBounds {
            extent: self.frame_extent,
            margin: self.frame_margin,
            min_zone_width: self.min_zone_width,
        }
    }

    /// How spread is derived for this kind of target.
    pub fn detection_profile(&self) -> DetectionProfile {
        match &self.kind {
            KindConfig::Human(_) => DetectionProfile::pose_jitter(),
            KindConfig::Animal(_) => DetectionProfile::body_size(),
            KindConfig::Object(_) => DetectionProfile::bounce_range(),
        }
    }

    pub fn calibrator(&self) -> Calibrator {
        Calibrator {
            profile: self.detection_profile(),
            layout: self.logic_type.layout(),
            bounds: self.bounds(),
            base_threshold: self.threshold,
            ground_tolerance: self.ground_tolerance,
            sensitivity: self.sensitivity_multiplier,
        }
    }

    /// Validation settings for human counters, `None` for other kinds.
    pub fn validation_settings(&self) -> Option<ValidationSettings> {
        match &self.kind {
            KindConfig::Human(human) => Some(ValidationSettings {
                landmarks: human.validation_landmarks.clone(),
                enabled: human.enable_anti_cheat,
                validation_threshold: human.validation_threshold,
                min_score: human.min_validation_score,
                min_visibility: self.min_confidence,
            }),
            KindConfig::Animal(_) | KindConfig::Object(_) => None,
        }
    }

    /// Parses a single counter table and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CounterError::InvalidConfig(e.to_string()))
    }

    /// Rejects configurations the engine can not run.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(CounterError::InvalidConfig(format!("{}: {reason}", self.name)));

        if self.name.trim().is_empty() {
            return Err(CounterError::InvalidConfig("counter name must not be empty".to_string()));
        }
        if !is_positive(self.threshold) {
            return fail(format!("threshold must be positive, got {}", self.threshold));
        }
        if self.stable_frames == 0 {
            return fail("stable_frames must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return fail(format!("min_confidence must be within [0, 1], got {}", self.min_confidence));
        }
        if !(1..=MAX_WINDOW_FRAMES).contains(&self.calibration_frames) {
            return fail(format!(
                "calibration_frames must be within [1, {MAX_WINDOW_FRAMES}], got {}",
                self.calibration_frames
            ));
        }
        if !is_positive(self.sensitivity_multiplier) {
            return fail(format!("sensitivity_multiplier must be positive, got {}", self.sensitivity_multiplier));
        }
        if !is_positive(self.frame_extent) || !self.frame_margin.is_finite() || self.frame_margin < 0.0 {
            return fail(format!("invalid frame extent {} / margin {}", self.frame_extent, self.frame_margin));
        }
        if !is_positive(self.min_zone_width) || !is_positive(self.ground_tolerance) {
            return fail("min_zone_width and ground_tolerance must be positive".to_string());
        }

        let usable = self.frame_extent - 2.0 * self.frame_margin;
        let needed = match self.logic_type.layout() {
            ThresholdLayout::Ground => 2.0 * self.min_zone_width + self.ground_tolerance * MAX_SENSITIVITY,
            ThresholdLayout::Centered | ThresholdLayout::OffsetTarget => 2.0 * self.min_zone_width,
        };
        if usable <= needed {
            return fail(format!("frame leaves {usable} units between margins, {needed} needed"));
        }

        if !(2..=MAX_WINDOW_FRAMES).contains(&self.pattern_window) {
            return fail(format!("pattern_window must be within [2, {MAX_WINDOW_FRAMES}], got {}", self.pattern_window));
        }
        if !is_positive(self.bounce_pattern_threshold) || !is_positive(self.jump_pattern_threshold) {
            return fail("pattern thresholds must be positive".to_string());
        }

        match &self.kind {
            KindConfig::Human(human) => {
                if !is_positive(human.validation_threshold) {
                    return fail("validation_threshold must be positive".to_string());
                }
                if !(0.0..=1.0).contains(&human.min_validation_score) {
                    return fail("min_validation_score must be within [0, 1]".to_string());
                }
            }
            KindConfig::Animal(animal) => {
                if !(1..=MAX_WINDOW_FRAMES).contains(&animal.size_history) {
                    return fail(format!(
                        "size_history must be within [1, {MAX_WINDOW_FRAMES}], got {}",
                        animal.size_history
                    ));
                }
            }
            KindConfig::Object(_) => {}
        }
        Ok(())
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// A counter table as written in TOML: everything but `name` and `kind` is optional
/// and falls back to the defaults of the table's kind.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CounterConfigTable {
    name: String,
    #[serde(default)]
    description: Option<String>,
    kind: KindConfig,
    logic_type: Option<LogicType>,
    direction: Option<Direction>,
    threshold: Option<f64>,
    stable_frames: Option<u32>,
    min_confidence: Option<f64>,
    calibration_frames: Option<usize>,
    sensitivity_multiplier: Option<f64>,
    frame_extent: Option<f64>,
    frame_margin: Option<f64>,
    min_zone_width: Option<f64>,
    ground_tolerance: Option<f64>,
    pattern_window: Option<usize>,
    bounce_pattern_threshold: Option<f64>,
    jump_pattern_threshold: Option<f64>,
}

impl From<CounterConfigTable> for CounterConfig {
    fn from(table: CounterConfigTable) -> Self {
        let defaults = Self::for_kind(table.name, table.kind);
        Self {
            description: table.description.unwrap_or_default(),
            logic_type: table.logic_type.unwrap_or(defaults.logic_type),
            direction: table.direction.unwrap_or(defaults.direction),
            threshold: table.threshold.unwrap_or(defaults.threshold),
            stable_frames: table.stable_frames.unwrap_or(defaults.stable_frames),
            min_confidence: table.min_confidence.unwrap_or(defaults.min_confidence),
            calibration_frames: table.calibration_frames.unwrap_or(defaults.calibration_frames),
            sensitivity_multiplier: table.sensitivity_multiplier.unwrap_or(defaults.sensitivity_multiplier),
            frame_extent: table.frame_extent.unwrap_or(defaults.frame_extent),
            frame_margin: table.frame_margin.unwrap_or(defaults.frame_margin),
            min_zone_width: table.min_zone_width.unwrap_or(defaults.min_zone_width),
            ground_tolerance: table.ground_tolerance.unwrap_or(defaults.ground_tolerance),
            pattern_window: table.pattern_window.unwrap_or(defaults.pattern_window),
            bounce_pattern_threshold: table.bounce_pattern_threshold.unwrap_or(defaults.bounce_pattern_threshold),
            jump_pattern_threshold: table.jump_pattern_threshold.unwrap_or(defaults.jump_pattern_threshold),
            ..defaults
        }
    }
}
