// THEORY:
// The `pipeline` module is the top-level API of the counting engine. A `RepCounter`
// encapsulates the full stack for one target session (calibration window,
// threshold model, state machine, pattern detector and, for pose targets, the
// validation scorer) behind a narrow call contract: one sample in per frame, a
// count and a report out, plus a handful of interactive tuning knobs.
//
// Key architectural principles:
// 1.  **One Owner Per Session**: A `RepCounter` owns every piece of mutable state of
//     its session. Nothing is shared between counters; concurrency is layered on
//     top (see `parallel_pipeline`), never inside.
// 2.  **Staged Processing**: Every frame runs the same stages in the same order:
//     confidence gate, size-proxy bookkeeping, pattern history, then either the
//     warm-up window or the calibrated stages (validation, classification, state
//     machine). Each stage is cheap, bounded arithmetic.
// 3.  **Refuse, Don't Corrupt**: Runtime adjustments are validated completely before
//     anything is mutated. A refused adjustment returns an error and leaves the
//     counter exactly as it was.

use crate::config::{CounterConfig, CounterKind, KindConfig, MAX_WINDOW_FRAMES};
use crate::core_modules::calibration_window::{CalibrationWindow, RollingWindow};
use crate::core_modules::pattern_detector::{PatternDetector, PatternKind};
use crate::core_modules::sample::{AuxLandmarks, Sample};
use crate::core_modules::state_machine::{CounterState, Direction, LogicType, RepStateMachine, StepInput, Transition};
use crate::core_modules::threshold_model::{
    AdjustDirection, MAX_SENSITIVITY, MIN_SENSITIVITY, SensitivityDirection, ThresholdModel, ThresholdSnapshot,
};
use crate::core_modules::validation::ValidationScorer;
use crate::error::{CounterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// The outcome of processing a single sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum Report {
    /// The sample was ignored (low confidence or not a finite number).
    Skipped,
    /// The warm-up window is still filling.
    Calibrating { collected: usize, required: usize },
    /// This sample completed the warm-up window.
    Calibrated { thresholds: ThresholdSnapshot },
    /// The state machine ran without completing a repetition.
    Tracking { transition: Transition },
    /// A repetition was counted.
    RepCompleted { count: u64 },
    /// A transition was due but the validation gate withheld it.
    PoorForm { validation_score: f64 },
}

/// A value handed to `set_parameter`, coerced to the parameter's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl ParamValue {
    /// Numbers and numeric text. Booleans are not numbers.
    pub fn to_f64(&self, name: &str) -> Result<f64> {
        let value = match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
            Self::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| CounterError::invalid(name, format!("`{text}` is not a number")))?,
            Self::Bool(_) => return Err(CounterError::invalid(name, "expected a number, got a boolean")),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CounterError::invalid(name, format!("expected a finite number, got {value}")))
        }
    }

    /// Strictly positive whole numbers (integral floats and numeric text included).
    pub fn to_positive_int(&self, name: &str) -> Result<u32> {
        let value = self.to_f64(name)?;
        if value.fract() != 0.0 || value < 1.0 || value > f64::from(u32::MAX) {
            return Err(CounterError::invalid(name, format!("expected a positive whole number, got {value}")));
        }
        Ok(value as u32)
    }

    pub fn to_bool(&self, name: &str) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            Self::Int(v) => Ok(*v != 0),
            Self::Float(v) if v.is_finite() => Ok(*v != 0.0),
            Self::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => Err(CounterError::invalid(name, format!("`{other}` is not a boolean"))),
            },
            Self::Float(v) => Err(CounterError::invalid(name, format!("`{v}` is not a boolean"))),
        }
    }

    pub fn to_text(&self, name: &str) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            other => Err(CounterError::invalid(name, format!("expected text, got `{other}`"))),
        }
    }
}

/// The record of a successful `set_parameter` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub name: String,
    pub old: ParamValue,
    pub new: ParamValue,
}

/// Read-only view of a counter for visualizers and UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub name: String,
    pub kind: CounterKind,
    pub logic_type: LogicType,
    pub direction: Direction,
    pub count: u64,
    pub state: CounterState,
    pub calibrated: bool,
    /// Fraction of the warm-up window filled, in `[0, 1]`.
    pub calibration_progress: f64,
    pub reference: Option<f64>,
    pub rest: Option<f64>,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    pub spread: Option<f64>,
    pub sensitivity: f64,
    pub dead_zone: Option<f64>,
    pub return_zone: Option<f64>,
    pub size_proxy: Option<f64>,
    pub stable_count: u32,
    pub validation_score: f64,
    pub poor_form: bool,
    pub last_value: Option<f64>,
    pub pattern: Option<PatternKind>,
}

/// Kind-specific runtime state.
#[derive(Debug, Clone)]
enum TargetState {
    Human { validation: ValidationScorer },
    Animal { sizes: RollingWindow },
    Object,
}

impl TargetState {
    fn from_config(config: &CounterConfig) -> Self {
        match &config.kind {
            KindConfig::Human(_) => Self::Human {
                validation: ValidationScorer::new(config.validation_settings().unwrap_or_default()),
            },
            KindConfig::Animal(animal) => Self::Animal {
                sizes: RollingWindow::new(animal.size_history),
            },
            KindConfig::Object(_) => Self::Object,
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Human { validation } => validation.reset(),
            Self::Animal { sizes } => sizes.clear(),
            Self::Object => {}
        }
    }
}

/// The motion counter for one target session.
#[derive(Debug, Clone)]
pub struct RepCounter {
    config: CounterConfig,
    target: TargetState,
    window: CalibrationWindow,
    model: Option<ThresholdModel>,
    machine: RepStateMachine,
    patterns: PatternDetector,

    // --- Session Output ---
    count: u64,
    validation_score: f64,
    poor_form: bool,
    last_value: Option<f64>,
    last_pattern: Option<PatternKind>,
}

impl RepCounter {
    pub fn new(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            target: TargetState::from_config(&config),
            window: CalibrationWindow::new(config.calibration_frames),
            model: None,
            machine: RepStateMachine::new(
                config.logic_type,
                config.direction,
                config.stable_frames,
                config.pattern_window as u32,
            ),
            patterns: PatternDetector::new(
                config.bounce_pattern_threshold,
                config.jump_pattern_threshold,
                config.pattern_window,
            ),
            count: 0,
            validation_score: 1.0,
            poor_form: false,
            last_value: None,
            last_pattern: None,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn state(&self) -> CounterState {
        self.machine.state()
    }

    pub fn is_calibrated(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&ThresholdModel> {
        self.model.as_ref()
    }

    pub fn thresholds(&self) -> Option<ThresholdSnapshot> {
        self.model.as_ref().map(ThresholdModel::thresholds)
    }

    pub fn validation_score(&self) -> f64 {
        self.validation_score
    }

    /// Processes one frame and returns the cumulative count.
    pub fn update(&mut self, sample: Sample, aux: Option<&AuxLandmarks>) -> u64 {
        self.process(sample, aux);
        self.count
    }

    /// Processes one frame and reports what happened.
    pub fn process(&mut self, sample: Sample, aux: Option<&AuxLandmarks>) -> Report {
        let empty = AuxLandmarks::new();
        let aux = aux.unwrap_or(&empty);

        // Stage 1: Confidence Gate
        if !sample.value.is_finite() || !(sample.confidence >= self.config.min_confidence) {
            return Report::Skipped;
        }
        self.last_value = Some(sample.value);

        // Stage 2: Size Proxy Bookkeeping
        if let (TargetState::Animal { sizes }, Some(size)) = (&mut self.target, sample.size) {
            if size.is_finite() && size > 0.0 {
                sizes.push(size);
            }
        }

        // Stage 3: Movement History
        self.patterns.observe(sample.value, sample.horizontal);

        let Some(model) = self.model.as_ref() else {
            return self.calibrate(sample.value, aux);
        };

        // Stage 4: Validation Gate
        let deviation = sample.value - model.reference();
        let (score, gate_open) = match &mut self.target {
            TargetState::Human { validation } => {
                let score = validation.score(aux, deviation, model.scaled_spread());
                (score, validation.passes(score))
            }
            TargetState::Animal { .. } | TargetState::Object => (1.0, true),
        };
        self.validation_score = score;

        // Stage 5: Pattern Classification
        self.last_pattern = self.patterns.classify();

        // Stage 6: State Machine
        let transition = self.machine.step(
            Some(model),
            StepInput {
                value: sample.value,
                gate_open,
                pattern: self.last_pattern,
            },
        );

        match transition {
            Transition::Completed => {
                self.count += 1;
                self.poor_form = false;
                info!(counter = %self.config.name, count = self.count, validation_score = score, "Repetition counted");
                Report::RepCompleted { count: self.count }
            }
            Transition::Withheld { blocked } => {
                self.poor_form = true;
                debug!(counter = %self.config.name, %blocked, validation_score = score, "Poor form detected");
                Report::PoorForm { validation_score: score }
            }
            transition => {
                if transition != Transition::Idle {
                    self.poor_form = false;
                }
                Report::Tracking { transition }
            }
        }
    }

    fn calibrate(&mut self, value: f64, aux: &AuxLandmarks) -> Report {
        self.window.push(value);
        if let TargetState::Human { validation } = &mut self.target {
            validation.collect(aux);
        }

        let size_proxy = match &self.target {
            TargetState::Animal { sizes } => sizes.median(),
            TargetState::Human { .. } | TargetState::Object => None,
        };
        let Some(model) = self.config.calibrator().calibrate(&self.window, size_proxy) else {
            return Report::Calibrating {
                collected: self.window.len(),
                required: self.window.capacity(),
            };
        };

        if let TargetState::Human { validation } = &mut self.target {
            validation.finalize();
        }
        let thresholds = model.thresholds();
        info!(
            counter = %self.config.name,
            logic = %self.config.logic_type,
            rest = model.rest(),
            reference = thresholds.reference,
            upper = thresholds.upper,
            lower = thresholds.lower,
            size_proxy = ?model.size_proxy(),
            "Calibration complete"
        );
        self.model = Some(model);
        self.machine.begin();
        Report::Calibrated { thresholds }
    }

    /// Nudges the reference line by `amount` towards the top or bottom of the frame.
    pub fn adjust_reference(&mut self, direction: AdjustDirection, amount: f64) -> Result<ThresholdSnapshot> {
        self.adjust_model("adjust_reference", |model| model.adjust(direction, amount))
    }

    /// Places the reference line at an absolute position.
    pub fn set_reference(&mut self, position: f64) -> Result<ThresholdSnapshot> {
        self.adjust_model("set_reference", |model| model.set_absolute(position))
    }

    /// Sets the absolute sensitivity multiplier (clamped to `[0.3, 3.0]`).
    pub fn set_sensitivity(&mut self, multiplier: f64) -> Result<ThresholdSnapshot> {
        self.adjust_model("set_sensitivity", |model| model.set_sensitivity(multiplier))
    }

    /// Makes detection more (`Increase`) or less (`Decrease`) sensitive by `factor`.
    pub fn nudge_sensitivity(&mut self, direction: SensitivityDirection, factor: f64) -> Result<ThresholdSnapshot> {
        self.adjust_model("nudge_sensitivity", |model| model.nudge_sensitivity(direction, factor))
    }

    /// Restores the calibrated lines and a neutral sensitivity; the count is kept.
    pub fn reset_to_auto_calibration(&mut self) -> Result<ThresholdSnapshot> {
        self.adjust_model("reset_to_auto_calibration", |model| Ok(model.reset_to_auto()))
    }

    fn adjust_model<F>(&mut self, operation: &str, apply: F) -> Result<ThresholdSnapshot>
    where
        F: FnOnce(&mut ThresholdModel) -> Result<ThresholdSnapshot>,
    {
        let Some(model) = self.model.as_mut() else {
            warn!(counter = %self.config.name, operation, "Adjustment rejected: counter is not calibrated");
            return Err(CounterError::NotCalibrated);
        };
        match apply(&mut *model) {
            Ok(thresholds) => {
                self.config.sensitivity_multiplier = model.sensitivity();
                info!(counter = %self.config.name, operation, %thresholds, sensitivity = model.sensitivity(), "Thresholds adjusted");
                Ok(thresholds)
            }
            Err(err) => {
                warn!(counter = %self.config.name, operation, error = %err, "Adjustment rejected");
                Err(err)
            }
        }
    }

    /// Zeroes the count and starts a fresh calibration.
    pub fn reset(&mut self) {
        self.count = 0;
        self.restart_calibration();
        info!(counter = %self.config.name, "Counter reset");
    }

    /// Discards thresholds and warm-up data but keeps the count.
    fn restart_calibration(&mut self) {
        self.window.reset(Some(self.config.calibration_frames));
        self.model = None;
        self.machine.restart_calibration();
        self.patterns.reset();
        self.target.reset();
        self.validation_score = 1.0;
        self.poor_form = false;
        self.last_pattern = None;
    }

    /// Sets a named parameter, coercing `value` to the parameter's type.
    ///
    /// Unknown names, parameters this kind of counter does not carry, and values
    /// that fail coercion or range checks are rejected with the counter unchanged.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<ParameterChange> {
        let value = value.into();
        let result = self.apply_parameter(name, &value);
        match &result {
            Ok(change) => info!(counter = %self.config.name, parameter = name, old = %change.old, new = %change.new, "Parameter updated"),
            Err(err) => warn!(counter = %self.config.name, parameter = name, value = %value, error = %err, "Parameter rejected"),
        }
        result
    }

    fn apply_parameter(&mut self, name: &str, value: &ParamValue) -> Result<ParameterChange> {
        let kind = self.config.counter_kind();
        let change = |old: ParamValue, new: ParamValue| ParameterChange {
            name: name.to_string(),
            old,
            new,
        };

        match name {
            "threshold" => {
                let threshold = value.to_f64(name)?;
                if threshold <= 0.0 {
                    return Err(CounterError::invalid(name, "must be positive"));
                }
                if let Some(model) = self.model.as_mut() {
                    model.set_base_threshold(threshold)?;
                }
                let old = std::mem::replace(&mut self.config.threshold, threshold);
                Ok(change(old.into(), threshold.into()))
            }
            "stable_frames" => {
                let frames = value.to_positive_int(name)?;
                self.machine.set_stable_frames(frames);
                let old = std::mem::replace(&mut self.config.stable_frames, frames);
                Ok(change(old.into(), frames.into()))
            }
            "calibration_frames" => {
                let frames = window_len(name, value.to_positive_int(name)?)?;
                let old = std::mem::replace(&mut self.config.calibration_frames, frames);
                if self.model.is_none() {
                    self.restart_calibration();
                }
                Ok(change((old as u32).into(), (frames as u32).into()))
            }
            "min_confidence" | "min_visibility" => {
                let min_confidence = unit_interval(name, value.to_f64(name)?)?;
                if let TargetState::Human { validation } = &mut self.target {
                    validation.set_min_visibility(min_confidence);
                }
                let old = std::mem::replace(&mut self.config.min_confidence, min_confidence);
                Ok(change(old.into(), min_confidence.into()))
            }
            "sensitivity_multiplier" | "sensitivity" => {
                let multiplier = value.to_f64(name)?;
                let applied = match self.model.as_mut() {
                    Some(model) => {
                        model.set_sensitivity(multiplier)?;
                        model.sensitivity()
                    }
                    None if multiplier > 0.0 => multiplier.max(MIN_SENSITIVITY).min(MAX_SENSITIVITY),
                    None => return Err(CounterError::invalid(name, "must be positive")),
                };
                let old = std::mem::replace(&mut self.config.sensitivity_multiplier, applied);
                Ok(change(old.into(), applied.into()))
            }
            "direction" => {
                let direction: Direction = value.to_text(name)?.parse()?;
                self.machine.set_direction(direction);
                let old = std::mem::replace(&mut self.config.direction, direction);
                Ok(change(old.as_str().into(), direction.as_str().into()))
            }
            "logic_type" => {
                let logic_type: LogicType = value.to_text(name)?.parse()?;
                let old = std::mem::replace(&mut self.config.logic_type, logic_type);
                self.machine.set_logic_type(logic_type);
                self.restart_calibration();
                Ok(change(old.as_str().into(), logic_type.as_str().into()))
            }
            "pattern_window" => {
                let window = value.to_positive_int(name)?;
                window_len(name, window)?;
                if window < 2 {
                    return Err(CounterError::invalid(name, "must be at least 2"));
                }
                self.patterns.oscillation_window = window as usize;
                self.machine.set_cooldown_frames(window);
                let old = std::mem::replace(&mut self.config.pattern_window, window as usize);
                Ok(change((old as u32).into(), window.into()))
            }
            "bounce_pattern_threshold" | "jump_pattern_threshold" => {
                let threshold = value.to_f64(name)?;
                if threshold <= 0.0 {
                    return Err(CounterError::invalid(name, "must be positive"));
                }
                let (field, detector) = if name == "bounce_pattern_threshold" {
                    (&mut self.config.bounce_pattern_threshold, &mut self.patterns.bounce_threshold)
                } else {
                    (&mut self.config.jump_pattern_threshold, &mut self.patterns.jump_threshold)
                };
                *detector = threshold;
                let old = std::mem::replace(field, threshold);
                Ok(change(old.into(), threshold.into()))
            }
            "enable_anti_cheat" | "validation_threshold" | "min_validation_score" => {
                let (KindConfig::Human(human), TargetState::Human { validation }) = (&mut self.config.kind, &mut self.target)
                else {
                    return Err(CounterError::UnsupportedParameter {
                        name: name.to_string(),
                        kind: kind.as_str(),
                    });
                };
                match name {
                    "enable_anti_cheat" => {
                        let enabled = value.to_bool(name)?;
                        validation.set_enabled(enabled);
                        let old = std::mem::replace(&mut human.enable_anti_cheat, enabled);
                        Ok(change(old.into(), enabled.into()))
                    }
                    "validation_threshold" => {
                        let threshold = value.to_f64(name)?;
                        if threshold <= 0.0 {
                            return Err(CounterError::invalid(name, "must be positive"));
                        }
                        validation.set_validation_threshold(threshold);
                        let old = std::mem::replace(&mut human.validation_threshold, threshold);
                        Ok(change(old.into(), threshold.into()))
                    }
                    _ => {
                        let min_score = unit_interval(name, value.to_f64(name)?)?;
                        validation.set_min_score(min_score);
                        let old = std::mem::replace(&mut human.min_validation_score, min_score);
                        Ok(change(old.into(), min_score.into()))
                    }
                }
            }
            "size_history" => {
                let (KindConfig::Animal(animal), TargetState::Animal { sizes }) = (&mut self.config.kind, &mut self.target)
                else {
                    return Err(CounterError::UnsupportedParameter {
                        name: name.to_string(),
                        kind: kind.as_str(),
                    });
                };
                let capacity = value.to_positive_int(name)?;
                sizes.set_capacity(window_len(name, capacity)?);
                let old = std::mem::replace(&mut animal.size_history, capacity as usize);
                Ok(change((old as u32).into(), capacity.into()))
            }
            unknown => Err(CounterError::UnknownParameter(unknown.to_string())),
        }
    }

    /// A read-only view of the counter.
    pub fn snapshot(&self) -> DebugSnapshot {
        let model = self.model.as_ref();
        DebugSnapshot {
            name: self.config.name.clone(),
            kind: self.config.counter_kind(),
            logic_type: self.machine.logic_type(),
            direction: self.machine.direction(),
            count: self.count,
            state: self.machine.state(),
            calibrated: model.is_some(),
            calibration_progress: if model.is_some() {
                1.0
            } else {
                self.window.len() as f64 / self.window.capacity() as f64
            },
            reference: model.map(ThresholdModel::reference),
            rest: model.map(ThresholdModel::rest),
            upper: model.map(ThresholdModel::upper),
            lower: model.map(ThresholdModel::lower),
            spread: model.map(ThresholdModel::scaled_spread),
            sensitivity: model.map_or(self.config.sensitivity_multiplier, ThresholdModel::sensitivity),
            dead_zone: model.map(ThresholdModel::dead_zone),
            return_zone: model.map(ThresholdModel::return_zone),
            size_proxy: model.and_then(ThresholdModel::size_scale),
            stable_count: self.machine.stable_count(),
            validation_score: self.validation_score,
            poor_form: self.poor_form,
            last_value: self.last_value,
            pattern: self.last_pattern,
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CounterError::invalid(name, format!("expected a value within [0, 1], got {value}")))
    }
}

fn window_len(name: &str, frames: u32) -> Result<usize> {
    let frames = frames as usize;
    if frames <= MAX_WINDOW_FRAMES {
        Ok(frames)
    } else {
        Err(CounterError::invalid(name, format!("at most {MAX_WINDOW_FRAMES} frames, got {frames}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated_squat() -> RepCounter {
        let mut counter = RepCounter::new(CounterConfig::human("squat")).expect("valid config");
        for i in 0..30 {
            counter.update(Sample::new(0.5, i as f64 / 30.0, 0.99), None);
        }
        counter
    }

    #[test]
    fn low_confidence_samples_are_skipped() {
        let mut counter = RepCounter::new(CounterConfig::human("squat")).expect("valid config");
        assert_eq!(counter.process(Sample::new(0.5, 0.0, 0.1), None), Report::Skipped);
        assert_eq!(counter.process(Sample::new(f64::NAN, 0.0, 0.99), None), Report::Skipped);
        assert_eq!(counter.snapshot().calibration_progress, 0.0);
    }

    #[test]
    fn calibration_reports_progress_then_thresholds() {
        let mut counter = RepCounter::new(CounterConfig::human("squat")).expect("valid config");
        let first = counter.process(Sample::new(0.5, 0.0, 0.99), None);
        assert_eq!(first, Report::Calibrating { collected: 1, required: 30 });
        for _ in 1..29 {
            counter.process(Sample::new(0.5, 0.0, 0.99), None);
        }
        let last = counter.process(Sample::new(0.5, 0.0, 0.99), None);
        assert!(matches!(last, Report::Calibrated { .. }));
        assert_eq!(counter.state(), CounterState::Start);
    }

    #[test]
    fn adjustments_before_calibration_are_rejected() {
        let mut counter = RepCounter::new(CounterConfig::human("squat")).expect("valid config");
        assert!(matches!(counter.set_sensitivity(2.0), Err(CounterError::NotCalibrated)));
        assert!(matches!(
            counter.adjust_reference(AdjustDirection::Up, 0.1),
            Err(CounterError::NotCalibrated)
        ));
        assert!(!counter.is_calibrated());
    }

    #[test]
    fn parameter_coercion() {
        let mut counter = calibrated_squat();
        let change = counter.set_parameter("stable_frames", "4").expect("numeric text");
        assert_eq!(change.old, ParamValue::Int(3));
        assert_eq!(change.new, ParamValue::Int(4));
        assert!(counter.set_parameter("enable_anti_cheat", "false").is_ok());
        assert!(counter.set_parameter("threshold", 0.2).is_ok());
        assert_eq!(counter.config().threshold, 0.2);
    }

    #[test]
    fn bad_parameters_leave_counter_unchanged() {
        let mut counter = calibrated_squat();
        let before = counter.snapshot();
        assert!(matches!(counter.set_parameter("threshold", true), Err(CounterError::InvalidValue { .. })));
        assert!(matches!(counter.set_parameter("threshold", "abc"), Err(CounterError::InvalidValue { .. })));
        assert!(matches!(counter.set_parameter("stable_frames", 2.5), Err(CounterError::InvalidValue { .. })));
        assert!(matches!(counter.set_parameter("warp_speed", 1.0), Err(CounterError::UnknownParameter(_))));
        assert!(matches!(
            counter.set_parameter("calibration_frames", 4_000_000_000_i64),
            Err(CounterError::InvalidValue { .. })
        ));
        assert!(matches!(
            counter.set_parameter("pattern_window", 50_000_i64),
            Err(CounterError::InvalidValue { .. })
        ));
        assert!(matches!(
            counter.set_parameter("size_history", 10_i64),
            Err(CounterError::UnsupportedParameter { .. })
        ));
        assert_eq!(counter.snapshot(), before);
    }

    #[test]
    fn logic_type_change_recalibrates_and_keeps_count() {
        let mut counter = calibrated_squat();
        for v in [0.7, 0.5] {
            counter.update(Sample::new(v, 0.0, 0.99), None);
        }
        assert_eq!(counter.count(), 1);
        counter.set_parameter("logic_type", "generic_movement").expect("known logic type");
        assert!(!counter.is_calibrated());
        assert_eq!(counter.state(), CounterState::Calibrating);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn reset_zeroes_count() {
        let mut counter = calibrated_squat();
        for v in [0.7, 0.5] {
            counter.update(Sample::new(v, 0.0, 0.99), None);
        }
        counter.reset();
        assert_eq!(counter.count(), 0);
        assert!(!counter.is_calibrated());
    }

    #[test]
    fn snapshot_serializes_with_configuration_names() {
        let mut counter = calibrated_squat();
        counter.update(Sample::new(0.7, 1.0, 0.99), None);
        let json = serde_json::to_value(counter.snapshot()).expect("serializable");
        assert_eq!(json["state"], "down");
        assert_eq!(json["logic_type"], "vertical_movement");
        assert_eq!(json["direction"], "down-first");
        assert_eq!(json["kind"], "human");

        let report = serde_json::to_value(Report::RepCompleted { count: 2 }).expect("serializable");
        assert_eq!(report["report"], "rep_completed");
    }
}
