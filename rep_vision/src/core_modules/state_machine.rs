// THEORY:
// The `RepStateMachine` is the central decision layer of the engine. It turns a
// continuous position signal into discrete repetitions. It is deliberately ignorant
// of *how* the lines were chosen (that is the `ThresholdModel`'s job) and of *why*
// a movement might be suspicious (that is the `ValidationScorer`'s job); it only
// knows where the sample is relative to the current lines.
//
// Key architectural principles:
// 1.  **Excursion Plus Return**: No rule family ever counts on a single crossing.
//     Every repetition needs an excursion that engages the machine *and* a confirmed
//     return to the starting zone. Lingering in the excursion zone never counts twice.
// 2.  **Sustained, Not Transient**: Families that track noisy detections (bounce,
//     jump, movement) require the return to hold for `stable_frames` consecutive
//     samples. Any non-qualifying sample resets the streak, never the count.
// 3.  **Pluggable Rule Families**: The `LogicType` selects a rule family at
//     configuration time; all families share the same states and the same
//     `Transition` vocabulary, so the owning counter treats them uniformly.
// 4.  **Conservative Ties**: Every comparison is strict. A sample exactly on a line
//     has not crossed it.
// 5.  **Returns Face Rest**: Every return condition is met by a target that comes
//     back to where it was calibrated. The jump return line therefore sits on the
//     jump side of the reference, a share of the jump height above it; samples still
//     past the jump line are ignored while airborne. The generic return zone scales
//     with the movement seen during warm-up.

use crate::core_modules::calibrator::ThresholdLayout;
use crate::core_modules::pattern_detector::PatternKind;
use crate::core_modules::threshold_model::ThresholdModel;
use crate::error::{CounterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// ============================================================================
// RULE CONSTANTS
// ============================================================================
/// Share of the `reference - upper` distance a jump must come back below the reference.
const JUMP_RETURN_RATIO: f64 = 0.3;
/// Return zone of generic movement as a share of the configured threshold.
const GENERIC_RETURN_THRESHOLD_RATIO: f64 = 0.3;
/// Return zone of generic movement as a share of the warm-up movement range.
const GENERIC_RETURN_RANGE_RATIO: f64 = 0.15;

/// The closed set of counter states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterState {
    /// Waiting for the warm-up window to fill.
    Calibrating,
    /// Calibrated and at rest; the state after every repetition.
    Start,
    Up,
    Down,
    Jumped,
    Moving,
    /// Ignoring the signal for a fixed number of frames after an oscillation count.
    Cooldown,
}

impl CounterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calibrating => "calibrating",
            Self::Start => "start",
            Self::Up => "up",
            Self::Down => "down",
            Self::Jumped => "jumped",
            Self::Moving => "moving",
            Self::Cooldown => "cooldown",
        }
    }

    pub fn is_engaged(&self) -> bool {
        matches!(self, Self::Up | Self::Down | Self::Jumped | Self::Moving)
    }
}

impl fmt::Display for CounterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule family drives the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicType {
    /// Cross a line in the configured direction, then return near the reference.
    VerticalMovement,
    /// Leave the ground past the bounce line, then land and stay near the ground.
    BounceDetection,
    /// Leave the dead zone *and* cross the target line, then settle back at rest.
    MovementDetection,
    /// Rise past the upper line, then come back down below the return line.
    JumpDetection,
    /// Leave the zone in either direction, then settle back at the reference.
    GenericMovement,
    /// Count direction reversals reported by the pattern detector.
    Oscillation,
}

impl LogicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerticalMovement => "vertical_movement",
            Self::BounceDetection => "bounce_detection",
            Self::MovementDetection => "movement_detection",
            Self::JumpDetection => "jump_detection",
            Self::GenericMovement => "generic_movement",
            Self::Oscillation => "oscillation",
        }
    }

    /// The line layout this family expects from calibration.
    pub fn layout(&self) -> ThresholdLayout {
        match self {
            Self::BounceDetection => ThresholdLayout::Ground,
            Self::MovementDetection => ThresholdLayout::OffsetTarget,
            Self::VerticalMovement | Self::JumpDetection | Self::GenericMovement | Self::Oscillation => {
                ThresholdLayout::Centered
            }
        }
    }
}

impl fmt::Display for LogicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicType {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "vertical_movement" | "vertical" => Ok(Self::VerticalMovement),
            "bounce_detection" | "bounce" => Ok(Self::BounceDetection),
            "movement_detection" => Ok(Self::MovementDetection),
            "jump_detection" | "jump" => Ok(Self::JumpDetection),
            "generic_movement" | "movement" => Ok(Self::GenericMovement),
            "oscillation" => Ok(Self::Oscillation),
            other => Err(CounterError::invalid("logic_type", format!("unknown logic type `{other}`"))),
        }
    }
}

/// The direction of the first half of a vertical repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// The tracked point first moves up the frame (pull-ups, jumps).
    UpFirst,
    /// The tracked point first moves down the frame (squats, push-ups).
    #[default]
    DownFirst,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpFirst => "up-first",
            Self::DownFirst => "down-first",
        }
    }

    fn engaged_state(&self) -> CounterState {
        match self {
            Self::UpFirst => CounterState::Up,
            Self::DownFirst => CounterState::Down,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "up-first" | "up" => Ok(Self::UpFirst),
            "down-first" | "down" => Ok(Self::DownFirst),
            other => Err(CounterError::invalid("direction", format!("unknown direction `{other}`"))),
        }
    }
}

/// What a single `step` did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    /// Nothing changed.
    Idle,
    /// The machine left `start` for an engaged state.
    Engaged { state: CounterState },
    /// A qualifying return sample; the repetition is not confirmed yet.
    Holding { stable_count: u32 },
    /// A non-qualifying sample broke the return streak.
    StabilityReset,
    /// A transition was due, but the validation gate was closed.
    Withheld { blocked: CounterState },
    /// A repetition finished. The owner adds exactly one to its count.
    Completed,
    /// The post-oscillation cooldown ended.
    CooledDown,
}

/// Everything a single step needs besides the thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInput {
    pub value: f64,
    /// `true` when the validation scorer allows transitions.
    pub gate_open: bool,
    /// The pattern detector's classification for this frame, if any.
    pub pattern: Option<PatternKind>,
}

impl StepInput {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            gate_open: true,
            pattern: None,
        }
    }
}

/// Threshold-crossing state machine for one counter.
#[derive(Debug, Clone)]
pub struct RepStateMachine {
    // --- Configuration ---
    logic_type: LogicType,
    direction: Direction,
    /// Consecutive qualifying samples needed to confirm a return.
    stable_frames: u32,
    /// Frames ignored after an oscillation count.
    cooldown_frames: u32,

    // --- Live State ---
    state: CounterState,
    stable_count: u32,
    cooldown_remaining: u32,
}

impl RepStateMachine {
    pub fn new(logic_type: LogicType, direction: Direction, stable_frames: u32, cooldown_frames: u32) -> Self {
        Self {
            logic_type,
            direction,
            stable_frames: stable_frames.max(1),
            cooldown_frames,
            state: CounterState::Calibrating,
            stable_count: 0,
            cooldown_remaining: 0,
        }
    }

    pub fn state(&self) -> CounterState {
        self.state
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn logic_type(&self) -> LogicType {
        self.logic_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn stable_frames(&self) -> u32 {
        self.stable_frames
    }

    pub fn cooldown_frames(&self) -> u32 {
        self.cooldown_frames
    }

    /// Leaves `calibrating` once thresholds exist.
    pub fn begin(&mut self) {
        self.state = CounterState::Start;
        self.stable_count = 0;
        self.cooldown_remaining = 0;
    }

    /// Returns to `calibrating` (after a reset or a rule-family change).
    pub fn restart_calibration(&mut self) {
        self.state = CounterState::Calibrating;
        self.stable_count = 0;
        self.cooldown_remaining = 0;
    }

    /// Switches the rule family. The caller is expected to recalibrate.
    pub fn set_logic_type(&mut self, logic_type: LogicType) {
        self.logic_type = logic_type;
        self.restart_calibration();
    }

    /// Switches the vertical direction; an in-progress excursion is abandoned.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
        if self.state != CounterState::Calibrating {
            self.begin();
        }
    }

    pub fn set_stable_frames(&mut self, stable_frames: u32) {
        self.stable_frames = stable_frames.max(1);
    }

    pub fn set_cooldown_frames(&mut self, cooldown_frames: u32) {
        self.cooldown_frames = cooldown_frames;
    }

    /// Advances the machine by one sample.
    ///
    /// Without a calibrated model this is a no-op returning `Transition::Idle`.
    pub fn step(&mut self, model: Option<&ThresholdModel>, input: StepInput) -> Transition {
        let Some(model) = model else {
            return Transition::Idle;
        };
        if self.state == CounterState::Calibrating {
            return Transition::Idle;
        }

        match self.logic_type {
            LogicType::VerticalMovement => self.step_vertical(model, input),
            LogicType::BounceDetection => self.step_bounce(model, input),
            LogicType::MovementDetection => self.step_movement_detection(model, input),
            LogicType::JumpDetection => self.step_jump(model, input),
            LogicType::GenericMovement => self.step_generic(model, input),
            LogicType::Oscillation => self.step_oscillation(input),
        }
    }

    fn step_vertical(&mut self, model: &ThresholdModel, input: StepInput) -> Transition {
        let value = input.value;
        let engaged = self.direction.engaged_state();
        match self.state {
            CounterState::Start => {
                let crossed = match self.direction {
                    Direction::UpFirst => value < model.upper(),
                    Direction::DownFirst => value > model.lower(),
                };
                if crossed {
                    self.engage(engaged, input.gate_open)
                } else {
                    Transition::Idle
                }
            }
            state if state == engaged => {
                if (value - model.reference()).abs() < model.return_tolerance() {
                    self.complete(input.gate_open)
                } else {
                    Transition::Idle
                }
            }
            _ => self.abandon(),
        }
    }

    fn step_bounce(&mut self, model: &ThresholdModel, input: StepInput) -> Transition {
        let value = input.value;
        match self.state {
            CounterState::Start => {
                if value < model.upper() {
                    self.engage(CounterState::Down, input.gate_open)
                } else {
                    Transition::Idle
                }
            }
            CounterState::Down => self.hold_or_reset(value > model.lower(), input.gate_open),
            _ => self.abandon(),
        }
    }

    fn step_movement_detection(&mut self, model: &ThresholdModel, input: StepInput) -> Transition {
        let value = input.value;
        let distance_from_rest = (value - model.rest()).abs();
        match self.state {
            CounterState::Start => {
                // Both gates: out of the dead zone *and* past the target line.
                if distance_from_rest > model.dead_zone() && value < model.reference() {
                    self.engage(CounterState::Jumped, input.gate_open)
                } else {
                    Transition::Idle
                }
            }
            CounterState::Jumped => self.hold_or_reset(distance_from_rest < model.return_zone(), input.gate_open),
            _ => self.abandon(),
        }
    }

    fn step_jump(&mut self, model: &ThresholdModel, input: StepInput) -> Transition {
        let value = input.value;
        match self.state {
            CounterState::Start => {
                if value < model.upper() {
                    self.engage(CounterState::Up, input.gate_open)
                } else {
                    Transition::Idle
                }
            }
            CounterState::Up if value < model.upper() => Transition::Idle,
            CounterState::Up => {
                let return_line = model.reference() - JUMP_RETURN_RATIO * (model.reference() - model.upper());
                self.hold_or_reset(value > return_line, input.gate_open)
            }
            _ => self.abandon(),
        }
    }

    fn step_generic(&mut self, model: &ThresholdModel, input: StepInput) -> Transition {
        let value = input.value;
        match self.state {
            CounterState::Start => {
                if value < model.upper() || value > model.lower() {
                    self.engage(CounterState::Moving, input.gate_open)
                } else {
                    Transition::Idle
                }
            }
            CounterState::Moving => {
                let return_zone = (model.base_threshold() * GENERIC_RETURN_THRESHOLD_RATIO)
                    .max(model.stats().range * GENERIC_RETURN_RANGE_RATIO);
                self.hold_or_reset((value - model.reference()).abs() < return_zone, input.gate_open)
            }
            _ => self.abandon(),
        }
    }

    fn step_oscillation(&mut self, input: StepInput) -> Transition {
        match self.state {
            CounterState::Start => {
                if input.pattern != Some(PatternKind::Oscillation) {
                    return Transition::Idle;
                }
                if !input.gate_open {
                    debug!(state = %self.state, "Oscillation withheld by validation gate");
                    return Transition::Withheld {
                        blocked: CounterState::Cooldown,
                    };
                }
                if self.cooldown_frames > 0 {
                    self.state = CounterState::Cooldown;
                    self.cooldown_remaining = self.cooldown_frames;
                }
                debug!(cooldown = self.cooldown_frames, "Oscillation counted");
                Transition::Completed
            }
            CounterState::Cooldown => {
                self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);
                if self.cooldown_remaining == 0 {
                    self.state = CounterState::Start;
                    Transition::CooledDown
                } else {
                    Transition::Idle
                }
            }
            _ => self.abandon(),
        }
    }

    fn engage(&mut self, state: CounterState, gate_open: bool) -> Transition {
        if !gate_open {
            debug!(from = %self.state, to = %state, "Transition withheld by validation gate");
            return Transition::Withheld { blocked: state };
        }
        debug!(from = %self.state, to = %state, logic = %self.logic_type, "State transition");
        self.state = state;
        self.stable_count = 0;
        Transition::Engaged { state }
    }

    fn complete(&mut self, gate_open: bool) -> Transition {
        if !gate_open {
            debug!(from = %self.state, "Repetition withheld by validation gate");
            return Transition::Withheld {
                blocked: CounterState::Start,
            };
        }
        debug!(from = %self.state, logic = %self.logic_type, "Repetition complete");
        self.state = CounterState::Start;
        self.stable_count = 0;
        Transition::Completed
    }

    /// Shared return handling of the stability-confirmed families.
    fn hold_or_reset(&mut self, qualifies: bool, gate_open: bool) -> Transition {
        if !qualifies {
            if self.stable_count == 0 {
                return Transition::Idle;
            }
            debug!(state = %self.state, stable_count = self.stable_count, "Stability reset");
            self.stable_count = 0;
            return Transition::StabilityReset;
        }

        self.stable_count = self.stable_count.saturating_add(1);
        if self.stable_count >= self.stable_frames {
            self.complete(gate_open)
        } else {
            Transition::Holding {
                stable_count: self.stable_count,
            }
        }
    }

    /// The machine is in a state the current family never produces (after a live
    /// family or direction change); start over from rest.
    fn abandon(&mut self) -> Transition {
        debug!(state = %self.state, logic = %self.logic_type, "Abandoning foreign state");
        self.begin();
        Transition::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::calibration_window::CalibrationWindow;
    use crate::core_modules::calibrator::{Calibrator, DetectionProfile, FrameBounds};

    fn pose_model(layout: ThresholdLayout) -> ThresholdModel {
        let calibrator = Calibrator {
            profile: DetectionProfile::pose_jitter(),
            layout,
            bounds: FrameBounds::normalized(),
            base_threshold: 0.1,
            ground_tolerance: 0.02,
            sensitivity: 1.0,
        };
        let mut window = CalibrationWindow::new(30);
        for _ in 0..30 {
            window.push(0.5);
        }
        calibrator.calibrate(&window, None).expect("full window")
    }

    fn machine(logic: LogicType, direction: Direction, stable: u32) -> RepStateMachine {
        let mut machine = RepStateMachine::new(logic, direction, stable, 6);
        machine.begin();
        machine
    }

    fn feed(machine: &mut RepStateMachine, model: &ThresholdModel, values: &[f64]) -> usize {
        values
            .iter()
            .map(|v| machine.step(Some(model), StepInput::new(*v)))
            .filter(|t| *t == Transition::Completed)
            .count()
    }

    #[test]
    fn uncalibrated_step_is_idle() {
        let mut machine = RepStateMachine::new(LogicType::VerticalMovement, Direction::UpFirst, 1, 0);
        assert_eq!(machine.step(None, StepInput::new(0.0)), Transition::Idle);
        assert_eq!(machine.state(), CounterState::Calibrating);
    }

    #[test]
    fn vertical_down_first_counts_once_per_cycle() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = machine(LogicType::VerticalMovement, Direction::DownFirst, 1);
        let reps = feed(&mut machine, &model, &[0.5, 0.7, 0.75, 0.7, 0.52, 0.5, 0.5]);
        assert_eq!(reps, 1);
        assert_eq!(machine.state(), CounterState::Start);
    }

    #[test]
    fn line_equality_is_not_a_crossing() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = machine(LogicType::VerticalMovement, Direction::DownFirst, 1);
        machine.step(Some(&model), StepInput::new(model.lower()));
        assert_eq!(machine.state(), CounterState::Start);
    }

    #[test]
    fn closed_gate_withholds_engagement() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = machine(LogicType::VerticalMovement, Direction::UpFirst, 1);
        let input = StepInput {
            value: 0.3,
            gate_open: false,
            pattern: None,
        };
        assert_eq!(
            machine.step(Some(&model), input),
            Transition::Withheld {
                blocked: CounterState::Up
            }
        );
        assert_eq!(machine.state(), CounterState::Start);
    }

    #[test]
    fn generic_movement_needs_stable_return() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = machine(LogicType::GenericMovement, Direction::DownFirst, 3);
        assert_eq!(feed(&mut machine, &model, &[0.75, 0.5, 0.5]), 0);
        assert_eq!(machine.stable_count(), 2);
        assert_eq!(machine.step(Some(&model), StepInput::new(0.7)), Transition::StabilityReset);
        assert_eq!(feed(&mut machine, &model, &[0.5, 0.5, 0.5]), 1);
    }

    #[test]
    fn jump_returns_below_return_line() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = machine(LogicType::JumpDetection, Direction::UpFirst, 2);
        assert_eq!(feed(&mut machine, &model, &[0.35]), 0);
        assert_eq!(machine.state(), CounterState::Up);
        // Return line is 0.47.
        assert_eq!(feed(&mut machine, &model, &[0.46, 0.48, 0.49]), 1);
    }

    #[test]
    fn jump_ignores_samples_still_in_the_air() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = machine(LogicType::JumpDetection, Direction::UpFirst, 2);
        feed(&mut machine, &model, &[0.35, 0.48]);
        assert_eq!(machine.stable_count(), 1);
        assert_eq!(machine.step(Some(&model), StepInput::new(0.38)), Transition::Idle);
        assert_eq!(machine.stable_count(), 1);
        assert_eq!(machine.step(Some(&model), StepInput::new(0.45)), Transition::StabilityReset);
        assert_eq!(feed(&mut machine, &model, &[0.49, 0.5]), 1);
    }

    #[test]
    fn oscillation_counts_then_cools_down() {
        let model = pose_model(ThresholdLayout::Centered);
        let mut machine = RepStateMachine::new(LogicType::Oscillation, Direction::DownFirst, 1, 2);
        machine.begin();
        let oscillating = StepInput {
            value: 0.5,
            gate_open: true,
            pattern: Some(PatternKind::Oscillation),
        };
        assert_eq!(machine.step(Some(&model), oscillating), Transition::Completed);
        assert_eq!(machine.state(), CounterState::Cooldown);
        assert_eq!(machine.step(Some(&model), oscillating), Transition::Idle);
        assert_eq!(machine.step(Some(&model), oscillating), Transition::CooledDown);
        assert_eq!(machine.state(), CounterState::Start);
    }

    #[test]
    fn names_parse_from_configuration_strings() {
        assert_eq!("up-first".parse::<Direction>().ok(), Some(Direction::UpFirst));
        assert_eq!("bounce_detection".parse::<LogicType>().ok(), Some(LogicType::BounceDetection));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
