// THEORY:
// The `PatternDetector` is a secondary, threshold-free view of the target's motion.
// Where the state machine asks "which side of the line is the target on?", the
// detector asks "what shape did the last few frame-to-frame movements have?". It
// works purely on deltas, so it needs no calibration and is immune to a badly
// placed reference line.
//
// Key architectural principles:
// 1.  **Bounded Memory**: Deltas live in a fixed-capacity FIFO (`MovementHistory`);
//     the oldest delta is evicted when a new one arrives at capacity.
// 2.  **Read-Only Classification**: The `detect_*` methods and `classify` never
//     mutate anything and never touch the count. They report a shape; the state
//     machine decides whether that shape is a repetition.
// 3.  **Confirmed Shapes**: Bounce and jump require three consecutive deltas (a
//     confirming delta, the main movement, and the reversal), never just two, so a
//     single noisy frame can not fake a reversal.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const MOVEMENT_HISTORY_CAPACITY: usize = 20;
pub const DEFAULT_BOUNCE_THRESHOLD: f64 = 30.0;
pub const DEFAULT_JUMP_THRESHOLD: f64 = 50.0;
/// Number of most recent deltas inspected for oscillation.
pub const DEFAULT_OSCILLATION_WINDOW: usize = 6;

const BOUNCE_WINDOW: usize = 5;
const JUMP_WINDOW: usize = 4;
const BOUNCE_REBOUND_RATIO: f64 = 0.5;
const JUMP_REBOUND_RATIO: f64 = 0.3;
const MIN_SIGN_CHANGES: usize = 3;

/// Frame-to-frame movement. Positive vertical is down the frame, positive horizontal is right.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementDelta {
    pub vertical: f64,
    pub horizontal: f64,
}

/// The shapes the detector recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Bounce,
    Jump,
    Oscillation,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bounce => "bounce",
            Self::Jump => "jump",
            Self::Oscillation => "oscillation",
        }
    }
}

/// Bounded FIFO of recent movement deltas.
#[derive(Debug, Clone)]
pub struct MovementHistory {
    deltas: VecDeque<MovementDelta>,
    capacity: usize,
}

impl MovementHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            deltas: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, delta: MovementDelta) {
        self.deltas.push_back(delta);
        if self.deltas.len() > self.capacity {
            self.deltas.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.deltas.clear();
    }

    /// The last `n` deltas, oldest first. `None` if fewer than `n` are stored.
    pub fn recent(&self, n: usize) -> Option<impl Iterator<Item = &MovementDelta>> {
        if n == 0 || self.deltas.len() < n {
            return None;
        }
        Some(self.deltas.iter().skip(self.deltas.len() - n))
    }
}

/// History-window classifier for bounce, jump and oscillation shapes.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    history: MovementHistory,
    previous: Option<(f64, f64)>,
    /// Minimum downward delta of a bounce.
    pub bounce_threshold: f64,
    /// Minimum upward delta of a jump.
    pub jump_threshold: f64,
    /// Number of recent deltas inspected for oscillation.
    pub oscillation_window: usize,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNCE_THRESHOLD, DEFAULT_JUMP_THRESHOLD, DEFAULT_OSCILLATION_WINDOW)
    }
}

impl PatternDetector {
    pub fn new(bounce_threshold: f64, jump_threshold: f64, oscillation_window: usize) -> Self {
        Self {
            history: MovementHistory::new(MOVEMENT_HISTORY_CAPACITY),
            previous: None,
            bounce_threshold,
            jump_threshold,
            oscillation_window: oscillation_window.max(2),
        }
    }

    pub fn history(&self) -> &MovementHistory {
        &self.history
    }

    /// Records a new position. The first position only seeds the detector.
    pub fn observe(&mut self, vertical: f64, horizontal: Option<f64>) -> Option<MovementDelta> {
        let horizontal = horizontal.unwrap_or(0.0);
        let previous = self.previous.replace((vertical, horizontal))?;
        let delta = MovementDelta {
            vertical: vertical - previous.0,
            horizontal: horizontal - previous.1,
        };
        self.history.push(delta);
        Some(delta)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.previous = None;
    }

    /// A fall past the threshold, preceded by a downward delta and followed by a rise
    /// of at least half the threshold.
    pub fn detect_bounce(&self) -> bool {
        let threshold = self.bounce_threshold;
        self.scan_triples(BOUNCE_WINDOW, |prev, current, next| {
            current > threshold && next < -threshold * BOUNCE_REBOUND_RATIO && prev > 0.0
        })
    }

    /// A rise past the threshold, preceded by an upward delta and followed by a fall
    /// of at least 30% of the threshold.
    pub fn detect_jump(&self) -> bool {
        let threshold = self.jump_threshold;
        self.scan_triples(JUMP_WINDOW, |prev, current, next| {
            current < -threshold && next > threshold * JUMP_REBOUND_RATIO && prev < 0.0
        })
    }

    /// At least three direction reversals on either axis within the window.
    pub fn detect_oscillation(&self) -> bool {
        let Some(recent) = self.history.recent(self.oscillation_window) else {
            return false;
        };
        let recent: Vec<&MovementDelta> = recent.collect();
        let (mut vertical_changes, mut horizontal_changes) = (0, 0);
        for pair in recent.windows(2) {
            if (pair[1].vertical > 0.0) != (pair[0].vertical > 0.0) {
                vertical_changes += 1;
            }
            if (pair[1].horizontal > 0.0) != (pair[0].horizontal > 0.0) {
                horizontal_changes += 1;
            }
        }
        vertical_changes >= MIN_SIGN_CHANGES || horizontal_changes >= MIN_SIGN_CHANGES
    }

    /// First matching shape, checked in the order oscillation, bounce, jump.
    pub fn classify(&self) -> Option<PatternKind> {
        if self.detect_oscillation() {
            Some(PatternKind::Oscillation)
        } else if self.detect_bounce() {
            Some(PatternKind::Bounce)
        } else if self.detect_jump() {
            Some(PatternKind::Jump)
        } else {
            None
        }
    }

    fn scan_triples(&self, window: usize, matches: impl Fn(f64, f64, f64) -> bool) -> bool {
        let Some(recent) = self.history.recent(window) else {
            return false;
        };
        let vertical: Vec<f64> = recent.map(|d| d.vertical).collect();
        vertical.windows(3).any(|w| matches(w[0], w[1], w[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_with(vertical: &[f64]) -> PatternDetector {
        let mut detector = PatternDetector::default();
        let mut position = 500.0;
        detector.observe(position, None);
        for delta in vertical {
            position += delta;
            detector.observe(position, None);
        }
        detector
    }

    #[test]
    fn first_observation_only_seeds() {
        let mut detector = PatternDetector::default();
        assert!(detector.observe(10.0, Some(5.0)).is_none());
        let delta = detector.observe(14.0, Some(3.0)).expect("second observation");
        assert_eq!(delta.vertical, 4.0);
        assert_eq!(delta.horizontal, -2.0);
    }

    #[test]
    fn history_evicts_oldest() {
        let detector = detector_with(&[1.0; 25]);
        assert_eq!(detector.history().len(), MOVEMENT_HISTORY_CAPACITY);
    }

    #[test]
    fn bounce_needs_confirming_fall() {
        assert!(detector_with(&[0.0, 5.0, 40.0, -20.0, 0.0]).detect_bounce());
        // Same fall and rebound, but the fall is not confirmed by the delta before it.
        assert!(!detector_with(&[0.0, -5.0, 40.0, -20.0, 0.0]).detect_bounce());
        // Too little history.
        assert!(!detector_with(&[5.0, 40.0, -20.0]).detect_bounce());
    }

    #[test]
    fn jump_mirrors_bounce() {
        assert!(detector_with(&[-5.0, -60.0, 20.0, 0.0]).detect_jump());
        assert!(!detector_with(&[-5.0, -60.0, 10.0, 0.0]).detect_jump());
    }

    #[test]
    fn oscillation_counts_sign_changes() {
        let detector = detector_with(&[3.0, -3.0, 3.0, -3.0, 3.0, -3.0]);
        assert!(detector.detect_oscillation());
        assert_eq!(detector.classify(), Some(PatternKind::Oscillation));
        assert!(!detector_with(&[3.0, 3.0, -3.0, -3.0, -3.0, -3.0]).detect_oscillation());
    }
}
