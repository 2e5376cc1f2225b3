// THEORY:
// The `ValidationScorer` is the engine's anti-cheat layer for pose targets. A real
// repetition moves the whole body coherently: when the tracked shoulder drops, the
// other shoulder and the mouth drop with it. A "cheated" repetition (bobbing one
// hand in front of the camera, tilting the head) moves the primary landmark alone.
//
// Key architectural principles:
// 1.  **Learned Rest Pose**: During the same warm-up window the calibrator uses, the
//     scorer records every visible secondary landmark and keeps the median as that
//     landmark's rest value. Landmarks never seen during warm-up are ignored.
// 2.  **Coherence, Not Magnitude**: Each secondary landmark votes "valid" when its
//     own movement agrees with the primary's: moving in the same direction while
//     the primary is moving, staying still while the primary is at rest.
// 3.  **Gate, Not Counter**: The score only opens or closes a gate on the state
//     machine. A closed gate withholds a transition ("poor form"); it never
//     subtracts from the count or corrupts the state.

use crate::core_modules::calibration_window::window_stats;
use crate::core_modules::sample::{AuxLandmarks, LandmarkId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_VALIDATION_THRESHOLD: f64 = 0.02;
pub const DEFAULT_MIN_VALIDATION_SCORE: f64 = 0.4;
/// While the primary is at rest, secondaries may drift this many validation thresholds.
const REST_DRIFT_ALLOWANCE: f64 = 2.0;

/// Tunables of the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    pub landmarks: Vec<LandmarkId>,
    pub enabled: bool,
    /// Minimum secondary movement that counts as "moving".
    pub validation_threshold: f64,
    /// Minimum score for the gate to open.
    pub min_score: f64,
    /// Secondary readings at or below this visibility are ignored.
    pub min_visibility: f64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            landmarks: Vec::new(),
            enabled: true,
            validation_threshold: DEFAULT_VALIDATION_THRESHOLD,
            min_score: DEFAULT_MIN_VALIDATION_SCORE,
            min_visibility: 0.5,
        }
    }
}

/// The per-landmark outcome of the latest scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub landmark: LandmarkId,
    /// The calibrated rest value.
    pub rest: f64,
    /// Live movement from rest, when the landmark was visible this frame.
    pub delta: Option<f64>,
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct ValidationScorer {
    settings: ValidationSettings,
    warmup_readings: BTreeMap<LandmarkId, Vec<f64>>,
    rest_values: BTreeMap<LandmarkId, f64>,
    records: Vec<ValidationRecord>,
    last_score: f64,
}

impl ValidationScorer {
    pub fn new(settings: ValidationSettings) -> Self {
        Self {
            settings,
            warmup_readings: BTreeMap::new(),
            rest_values: BTreeMap::new(),
            records: Vec::new(),
            last_score: 1.0,
        }
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn set_validation_threshold(&mut self, threshold: f64) {
        self.settings.validation_threshold = threshold;
    }

    pub fn set_min_score(&mut self, min_score: f64) {
        self.settings.min_score = min_score;
    }

    pub fn set_min_visibility(&mut self, min_visibility: f64) {
        self.settings.min_visibility = min_visibility;
    }

    pub fn last_score(&self) -> f64 {
        self.last_score
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    pub fn rest_value(&self, landmark: LandmarkId) -> Option<f64> {
        self.rest_values.get(&landmark).copied()
    }

    /// Records one warm-up frame of secondary landmarks.
    pub fn collect(&mut self, aux: &AuxLandmarks) {
        for id in &self.settings.landmarks {
            if let Some(reading) = aux.get(id) {
                if reading.visibility > self.settings.min_visibility {
                    self.warmup_readings.entry(*id).or_default().push(reading.value);
                }
            }
        }
    }

    /// Turns the warm-up readings into rest values (medians).
    pub fn finalize(&mut self) {
        self.rest_values = self
            .warmup_readings
            .iter()
            .filter_map(|(id, readings)| window_stats::median(readings).map(|rest| (*id, rest)))
            .collect();
        self.warmup_readings.clear();
    }

    /// Forgets everything learned during warm-up.
    pub fn reset(&mut self) {
        self.warmup_readings.clear();
        self.rest_values.clear();
        self.records.clear();
        self.last_score = 1.0;
    }

    /// Scores the frame in `[0, 1]`.
    ///
    /// `primary_deviation` is the primary landmark's signed movement from its
    /// reference; `primary_threshold` is the movement that counts as "moving".
    pub fn score(&mut self, aux: &AuxLandmarks, primary_deviation: f64, primary_threshold: f64) -> f64 {
        self.records.clear();
        if !self.settings.enabled || self.settings.landmarks.is_empty() {
            self.last_score = 1.0;
            return self.last_score;
        }

        let primary_moving = primary_deviation.abs() > primary_threshold;
        let threshold = self.settings.validation_threshold;
        let (mut valid, mut counted) = (0usize, 0usize);

        for id in &self.settings.landmarks {
            let Some(rest) = self.rest_values.get(id).copied() else {
                continue;
            };
            let live = aux
                .get(id)
                .filter(|reading| reading.visibility > self.settings.min_visibility);
            let Some(reading) = live else {
                self.records.push(ValidationRecord {
                    landmark: *id,
                    rest,
                    delta: None,
                    valid: false,
                });
                continue;
            };

            let delta = reading.value - rest;
            let is_valid = if primary_moving {
                delta.abs() > threshold && delta.signum() == primary_deviation.signum()
            } else {
                delta.abs() < threshold * REST_DRIFT_ALLOWANCE
            };

            counted += 1;
            if is_valid {
                valid += 1;
            }
            self.records.push(ValidationRecord {
                landmark: *id,
                rest,
                delta: Some(delta),
                valid: is_valid,
            });
        }

        self.last_score = if counted == 0 {
            1.0
        } else {
            valid as f64 / counted as f64
        };
        self.last_score
    }

    /// `true` when a score is good enough for transitions to fire.
    pub fn passes(&self, score: f64) -> bool {
        score >= self.settings.min_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::sample::AuxLandmark;

    const LEFT_SHOULDER: LandmarkId = 11;
    const RIGHT_SHOULDER: LandmarkId = 12;

    fn frame(left: f64, right: f64) -> AuxLandmarks {
        AuxLandmarks::from([
            (LEFT_SHOULDER, AuxLandmark::new(left, 0.99)),
            (RIGHT_SHOULDER, AuxLandmark::new(right, 0.99)),
        ])
    }

    fn calibrated_scorer() -> ValidationScorer {
        let mut scorer = ValidationScorer::new(ValidationSettings {
            landmarks: vec![LEFT_SHOULDER, RIGHT_SHOULDER],
            min_visibility: 0.9,
            ..ValidationSettings::default()
        });
        for _ in 0..30 {
            scorer.collect(&frame(0.4, 0.4));
        }
        scorer.finalize();
        scorer
    }

    #[test]
    fn rest_values_are_warmup_medians() {
        let scorer = calibrated_scorer();
        assert_eq!(scorer.rest_value(LEFT_SHOULDER), Some(0.4));
        assert_eq!(scorer.rest_value(99), None);
    }

    #[test]
    fn coherent_movement_scores_full() {
        let mut scorer = calibrated_scorer();
        let score = scorer.score(&frame(0.6, 0.6), 0.2, 0.1);
        assert_eq!(score, 1.0);
        assert!(scorer.passes(score));
    }

    #[test]
    fn static_secondaries_fail_while_primary_moves() {
        let mut scorer = calibrated_scorer();
        let score = scorer.score(&frame(0.4, 0.4), 0.2, 0.1);
        assert_eq!(score, 0.0);
        assert!(!scorer.passes(score));
    }

    #[test]
    fn opposite_direction_is_invalid() {
        let mut scorer = calibrated_scorer();
        assert_eq!(scorer.score(&frame(0.6, 0.2), 0.2, 0.1), 0.5);
    }

    #[test]
    fn invisible_landmarks_are_not_counted() {
        let mut scorer = calibrated_scorer();
        let mut aux = frame(0.4, 0.4);
        aux.insert(RIGHT_SHOULDER, AuxLandmark::new(0.9, 0.2));
        assert_eq!(scorer.score(&aux, 0.0, 0.1), 1.0);
        assert_eq!(scorer.records().len(), 2);
        assert_eq!(scorer.records()[1].delta, None);
    }

    #[test]
    fn disabled_scorer_always_passes() {
        let mut scorer = calibrated_scorer();
        scorer.set_enabled(false);
        assert_eq!(scorer.score(&frame(0.4, 0.4), 0.3, 0.1), 1.0);
    }
}
