// THEORY:
// The `ThresholdModel` is the live geometry of a calibrated counter: the resting
// position, the reference line, and the two detection lines around it. It is born
// from a `Calibrator` and afterwards only changes through explicit, interactive
// adjustments (nudging the line, changing sensitivity, resetting to auto).
//
// Key architectural principles:
// 1.  **Re-derive, Never Patch**: Every adjustment changes one *input* (reference,
//     sensitivity, base threshold) and then re-runs the full derivation with the
//     stored warm-up statistics and size proxy. Lines are never edited directly, so
//     the model can not drift into a state the calibrator would never produce.
// 2.  **Invariant Preservation**: After every mutation the zone is at least
//     `min_zone_width` wide and ordered (`upper < reference < lower`, or
//     `upper < lower < reference` for the ground layout). Calibration never moves the
//     reference: only the lines are fitted into the frame, and never past the
//     reference. Out-of-range results are clamped silently; only malformed input
//     (NaN, negative amounts) is rejected.
// 3.  **Derived Zones**: The dead zone, return zone and return tolerance used by the
//     state machine are computed on demand from the same inputs, so they always
//     agree with the current lines.

use crate::core_modules::calibration_window::WindowStats;
use crate::core_modules::calibrator::{Calibrator, DetectionProfile, SpreadStatistic, ThresholdLayout};
use crate::error::{CounterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_SENSITIVITY: f64 = 0.3;
pub const MAX_SENSITIVITY: f64 = 3.0;
/// Share of the scaled spread that counts as "back at the reference" for vertical counters.
pub const RETURN_TOLERANCE_RATIO: f64 = 0.5;

/// Direction of a reference-line nudge, in screen terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustDirection {
    /// Towards the top of the frame (smaller values).
    Up,
    /// Towards the bottom of the frame (larger values).
    Down,
}

impl FromStr for AdjustDirection {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(CounterError::invalid("direction", format!("expected `up` or `down`, got `{other}`"))),
        }
    }
}

/// Direction of a relative sensitivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityDirection {
    /// Smaller movements are detected.
    Increase,
    /// Larger movements are required.
    Decrease,
}

impl FromStr for SensitivityDirection {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "increase" => Ok(Self::Increase),
            "decrease" => Ok(Self::Decrease),
            other => Err(CounterError::invalid(
                "sensitivity",
                format!("expected `increase` or `decrease`, got `{other}`"),
            )),
        }
    }
}

/// The three lines handed back by every adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    pub reference: f64,
    pub upper: f64,
    pub lower: f64,
}

impl fmt::Display for ThresholdSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reference {:.3}, upper {:.3}, lower {:.3}", self.reference, self.upper, self.lower)
    }
}

/// Calibrated detection geometry for one counter session.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdModel {
    // --- Geometry ---
    rest: f64,
    reference: f64,
    upper: f64,
    lower: f64,
    /// Unscaled spread (before the sensitivity multiplier).
    spread: f64,
    sensitivity: f64,

    // --- Calibration Memory ---
    calibrated_rest: f64,
    calibrated_reference: f64,
    stats: WindowStats,
    size_proxy: Option<f64>,
    settings: Calibrator,
}

impl ThresholdModel {
    pub(crate) fn from_calibration(settings: Calibrator, stats: WindowStats, size_proxy: Option<f64>) -> Self {
        let sensitivity = clamp_sensitivity(settings.sensitivity);
        let mut model = Self {
            rest: stats.median,
            reference: stats.median,
            upper: stats.median,
            lower: stats.median,
            spread: 0.0,
            sensitivity,
            calibrated_rest: stats.median,
            calibrated_reference: stats.median,
            stats,
            size_proxy: size_proxy.filter(|h| h.is_finite() && *h > 0.0),
            settings,
        };
        model.reference = model.initial_reference();
        model.derive();
        model.calibrated_rest = model.rest;
        model.calibrated_reference = model.reference;
        model
    }

    pub fn rest(&self) -> f64 {
        self.rest
    }

    pub fn reference(&self) -> f64 {
        self.reference
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// The unscaled spread.
    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// The spread after the sensitivity multiplier.
    pub fn scaled_spread(&self) -> f64 {
        self.spread * self.sensitivity
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn base_threshold(&self) -> f64 {
        self.settings.base_threshold
    }

    pub fn layout(&self) -> ThresholdLayout {
        self.settings.layout
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }

    /// The measured size proxy, if one was available at calibration.
    pub fn size_proxy(&self) -> Option<f64> {
        self.size_proxy
    }

    pub fn thresholds(&self) -> ThresholdSnapshot {
        ThresholdSnapshot {
            reference: self.reference,
            upper: self.upper,
            lower: self.lower,
        }
    }

    /// Moves the reference line by `amount` towards the top (`Up`) or bottom (`Down`).
    pub fn adjust(&mut self, direction: AdjustDirection, amount: f64) -> Result<ThresholdSnapshot> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(CounterError::invalid("amount", format!("expected a finite, non-negative distance, got {amount}")));
        }
        let target = match direction {
            AdjustDirection::Up => self.reference - amount,
            AdjustDirection::Down => self.reference + amount,
        };
        Ok(self.move_reference(target))
    }

    /// Places the reference line at an absolute position.
    pub fn set_absolute(&mut self, position: f64) -> Result<ThresholdSnapshot> {
        if !position.is_finite() {
            return Err(CounterError::invalid("position", format!("expected a finite position, got {position}")));
        }
        Ok(self.move_reference(position))
    }

    /// Sets the absolute sensitivity multiplier, clamped to `[0.3, 3.0]`.
    pub fn set_sensitivity(&mut self, multiplier: f64) -> Result<ThresholdSnapshot> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(CounterError::invalid(
                "sensitivity_multiplier",
                format!("expected a positive number, got {multiplier}"),
            ));
        }
        self.sensitivity = clamp_sensitivity(multiplier);
        self.derive();
        Ok(self.thresholds())
    }

    /// Scales the multiplier by `1 - factor` (more sensitive) or `1 + factor` (less sensitive).
    pub fn nudge_sensitivity(&mut self, direction: SensitivityDirection, factor: f64) -> Result<ThresholdSnapshot> {
        if !factor.is_finite() || !(0.0..1.0).contains(&factor) {
            return Err(CounterError::invalid("factor", format!("expected a factor in [0, 1), got {factor}")));
        }
        let scaled = match direction {
            SensitivityDirection::Increase => self.sensitivity * (1.0 - factor),
            SensitivityDirection::Decrease => self.sensitivity * (1.0 + factor),
        };
        self.sensitivity = clamp_sensitivity(scaled);
        self.derive();
        Ok(self.thresholds())
    }

    /// Re-derives the lines with a new configured minimum movement.
    pub fn set_base_threshold(&mut self, threshold: f64) -> Result<ThresholdSnapshot> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(CounterError::invalid("threshold", format!("expected a positive number, got {threshold}")));
        }
        self.settings.base_threshold = threshold;
        self.derive();
        Ok(self.thresholds())
    }

    /// Restores the calibrated reference and rest and a neutral multiplier.
    pub fn reset_to_auto(&mut self) -> ThresholdSnapshot {
        self.rest = self.calibrated_rest;
        self.reference = self.calibrated_reference;
        self.sensitivity = 1.0;
        self.derive();
        self.thresholds()
    }

    /// Minimum distance from rest before a movement-detection counter engages.
    ///
    /// Without a size the floor is half a minimum zone, so it follows the frame's units.
    pub fn dead_zone(&self) -> f64 {
        match self.size_scale() {
            Some(height) => 15.0_f64.max(height * 0.1) * self.sensitivity,
            None => (self.settings.bounds.min_zone_width * 0.5).max(self.settings.base_threshold * 0.3),
        }
    }

    /// Distance from rest that counts as "back at rest" for movement detection.
    pub fn return_zone(&self) -> f64 {
        match self.size_scale() {
            Some(height) => (height * 0.2).max(30.0),
            None => (self.settings.bounds.min_zone_width * 1.25).max(self.settings.base_threshold * 0.5),
        }
    }

    /// Distance from the reference that counts as "returned" for vertical counters.
    pub fn return_tolerance(&self) -> f64 {
        self.scaled_spread() * RETURN_TOLERANCE_RATIO
    }

    /// The size proxy used for scaling, including the fallback height of size-driven profiles.
    pub fn size_scale(&self) -> Option<f64> {
        match self.settings.profile {
            DetectionProfile::SizeProxy(profile) => Some(
                self.size_proxy
                    .unwrap_or_else(|| (self.stats.std_dev * 2.0).max(profile.fallback_height)),
            ),
            DetectionProfile::Variance(_) => self.size_proxy,
        }
    }

    fn move_reference(&mut self, target: f64) -> ThresholdSnapshot {
        self.reference = self.settings.bounds.clamp(target);
        self.derive();
        if self.settings.layout != ThresholdLayout::OffsetTarget {
            self.rest = self.reference;
        }
        self.thresholds()
    }

    fn base_spread(&self) -> f64 {
        match self.settings.profile {
            DetectionProfile::SizeProxy(profile) => {
                let height = self.size_scale().unwrap_or(profile.fallback_height);
                let definitive = height * profile.definitive_ratio;
                let detectable = (height * profile.detectable_ratio * 2.0).max(profile.min_detectable_range) / 2.0;
                definitive.max(detectable)
            }
            DetectionProfile::Variance(profile) => {
                let statistic = match profile.statistic {
                    SpreadStatistic::StdDev => self.stats.std_dev,
                    SpreadStatistic::Range => self.stats.range,
                };
                (statistic * profile.multiplier).max(self.settings.base_threshold)
            }
        }
    }

    fn initial_reference(&self) -> f64 {
        match self.settings.layout {
            ThresholdLayout::Centered | ThresholdLayout::Ground => self.rest,
            ThresholdLayout::OffsetTarget => {
                // Without a size, the detectable range stands in for the target height.
                let height = self.size_scale().unwrap_or_else(|| self.base_spread() * 2.0);
                let (offset_ratio, min_ratio) = match self.settings.profile {
                    DetectionProfile::SizeProxy(profile) => (profile.reference_offset_ratio, profile.min_offset_ratio),
                    DetectionProfile::Variance(_) => (0.4, 0.2),
                };
                let reference = self.rest - height * offset_ratio;
                if self.rest - reference < height * min_ratio {
                    self.rest - height * min_ratio
                } else {
                    reference
                }
            }
        }
    }

    fn derive(&mut self) {
        self.spread = self.base_spread();
        let scaled = self.scaled_spread();
        let bounds = self.settings.bounds;

        match self.settings.layout {
            ThresholdLayout::Centered => {
                let (upper, lower) = bounds.fit_zone(self.reference - scaled, self.reference + scaled, self.reference);
                self.upper = upper;
                self.lower = lower;
            }
            ThresholdLayout::OffsetTarget => {
                let (upper, lower) =
                    bounds.fit_zone(self.reference - scaled * 0.5, self.reference + scaled * 2.0, self.reference);
                self.upper = upper;
                self.lower = lower;
            }
            ThresholdLayout::Ground => {
                // The near line is pinned to the ground; only the far line is clamped.
                let tolerance = self.settings.ground_tolerance * self.sensitivity;
                let width = bounds.min_zone_width;
                self.lower = self.reference - tolerance;
                self.upper = (self.reference - scaled).max(bounds.low()).min(self.lower - width);
            }
        }
    }
}

fn clamp_sensitivity(multiplier: f64) -> f64 {
    multiplier.max(MIN_SENSITIVITY).min(MAX_SENSITIVITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::calibration_window::CalibrationWindow;
    use crate::core_modules::calibrator::{FrameBounds, VarianceProfile};

    fn model(layout: ThresholdLayout, profile: DetectionProfile, bounds: FrameBounds, threshold: f64, values: &[f64], size: Option<f64>) -> ThresholdModel {
        let calibrator = Calibrator {
            profile,
            layout,
            bounds,
            base_threshold: threshold,
            ground_tolerance: 20.0,
            sensitivity: 1.0,
        };
        let mut window = CalibrationWindow::new(values.len());
        for v in values {
            window.push(*v);
        }
        calibrator.calibrate(&window, size).expect("full window")
    }

    fn pose_model() -> ThresholdModel {
        model(ThresholdLayout::Centered, DetectionProfile::pose_jitter(), FrameBounds::normalized(), 0.1, &[0.5; 30], None)
    }

    fn ball_model() -> ThresholdModel {
        let mut values = vec![900.0; 20];
        values.extend([700.0; 10]);
        model(ThresholdLayout::Ground, DetectionProfile::bounce_range(), FrameBounds::pixels(1080.0), 40.0, &values, None)
    }

    #[test]
    fn adjust_moves_reference_and_rest_together() {
        let mut m = pose_model();
        let snap = m.adjust(AdjustDirection::Up, 0.05).expect("valid");
        assert!((snap.reference - 0.45).abs() < 1e-12);
        assert_eq!(m.rest(), m.reference());
        assert!(snap.upper < snap.reference && snap.reference < snap.lower);
    }

    #[test]
    fn reference_is_clamped_inside_frame() {
        let mut m = pose_model();
        let snap = m.set_absolute(5.0).expect("valid");
        assert_eq!(snap.reference, 1.0);
        assert!(snap.upper < snap.reference && snap.reference < snap.lower);
        assert!(snap.lower - snap.upper >= 0.02 - 1e-12);
    }

    #[test]
    fn edge_rest_stays_inside_its_zone() {
        let m = model(
            ThresholdLayout::Centered,
            DetectionProfile::Variance(VarianceProfile {
                statistic: SpreadStatistic::StdDev,
                multiplier: 3.0,
            }),
            FrameBounds::pixels(1080.0),
            60.0,
            &[1045.0; 30],
            None,
        );
        assert_eq!(m.reference(), 1045.0);
        assert_eq!(m.rest(), 1045.0);
        assert_eq!(m.lower(), 1065.0);
        assert_eq!(m.upper(), 945.0);
    }

    #[test]
    fn ground_near_the_top_keeps_its_lines_ordered() {
        let m = model(ThresholdLayout::Ground, DetectionProfile::bounce_range(), FrameBounds::pixels(1080.0), 40.0, &[80.0; 30], None);
        assert_eq!(m.reference(), 80.0);
        assert_eq!(m.lower(), 60.0);
        assert_eq!(m.upper(), 20.0);
    }

    #[test]
    fn invalid_input_leaves_model_unchanged() {
        let mut m = pose_model();
        let before = m.clone();
        assert!(m.set_sensitivity(f64::NAN).is_err());
        assert!(m.set_sensitivity(0.0).is_err());
        assert!(m.adjust(AdjustDirection::Down, -1.0).is_err());
        assert!(m.set_absolute(f64::INFINITY).is_err());
        assert!(m.nudge_sensitivity(SensitivityDirection::Increase, 1.5).is_err());
        assert_eq!(m, before);
    }

    #[test]
    fn sensitivity_is_clamped() {
        let mut m = pose_model();
        m.set_sensitivity(10.0).expect("valid");
        assert_eq!(m.sensitivity(), MAX_SENSITIVITY);
        m.set_sensitivity(0.01).expect("valid");
        assert_eq!(m.sensitivity(), MIN_SENSITIVITY);
    }

    #[test]
    fn nudges_scale_multiplicatively() {
        let mut m = pose_model();
        m.nudge_sensitivity(SensitivityDirection::Increase, 0.1).expect("valid");
        assert!((m.sensitivity() - 0.9).abs() < 1e-12);
        m.nudge_sensitivity(SensitivityDirection::Decrease, 0.5).expect("valid");
        assert!((m.sensitivity() - 1.35).abs() < 1e-12);
    }

    #[test]
    fn reset_to_auto_restores_calibration() {
        let mut m = pose_model();
        let calibrated = m.thresholds();
        m.adjust(AdjustDirection::Down, 0.2).expect("valid");
        m.set_sensitivity(2.0).expect("valid");
        assert_eq!(m.reset_to_auto(), calibrated);
        assert_eq!(m.sensitivity(), 1.0);
    }

    #[test]
    fn ground_layout_orders_lines_above_ground() {
        let m = ball_model();
        // Median ground 900, range 200 -> bounce height max(40, 60) = 60.
        assert_eq!(m.reference(), 900.0);
        assert_eq!(m.upper(), 840.0);
        assert_eq!(m.lower(), 880.0);
        assert!(m.upper() < m.lower() && m.lower() < m.reference());
    }

    #[test]
    fn ground_layout_keeps_min_width_at_low_sensitivity() {
        let mut m = ball_model();
        m.set_sensitivity(0.3).expect("valid");
        assert!(m.lower() - m.upper() >= 40.0);
        assert!(m.lower() < m.reference());
    }

    #[test]
    fn offset_adjust_keeps_rest() {
        let mut m = model(
            ThresholdLayout::OffsetTarget,
            DetectionProfile::body_size(),
            FrameBounds::pixels(1080.0),
            40.0,
            &[700.0; 30],
            Some(200.0),
        );
        m.adjust(AdjustDirection::Up, 10.0).expect("valid");
        assert_eq!(m.reference(), 610.0);
        assert_eq!(m.rest(), 700.0);
    }

    #[test]
    fn dead_and_return_zones_follow_size() {
        let m = model(
            ThresholdLayout::OffsetTarget,
            DetectionProfile::body_size(),
            FrameBounds::pixels(1080.0),
            40.0,
            &[700.0; 30],
            Some(200.0),
        );
        assert_eq!(m.dead_zone(), 20.0);
        assert_eq!(m.return_zone(), 40.0);
        let ball = ball_model();
        assert_eq!(ball.dead_zone(), 20.0);
        assert_eq!(ball.return_zone(), 50.0);
    }

    #[test]
    fn zones_without_size_follow_normalized_units() {
        let m = model(ThresholdLayout::OffsetTarget, DetectionProfile::pose_jitter(), FrameBounds::normalized(), 0.1, &[0.6; 30], None);
        assert!((m.dead_zone() - 0.03).abs() < 1e-12);
        assert!((m.return_zone() - 0.05).abs() < 1e-12);
    }
}
