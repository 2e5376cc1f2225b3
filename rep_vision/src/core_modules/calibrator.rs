// THEORY:
// The `Calibrator` turns a full warm-up window into the first `ThresholdModel` of a
// session. It is a pure function of (window statistics, optional size proxy,
// configuration); it owns no state of its own beyond the settings it was built with.
//
// Key architectural principles:
// 1.  **One Derivation, Many Counters**: Every counter family shares the same
//     derivation. What differs between them is captured by two small value objects:
//     the `DetectionProfile` (how big a movement must be) and the `ThresholdLayout`
//     (where the lines sit relative to the resting position).
// 2.  **Scale Awareness**: When the target's size is known (a bounding-box height),
//     distances are expressed as ratios of that size so the same counter works for
//     a cat near the camera and a cat across the room. Without a size, the observed
//     jitter of the resting signal sets the scale, floored at a configured minimum.
// 3.  **Frame Safety**: Lines stay inside the usable part of the frame whenever the
//     resting position allows it. `FrameBounds` shifts a zone as a whole rather than
//     collapsing it, and never past the reference: the rest position is always
//     inside its own zone, even at the very edge of the frame.

use crate::core_modules::calibration_window::CalibrationWindow;
use crate::core_modules::threshold_model::ThresholdModel;
use serde::{Deserialize, Serialize};

/// Fraction of the size proxy treated as an unmistakable movement.
pub const DEFINITIVE_MOVEMENT_RATIO: f64 = 0.25;
/// Fraction of the size proxy treated as the smallest detectable movement.
pub const DETECTABLE_MOVEMENT_RATIO: f64 = 0.15;
/// Standard deviations of resting jitter that separate noise from movement.
pub const NOISE_THRESHOLD_STD_DEV: f64 = 3.0;
/// Share of the warm-up range used as the bounce height.
pub const BOUNCE_RANGE_RATIO: f64 = 0.3;

/// Which summary of the warm-up window sets the spread for variance-driven counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadStatistic {
    StdDev,
    Range,
}

/// Size-proxy driven spread: distances are ratios of the target's height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeProxyProfile {
    /// Ratio of the height that is definitely a movement.
    pub definitive_ratio: f64,
    /// Ratio of the height that is just barely detectable.
    pub detectable_ratio: f64,
    /// Lower bound of the detectable movement range, in signal units.
    pub min_detectable_range: f64,
    /// Height assumed when no size was ever observed.
    pub fallback_height: f64,
    /// How far above the rest position the crossing target is placed, as a ratio of the height.
    pub reference_offset_ratio: f64,
    /// Smallest allowed distance between rest and the crossing target, as a ratio of the height.
    pub min_offset_ratio: f64,
}

impl Default for SizeProxyProfile {
    fn default() -> Self {
        Self {
            definitive_ratio: DEFINITIVE_MOVEMENT_RATIO,
            detectable_ratio: DETECTABLE_MOVEMENT_RATIO,
            min_detectable_range: 40.0,
            fallback_height: 60.0,
            reference_offset_ratio: 0.4,
            min_offset_ratio: 0.2,
        }
    }
}

/// Variance driven spread: `max(statistic * multiplier, base threshold)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceProfile {
    pub statistic: SpreadStatistic,
    pub multiplier: f64,
}

/// How a counter decides how large a movement must be.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectionProfile {
    SizeProxy(SizeProxyProfile),
    Variance(VarianceProfile),
}

impl DetectionProfile {
    /// Pose landmarks: three standard deviations of resting jitter.
    pub fn pose_jitter() -> Self {
        Self::Variance(VarianceProfile {
            statistic: SpreadStatistic::StdDev,
            multiplier: NOISE_THRESHOLD_STD_DEV,
        })
    }

    /// Bouncing objects: a share of the observed warm-up range.
    pub fn bounce_range() -> Self {
        Self::Variance(VarianceProfile {
            statistic: SpreadStatistic::Range,
            multiplier: BOUNCE_RANGE_RATIO,
        })
    }

    pub fn body_size() -> Self {
        Self::SizeProxy(SizeProxyProfile::default())
    }
}

/// Where the detection lines sit relative to the resting position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdLayout {
    /// `upper = reference - s`, `lower = reference + s`, reference at rest.
    Centered,
    /// Reference lifted above rest by a share of the size proxy;
    /// `upper = reference - 0.5 s`, `lower = reference + 2 s`.
    OffsetTarget,
    /// Reference is the ground. `upper` is the far bounce line, `lower` the near one,
    /// both above the ground: `upper < lower < reference`.
    Ground,
}

/// The usable vertical span of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameBounds {
    /// Full height of the coordinate space (1.0 for normalized landmarks, pixels otherwise).
    pub extent: f64,
    /// Distance from either edge that lines must keep.
    pub margin: f64,
    /// The narrowest detection zone ever produced.
    pub min_zone_width: f64,
}

impl FrameBounds {
    /// Normalized pose coordinates in `[0, 1]`.
    pub fn normalized() -> Self {
        Self {
            extent: 1.0,
            margin: 0.0,
            min_zone_width: 0.02,
        }
    }

    /// A pixel frame of the given height with the standard 50px margin.
    pub fn pixels(height: f64) -> Self {
        Self {
            extent: height,
            margin: 50.0,
            min_zone_width: 40.0,
        }
    }

    pub fn low(&self) -> f64 {
        self.margin
    }

    pub fn high(&self) -> f64 {
        self.extent - self.margin
    }

    /// Clamps a position into `[low, high]`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.low()).min(self.high())
    }

    /// Places the zone `(upper, lower)` inside the bounds without ever leaving `anchor`
    /// outside it.
    ///
    /// A zone narrower than `min_zone_width` is first replaced by a symmetric
    /// minimum-width zone around `anchor`. A zone poking out of one edge is then shifted
    /// back as a whole, but only until the line it pushes is half a minimum zone away
    /// from `anchor`. An anchor sitting at the edge therefore keeps a line just past
    /// the edge instead of ending up beyond its own detection line.
    pub fn fit_zone(&self, upper: f64, lower: f64, anchor: f64) -> (f64, f64) {
        let (low, high) = (self.low(), self.high());
        let half = self.min_zone_width / 2.0;
        let (mut upper, mut lower) = if lower - upper < self.min_zone_width {
            (anchor - half, anchor + half)
        } else {
            (upper, lower)
        };

        if upper < low {
            let shift = (low - upper).min(anchor - half - upper).max(0.0);
            upper += shift;
            lower = (lower + shift).min(high).max(anchor + half);
        } else if lower > high {
            let shift = (lower - high).min(lower - anchor - half).max(0.0);
            lower -= shift;
            upper = (upper - shift).max(low).min(anchor - half);
        }

        (upper, lower)
    }
}

/// Produces the initial `ThresholdModel` of a session from a full warm-up window.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibrator {
    pub profile: DetectionProfile,
    pub layout: ThresholdLayout,
    pub bounds: FrameBounds,
    /// The configured minimum movement (`threshold` in counter configuration).
    pub base_threshold: f64,
    /// Distance above the ground that still counts as "landed" (ground layout only).
    pub ground_tolerance: f64,
    /// Sensitivity multiplier applied from the first derivation on.
    pub sensitivity: f64,
}

impl Calibrator {
    /// Returns `None` until `window` holds exactly its capacity of samples.
    pub fn calibrate(
        &self,
        window: &CalibrationWindow,
        size_proxy: Option<f64>,
    ) -> Option<ThresholdModel> {
        let stats = window.stats()?;
        Some(ThresholdModel::from_calibration(self.clone(), stats, size_proxy))
    }
}
