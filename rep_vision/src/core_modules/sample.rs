// THEORY:
// The `Sample` is the most fundamental unit of the counting engine. It is a
// "dumb" data container for one frame's worth of signal: a single scalar position
// produced by an external vision model (a pose landmark's normalized coordinate or
// a bounding-box center in pixels) plus how much that model trusted it.
//
// Key architectural principles:
// 1.  **Single Scalar Focus**: Every counter tracks exactly one primary coordinate.
//     Screen space is used throughout, so "down is larger": a target moving up the
//     frame produces a *smaller* value.
// 2.  **Optional Enrichment**: Object and animal targets can attach the horizontal
//     coordinate (used by oscillation analysis) and the bounding-box height (used as
//     the size proxy during calibration). Pose targets attach secondary landmarks
//     through `AuxLandmarks` instead.
// 3.  **Ephemeral**: Samples are produced once per frame, consumed, and never
//     stored beyond the bounded windows of the components that read them.

use std::collections::BTreeMap;

/// Identifier of a pose landmark (the vision model's landmark index).
pub type LandmarkId = u32;

/// A single frame's reading of the tracked signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The tracked (vertical, screen-space) coordinate.
    pub value: f64,
    /// Capture time of the frame in seconds.
    pub timestamp: f64,
    /// Landmark visibility or detection confidence, in [0, 1].
    pub confidence: f64,
    /// The horizontal coordinate of the target, when the source provides one.
    pub horizontal: Option<f64>,
    /// The observed target height (bounding-box height), when the source provides one.
    pub size: Option<f64>,
}

impl Sample {
    pub fn new(value: f64, timestamp: f64, confidence: f64) -> Self {
        Self {
            value,
            timestamp,
            confidence,
            horizontal: None,
            size: None,
        }
    }

    /// Attaches the horizontal coordinate of the target.
    pub fn with_horizontal(mut self, horizontal: f64) -> Self {
        self.horizontal = Some(horizontal);
        self
    }

    /// Attaches the observed target height.
    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    /// Builds a sample from a detection bounding box `(x1, y1, x2, y2)`.
    /// The tracked value is the box center's y, the size is the box height.
    pub fn from_bbox(bbox: (f64, f64, f64, f64), timestamp: f64, confidence: f64) -> Self {
        let (x1, y1, x2, y2) = bbox;
        Self::new((y1 + y2) / 2.0, timestamp, confidence)
            .with_horizontal((x1 + x2) / 2.0)
            .with_size(y2 - y1)
    }
}

/// A secondary pose landmark reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxLandmark {
    /// The landmark's vertical coordinate.
    pub value: f64,
    /// The vision model's visibility estimate for this landmark.
    pub visibility: f64,
}

impl AuxLandmark {
    pub fn new(value: f64, visibility: f64) -> Self {
        Self { value, visibility }
    }
}

/// Secondary landmarks for one frame, keyed by landmark id.
pub type AuxLandmarks = BTreeMap<LandmarkId, AuxLandmark>;
