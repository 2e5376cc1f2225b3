// THEORY:
// The `CalibrationWindow` is the engine's warm-up memory. While a target holds
// still at the start of a session, every accepted sample is appended here until
// the window reaches its fixed capacity. Only a *full* window may be summarized;
// a partial window never produces thresholds.
//
// Key architectural principles:
// 1.  **Append-Only, Then Frozen**: Unlike the sliding histories elsewhere in the
//     engine, this window never evicts. Once full it is frozen and later samples are
//     refused, so the summary always describes the first N frames of the session.
// 2.  **Robust Summaries**: The statistics that feed calibration (median, standard
//     deviation, range) live in the stateless `window_stats` helpers so that the
//     validation scorer and the size-proxy history reuse the exact same math.

use std::collections::VecDeque;

pub const DEFAULT_CALIBRATION_FRAMES: usize = 30;

/// Summary statistics of a full calibration window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// The median of the window. Robust to single-frame outliers.
    pub median: f64,
    /// The population standard deviation of the window.
    pub std_dev: f64,
    /// The distance between the largest and smallest sample.
    pub range: f64,
}

/// A bounded, append-only sequence of raw calibration samples.
#[derive(Debug, Clone)]
pub struct CalibrationWindow {
    samples: Vec<f64>,
    capacity: usize,
}

impl CalibrationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample. Returns `false` once the window is frozen.
    pub fn push(&mut self, value: f64) -> bool {
        if self.is_full() {
            return false;
        }
        self.samples.push(value);
        true
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Empties the window and optionally changes its capacity.
    pub fn reset(&mut self, capacity: Option<usize>) {
        if let Some(capacity) = capacity {
            self.capacity = capacity.max(1);
        }
        self.samples.clear();
    }

    /// Summarizes the window. `None` until the window is full.
    pub fn stats(&self) -> Option<WindowStats> {
        if !self.is_full() {
            return None;
        }
        window_stats::summarize(&self.samples)
    }
}

/// A fixed-capacity FIFO of recent observations (oldest evicted first).
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Changes the capacity, evicting the oldest values if the window shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn median(&self) -> Option<f64> {
        let values: Vec<f64> = self.values.iter().copied().collect();
        window_stats::median(&values)
    }
}

pub mod window_stats {
    use super::WindowStats;

    /// Median of the values; the mean of the two middle values for even lengths.
    pub fn median(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Mean and population standard deviation.
    pub fn mean_and_std_dev(values: &[f64]) -> Option<(f64, f64)> {
        if values.is_empty() {
            return None;
        }
        let count = values.len() as f64;
        let mean = values.iter().sum::<f64>() / count;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        Some((mean, variance.sqrt()))
    }

    pub fn range(values: &[f64]) -> Option<f64> {
        let max = values.iter().copied().reduce(f64::max)?;
        let min = values.iter().copied().reduce(f64::min)?;
        Some(max - min)
    }

    pub fn summarize(values: &[f64]) -> Option<WindowStats> {
        let median = median(values)?;
        let (_, std_dev) = mean_and_std_dev(values)?;
        let range = range(values)?;
        Some(WindowStats {
            median,
            std_dev,
            range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_window_has_no_stats() {
        let mut window = CalibrationWindow::new(3);
        window.push(1.0);
        window.push(2.0);
        assert!(window.stats().is_none());
        window.push(3.0);
        let stats = window.stats().expect("full window");
        assert_eq!(stats.median, 2.0);
        assert_eq!(stats.range, 2.0);
    }

    #[test]
    fn full_window_refuses_more_samples() {
        let mut window = CalibrationWindow::new(2);
        assert!(window.push(1.0));
        assert!(window.push(1.0));
        assert!(!window.push(9.0));
        assert_eq!(window.samples(), &[1.0, 1.0]);
    }

    #[test]
    fn median_ignores_single_outlier() {
        let values = [0.5, 0.5, 0.5, 0.5, 9.0];
        assert_eq!(window_stats::median(&values), Some(0.5));
        assert_eq!(window_stats::median(&[1.0, 3.0]), Some(2.0));
    }

    #[test]
    fn rolling_window_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for v in [10.0, 20.0, 30.0, 40.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.median(), Some(30.0));
    }
}
