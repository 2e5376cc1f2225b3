// Threshold overlay rendering.
//
// The overlay is a strip chart of the tracked signal: time runs left to right (one
// column per frame, newest on the right) and the signal's coordinate space maps onto
// image rows, so "down is larger" holds on screen as in the source video. The
// reference, upper and lower lines are drawn across the full width at their current
// positions.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, ImageResult, Rgba, RgbaImage};
use rep_vision::{DebugSnapshot, SessionId};

use crate::{OverlayFormat, OverlayPacket};

const MARKER_RADIUS: i64 = 3;
const BORDER_WIDTH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub background: Rgba<u8>,
    pub trace: Rgba<u8>,
    pub reference: Rgba<u8>,
    pub upper: Rgba<u8>,
    pub lower: Rgba<u8>,
    pub marker: Rgba<u8>,
    pub poor_form: Rgba<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            background: Rgba([16, 16, 16, 255]),
            trace: Rgba([200, 200, 200, 255]),
            reference: Rgba([255, 255, 0, 255]),
            upper: Rgba([0, 200, 0, 255]),
            lower: Rgba([0, 120, 255, 255]),
            marker: Rgba([255, 255, 255, 255]),
            poor_form: Rgba([220, 0, 0, 255]),
        }
    }
}

/// Accumulates signal history and renders it with the counter's current lines.
#[derive(Debug, Clone)]
pub struct TraceOverlay {
    width: u32,
    height: u32,
    extent: f64,
    history: VecDeque<f64>,
    style: OverlayStyle,
}

impl TraceOverlay {
    /// `extent` is the full height of the signal's coordinate space (1.0 for
    /// normalized pose coordinates, the frame height for pixel coordinates).
    pub fn new(width: u32, height: u32, extent: f64) -> Self {
        let width = width.max(1);
        Self {
            width,
            height: height.max(1),
            extent: if extent.is_finite() && extent > 0.0 { extent } else { 1.0 },
            history: VecDeque::with_capacity(width as usize),
            style: OverlayStyle::default(),
        }
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.history.push_back(value);
        if self.history.len() > self.width as usize {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Image row of a signal value, clamped into the image.
    pub fn row(&self, value: f64) -> u32 {
        let max_row = f64::from(self.height - 1);
        (value / self.extent * max_row).round().max(0.0).min(max_row) as u32
    }

    pub fn render(&self, snapshot: &DebugSnapshot) -> RgbaImage {
        let style = self.style;
        let mut image = RgbaImage::from_pixel(self.width, self.height, style.background);

        for (line, color) in [
            (snapshot.upper, style.upper),
            (snapshot.lower, style.lower),
            (snapshot.reference, style.reference),
        ] {
            if let Some(value) = line {
                let y = self.row(value);
                for x in 0..self.width {
                    image.put_pixel(x, y, color);
                }
            }
        }

        // Newest sample in the rightmost column.
        let offset = self.width - self.history.len() as u32;
        let mut previous: Option<u32> = None;
        for (i, value) in self.history.iter().enumerate() {
            let x = offset + i as u32;
            let y = self.row(*value);
            let (from, to) = match previous {
                Some(p) => (p.min(y), p.max(y)),
                None => (y, y),
            };
            for row in from..=to {
                image.put_pixel(x, row, style.trace);
            }
            previous = Some(y);
        }

        if let Some(y) = previous {
            self.draw_marker(&mut image, self.width - 1, y);
        }
        if snapshot.poor_form {
            self.draw_border(&mut image, style.poor_form);
        }
        image
    }

    fn draw_marker(&self, image: &mut RgbaImage, cx: u32, cy: u32) {
        for dy in -MARKER_RADIUS..=MARKER_RADIUS {
            for dx in -MARKER_RADIUS..=MARKER_RADIUS {
                let (x, y) = (i64::from(cx) + dx, i64::from(cy) + dy);
                if x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height) {
                    image.put_pixel(x as u32, y as u32, self.style.marker);
                }
            }
        }
    }

    fn draw_border(&self, image: &mut RgbaImage, color: Rgba<u8>) {
        let border = BORDER_WIDTH.min(self.width / 2).min(self.height / 2);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            if x < border || y < border || x >= self.width - border || y >= self.height - border {
                *pixel = color;
            }
        }
    }

    /// Renders and PNG-encodes the overlay into a bus packet.
    pub fn packet(&self, session: SessionId, ts_millis: u64, snapshot: &DebugSnapshot) -> ImageResult<OverlayPacket> {
        let data = encode_png(&self.render(snapshot))?;
        Ok(OverlayPacket {
            session,
            ts_millis,
            width: self.width,
            height: self.height,
            format: OverlayFormat::Png,
            data: Arc::from(data),
        })
    }
}

pub fn encode_png(image: &RgbaImage) -> ImageResult<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rep_vision::{CounterConfig, RepCounter, Sample};

    fn calibrated_snapshot() -> DebugSnapshot {
        let mut counter = RepCounter::new(CounterConfig::human("squat")).expect("valid config");
        for i in 0..30 {
            counter.update(Sample::new(0.5, i as f64, 0.99), None);
        }
        counter.snapshot()
    }

    #[test]
    fn lines_are_drawn_at_their_rows() {
        let overlay = TraceOverlay::new(64, 101, 1.0);
        let image = overlay.render(&calibrated_snapshot());
        let style = OverlayStyle::default();
        assert_eq!(*image.get_pixel(10, 50), style.reference);
        assert_eq!(*image.get_pixel(10, 40), style.upper);
        assert_eq!(*image.get_pixel(10, 60), style.lower);
        assert_eq!(*image.get_pixel(10, 0), style.background);
    }

    #[test]
    fn newest_sample_gets_the_marker() {
        let mut overlay = TraceOverlay::new(32, 101, 1.0);
        for _ in 0..100 {
            overlay.push(0.9);
        }
        assert_eq!(overlay.len(), 32);
        let image = overlay.render(&calibrated_snapshot());
        assert_eq!(*image.get_pixel(31, 90), OverlayStyle::default().marker);
        assert_eq!(*image.get_pixel(0, 90), OverlayStyle::default().trace);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let overlay = TraceOverlay::new(8, 11, 1.0);
        assert_eq!(overlay.row(-3.0), 0);
        assert_eq!(overlay.row(7.0), 10);
    }

    #[test]
    fn packets_carry_png_bytes() {
        let overlay = TraceOverlay::new(16, 16, 1.0);
        let packet = overlay.packet(1, 0, &calibrated_snapshot()).expect("encodes");
        assert_eq!(packet.format, OverlayFormat::Png);
        assert_eq!(&packet.data[..4], &[0x89, b'P', b'N', b'G']);
    }
}
