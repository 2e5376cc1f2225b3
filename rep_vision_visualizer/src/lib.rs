// THEORY:
// The visualizer is a read-only consumer of counter state. The engine never knows it
// exists: whoever drives a `RepCounter` takes a `DebugSnapshot` after each frame and
// publishes it here. Subscribers (a log printer, a UI, a recorder) each get their own
// receiver and can fall behind without slowing the frame loop down.
//
// Key architectural principles:
// 1.  **Broadcast, Not Queue**: Both channels are `tokio::sync::broadcast`. A slow
//     subscriber lags and skips ahead; it never applies back-pressure to the engine.
// 2.  **Two Streams**: `SnapshotMeta` is a small, always-available summary of every
//     frame. Rendered overlays (`OverlayPacket`) are optional and much heavier, so
//     they travel on their own channel.
// 3.  **Serialization Is Opt-In**: JSON support for the summary sits behind the
//     `json` feature, so pure renderers do not pull in serde.

pub mod overlay;

use std::sync::Arc;

use rep_vision::{DebugSnapshot, SessionId};
use tokio::sync::broadcast;

pub use overlay::{OverlayStyle, TraceOverlay};

/// Encoding of an overlay image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayFormat {
    Png,
}

#[derive(Debug, Clone)]
pub struct OverlayPacket {
    pub session: SessionId,
    pub ts_millis: u64,
    pub width: u32,
    pub height: u32,
    pub format: OverlayFormat,
    pub data: Arc<[u8]>,
}

/// Per-frame summary of one counter.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotMeta {
    pub session: SessionId,
    pub ts_millis: u64,
    pub counter: String,
    pub state: String,
    pub count: u64,
    pub calibrated: bool,
    pub calibration_progress: f64,
    pub reference: Option<f64>,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    pub last_value: Option<f64>,
    pub validation_score: f64,
    pub poor_form: bool,
    pub pattern: Option<String>,
}

impl SnapshotMeta {
    pub fn from_snapshot(session: SessionId, ts_millis: u64, snapshot: &DebugSnapshot) -> Self {
        Self {
            session,
            ts_millis,
            counter: snapshot.name.clone(),
            state: snapshot.state.to_string(),
            count: snapshot.count,
            calibrated: snapshot.calibrated,
            calibration_progress: snapshot.calibration_progress,
            reference: snapshot.reference,
            upper: snapshot.upper,
            lower: snapshot.lower,
            last_value: snapshot.last_value,
            validation_score: snapshot.validation_score,
            poor_form: snapshot.poor_form,
            pattern: snapshot.pattern.map(|p| p.as_str().to_string()),
        }
    }

    /// One-line status text for logs and overlays.
    pub fn status_line(&self) -> String {
        let mut line = format!("{} #{} {} count={}", self.counter, self.session, self.state, self.count);
        if !self.calibrated {
            line.push_str(&format!(" warm-up {:.0}%", self.calibration_progress * 100.0));
        }
        if self.poor_form {
            line.push_str(&format!(" poor-form({:.2})", self.validation_score));
        }
        line
    }
}

#[cfg(feature = "json")]
impl SnapshotMeta {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Clone)]
pub struct SnapshotBus {
    pub overlays_tx: broadcast::Sender<OverlayPacket>,
    pub meta_tx: broadcast::Sender<SnapshotMeta>,
}

impl SnapshotBus {
    pub fn new(capacity: usize) -> Self {
        let (overlays_tx, _) = broadcast::channel::<OverlayPacket>(capacity.max(1));
        let (meta_tx, _) = broadcast::channel::<SnapshotMeta>(capacity.max(1));
        Self { overlays_tx, meta_tx }
    }

    /// Publishes the summary of `snapshot`. Returns the number of subscribers reached.
    pub fn publish(&self, session: SessionId, ts_millis: u64, snapshot: &DebugSnapshot) -> usize {
        // No subscribers is not an error for a fire-and-forget bus.
        self.meta_tx
            .send(SnapshotMeta::from_snapshot(session, ts_millis, snapshot))
            .unwrap_or(0)
    }

    pub fn publish_overlay(&self, packet: OverlayPacket) -> usize {
        self.overlays_tx.send(packet).unwrap_or(0)
    }

    pub fn subscribe_meta(&self) -> broadcast::Receiver<SnapshotMeta> {
        self.meta_tx.subscribe()
    }

    pub fn subscribe_overlays(&self) -> broadcast::Receiver<OverlayPacket> {
        self.overlays_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rep_vision::{CounterConfig, RepCounter, Sample};

    fn snapshot_after(frames: usize) -> DebugSnapshot {
        let mut counter = RepCounter::new(CounterConfig::human("squat")).expect("valid config");
        for i in 0..frames {
            counter.update(Sample::new(0.5, i as f64, 0.99), None);
        }
        counter.snapshot()
    }

    #[tokio::test]
    async fn subscribers_receive_published_meta() {
        let bus = SnapshotBus::new(4);
        let mut rx = bus.subscribe_meta();
        assert_eq!(bus.publish(3, 1_000, &snapshot_after(30)), 1);
        let meta = rx.recv().await.expect("published meta");
        assert_eq!(meta.session, 3);
        assert_eq!(meta.state, "start");
        assert!(meta.calibrated);
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = SnapshotBus::new(1);
        assert_eq!(bus.publish(0, 0, &snapshot_after(1)), 0);
    }

    #[test]
    fn status_line_mentions_calibration_progress() {
        let meta = SnapshotMeta::from_snapshot(1, 0, &snapshot_after(15));
        assert_eq!(meta.status_line(), "squat #1 calibrating count=0 warm-up 50%");
    }
}
