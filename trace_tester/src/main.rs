//! Trace Tester - replays a recorded sample trace through a repetition counter.
//!
//! Reads a CSV trace (see `trace.rs` for the format), feeds every frame to a counter
//! built from a registry preset or a TOML counter file, logs each transition, and
//! prints the final state as JSON. Optionally renders the threshold overlay of the
//! last frame to a PNG.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rep_vision::{CounterRegistry, Report};
use rep_vision_visualizer::{SnapshotBus, SnapshotMeta, TraceOverlay};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod trace;

const SESSION: u64 = 0;

#[derive(Parser, Debug)]
#[command(name = "trace_tester")]
#[command(about = "Replay a recorded sample trace through a repetition counter")]
#[command(version)]
struct Args {
    /// CSV trace: timestamp,value,confidence[,size[,x]] plus lm<ID>=<value>/<visibility> columns
    #[arg(required_unless_present = "list")]
    trace: Option<PathBuf>,

    /// Registered counter to use
    #[arg(short, long, default_value = "plank_hold")]
    counter: String,

    /// TOML file with additional [[counter]] tables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the threshold overlay of the final frame to this PNG
    #[arg(long)]
    overlay: Option<PathBuf>,

    #[arg(long, default_value_t = 640)]
    overlay_width: u32,

    #[arg(long, default_value_t = 360)]
    overlay_height: u32,

    /// List the registered counters and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trace_tester=info,rep_vision=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // --- 1. Counter Registry ---
    let mut registry = CounterRegistry::with_builtin_presets();
    if let Some(path) = &args.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read counter file {}", path.display()))?;
        let names = registry
            .load_toml(&text)
            .with_context(|| format!("Failed to load counters from {}", path.display()))?;
        info!(?names, "Loaded counters");
    }

    if args.list {
        for name in registry.list() {
            if let Some(config) = registry.get(name) {
                println!(
                    "{name:<24} {:<8} {:<20} {}",
                    config.counter_kind().as_str(),
                    config.logic_type.as_str(),
                    config.description
                );
            }
        }
        return Ok(());
    }

    let Some(trace_path) = &args.trace else {
        bail!("a trace file is required");
    };
    let config = registry
        .get(&args.counter)
        .cloned()
        .with_context(|| format!("Unknown counter `{}` (available: {})", args.counter, registry.list().join(", ")))?;
    let mut counter = registry.build(&args.counter)?;

    // --- 2. Trace Loading ---
    let text = std::fs::read_to_string(trace_path)
        .with_context(|| format!("Failed to read trace {}", trace_path.display()))?;
    let frames = trace::parse_trace(&text).with_context(|| format!("Failed to parse trace {}", trace_path.display()))?;
    info!(counter = %args.counter, frames = frames.len(), "Replaying trace");

    // --- 3. Snapshot Bus ---
    let bus = SnapshotBus::new(64);
    let mut meta_rx = bus.subscribe_meta();
    let printer = tokio::spawn(async move {
        loop {
            match meta_rx.recv().await {
                Ok(meta) => debug!(status = %meta.status_line(), "Snapshot"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Snapshot printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // --- 4. Replay Loop ---
    let mut overlay = TraceOverlay::new(args.overlay_width, args.overlay_height, config.frame_extent);
    let (mut skipped, mut poor_form) = (0usize, 0usize);
    for frame in &frames {
        let report = counter.process(frame.sample, frame.aux.as_ref());
        match &report {
            Report::Skipped => skipped += 1,
            Report::Calibrated { thresholds } => info!(%thresholds, "Calibrated"),
            Report::RepCompleted { count } => info!(timestamp = frame.sample.timestamp, count, "Rep"),
            Report::PoorForm { validation_score } => {
                poor_form += 1;
                debug!(timestamp = frame.sample.timestamp, validation_score, "Poor form");
            }
            Report::Calibrating { .. } | Report::Tracking { .. } => {}
        }
        if report != Report::Skipped {
            overlay.push(frame.sample.value);
        }
        let ts_millis = (frame.sample.timestamp * 1000.0).max(0.0) as u64;
        bus.publish(SESSION, ts_millis, &counter.snapshot());
        // Let the printer keep up with the replay.
        tokio::task::yield_now().await;
    }

    // --- 5. Results ---
    let snapshot = counter.snapshot();
    if !snapshot.calibrated {
        warn!(
            progress = snapshot.calibration_progress,
            "Trace ended before calibration completed"
        );
    }
    info!(count = snapshot.count, skipped, poor_form, "Replay finished");

    if let Some(path) = &args.overlay {
        overlay
            .render(&snapshot)
            .save(path)
            .with_context(|| format!("Failed to write overlay {}", path.display()))?;
        info!(path = %path.display(), "Overlay written");
    }

    let last_ts = frames
        .last()
        .map(|f| (f.sample.timestamp * 1000.0).max(0.0) as u64)
        .unwrap_or_default();
    let meta = SnapshotMeta::from_snapshot(SESSION, last_ts, &snapshot);
    println!("{}", meta.to_json().context("Failed to serialize final snapshot")?);

    drop(bus);
    printer.await.context("Snapshot printer task failed")?;
    Ok(())
}
