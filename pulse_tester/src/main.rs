mod overlay;
mod source;

use anyhow::{Context, bail};
use clap::Parser;
use pulse_vision::core_modules::interfaces::{FixedStimulus, FrameSource};
use pulse_vision::core_modules::session::{mean_bpm, summarize_by_stimulus};
use pulse_vision::{
    BoundingBox, Clock, EngineConfig, Frame, FrameStatus, HeartRateSample, ManualClock, PulsePipeline,
    SessionParams, SystemClock,
};
use source::{DirectorySource, FixedFaceDetector, SyntheticSource};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const FRAME_QUEUE_DEPTH: usize = 8;

type BoxedSource = Box<dyn FrameSource + Send>;

/// Replays a frame sequence through the heart-rate engine.
#[derive(Parser, Debug)]
#[command(name = "pulse_tester")]
struct Args {
    /// Directory of frames processed in file-name order. A synthetic scene is used when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Capture rate used to timestamp the frames.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Face box as x,y,width,height. Required with --input.
    #[arg(long, value_parser = source::parse_box)]
    face: Option<BoundingBox>,

    /// Pulse rate of the synthetic scene.
    #[arg(long, default_value_t = 72.0)]
    synthetic_bpm: f64,

    /// Length of the synthetic scene in frames.
    #[arg(long, default_value_t = 900)]
    synthetic_frames: usize,

    /// Frames spent searching before each measurement is started.
    #[arg(long, default_value_t = 15)]
    lock_after: usize,

    /// Length of each measurement in seconds.
    #[arg(long, default_value_t = 20)]
    record_length: i64,

    /// Number of measurements to take.
    #[arg(long, default_value_t = 1)]
    records: i64,

    /// Stimulus label attached to every sample.
    #[arg(long)]
    stimulus: Option<String>,

    /// Engine configuration (TOML). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for annotated frames.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// What the engine thread publishes for the reporter after every frame.
#[derive(Debug, Clone)]
struct Snapshot {
    frame: usize,
    status: FrameStatus,
    bpm: Option<f64>,
    remaining: Option<f64>,
    record_index: u32,
}

struct Run {
    detector: FixedFaceDetector,
    stimulus: FixedStimulus,
    params: SessionParams,
    lock_after: usize,
    output: Option<PathBuf>,
    clock: ManualClock,
    epoch: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // --- 1. Configuration & Source Setup ---
    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let (source, face): (BoxedSource, BoundingBox) = match &args.input {
        Some(dir) => {
            let Some(face) = args.face else {
                bail!("--face x,y,width,height is required with --input");
            };
            (Box::new(DirectorySource::open(dir, args.fps)?) as BoxedSource, face)
        }
        None => {
            let synthetic = SyntheticSource::new(args.synthetic_bpm, args.fps, args.synthetic_frames);
            let face = args.face.unwrap_or(synthetic.face);
            (Box::new(synthetic) as BoxedSource, face)
        }
    };

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    // Session time follows the frame timestamps so replays are not tied to wall time.
    let epoch = SystemClock.now();
    let clock = ManualClock::new(epoch);
    let pipeline = PulsePipeline::with_clock(config, clock.clone())?;

    let run = Run {
        detector: FixedFaceDetector { face },
        stimulus: FixedStimulus(args.stimulus.clone()),
        params: SessionParams {
            record_length_seconds: args.record_length,
            total_records_target: args.records,
        },
        lock_after: args.lock_after,
        output: args.output.clone(),
        clock,
        epoch,
    };

    // --- 2. Wiring: producer -> engine -> reporter ---
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(FRAME_QUEUE_DEPTH);
    let (report_tx, report_rx) = watch::channel::<Option<Snapshot>>(None);

    let producer = tokio::task::spawn_blocking(move || {
        let mut source = source;
        while let Some(frame) = source.next_frame() {
            if frame_tx.blocking_send(frame).is_err() {
                break;
            }
        }
    });
    let reporter = tokio::spawn(report(report_rx));
    let engine = tokio::task::spawn_blocking(move || run_engine(pipeline, frame_rx, report_tx, run));

    producer.await?;
    let samples = engine.await??;
    reporter.await?;

    // --- 3. Summary ---
    match mean_bpm(&samples) {
        Some(mean) => println!("Recorded {} estimates, mean {:.1} bpm", samples.len(), mean),
        None => println!("No heart-rate estimates were recorded"),
    }
    for (label, summary) in summarize_by_stimulus(&samples) {
        println!("  {label}: {:.1} bpm over {} estimates", summary.mean_bpm, summary.count);
    }
    Ok(())
}

/// Runs every frame through the pipeline, opening and closing measurements on
/// the advisory countdown, and returns every recorded sample.
fn run_engine(
    mut pipeline: PulsePipeline<ManualClock>,
    mut frames: mpsc::Receiver<Frame>,
    report_tx: watch::Sender<Option<Snapshot>>,
    mut run: Run,
) -> anyhow::Result<Vec<HeartRateSample>> {
    let mut recorded = Vec::new();
    let mut next_lock_at = Some(run.lock_after);
    let mut index = 0usize;

    while let Some(frame) = frames.blocking_recv() {
        run.clock.set(run.epoch + frame.timestamp);

        if next_lock_at == Some(index) {
            next_lock_at = None;
            if let Err(err) = pipeline.start_session(run.params) {
                warn!(%err, "could not start measurement");
            }
        }

        let analysis = pipeline.process_with(&frame, &mut run.detector, &run.stimulus);

        if pipeline.is_expired() {
            pipeline.stop_session()?;
            recorded.extend(pipeline.drain());
            if !pipeline.session().is_complete() {
                next_lock_at = Some(index + 1 + run.lock_after);
            }
        }

        if let Some(dir) = &run.output {
            let path = dir.join(format!("frame_{index:05}.png"));
            overlay::annotate(&frame, &analysis)
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }

        report_tx.send_replace(Some(Snapshot {
            frame: index,
            status: analysis.status,
            bpm: analysis.bpm(),
            remaining: pipeline.remaining_time(),
            record_index: pipeline.record_index(),
        }));
        index += 1;
    }

    if pipeline.session().is_measuring() {
        info!("input ended before the measurement window closed");
        pipeline.stop_session()?;
        recorded.extend(pipeline.drain());
    }
    Ok(recorded)
}

/// Logs the latest published snapshot whenever it changes.
async fn report(mut updates: watch::Receiver<Option<Snapshot>>) {
    let mut last_logged_second = None;
    while updates.changed().await.is_ok() {
        let Some(snapshot) = updates.borrow_and_update().clone() else {
            continue;
        };
        let Some(bpm) = snapshot.bpm else {
            continue;
        };
        // One line per second of measurement is plenty.
        let second = snapshot.remaining.map(|r| r.ceil() as i64);
        if second == last_logged_second {
            continue;
        }
        last_logged_second = second;
        info!(
            frame = snapshot.frame,
            record = snapshot.record_index + 1,
            status = ?snapshot.status,
            remaining = ?snapshot.remaining,
            "estimate: {bpm:.1} bpm"
        );
    }
}
