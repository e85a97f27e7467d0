//! vgm-replay: replay a VGM sequence and print the camera-frame ground truth.
//!
//! ```text
//! vgm-replay /data/vgm/data/Lshape0001 --mode background --max-steps 200
//! vgm-replay --config replay.yaml --markers
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use crossbeam_channel::{Receiver, unbounded};
use nalgebra::{Vector3, Vector4};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vgm_replay::config::ReplayConfig;
use vgm_replay::dataset::{DatasetLayout, VgmDataset};
use vgm_replay::geometry::rigid::compute_centroid;
use vgm_replay::grabber::{Mode, StepOutcome, VgmGrabber};
use vgm_replay::io::ImageSequence;

#[derive(Debug, Parser)]
#[command(version, about = "Replay a VGM sequence with camera-frame object poses")]
struct Args {
    /// Sequence directory, e.g. <path_to>/vgm/data/Lshape0001/
    dataset: Option<PathBuf>,

    /// YAML configuration file; command-line values take precedence.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    #[arg(long)]
    frame_pattern: Option<String>,

    /// Stop after this many steps.
    #[arg(long)]
    max_steps: Option<usize>,

    /// Subscribe to raw marker positions.
    #[arg(long)]
    markers: bool,

    /// Subscribe to frames with the fused pose.
    #[arg(long)]
    poses: bool,
}

/// What the subscribers forward to the main thread.
enum Sample {
    Pose {
        id: u64,
        width: u32,
        height: u32,
        rvec: Vector4<f64>,
        tvec: Vector4<f64>,
    },
    Markers {
        id: u64,
        count: usize,
        centroid: Vector3<f64>,
    },
}

fn report(rx: &Receiver<Sample>) -> usize {
    let mut n = 0;
    for sample in rx.try_iter() {
        match sample {
            Sample::Pose {
                id,
                width,
                height,
                rvec,
                tvec,
            } => info!(
                "frame {} ({}x{}): axis [{:.4}, {:.4}, {:.4}] angle {:.4} rad, \
                 t [{:.2}, {:.2}, {:.2}]",
                id, width, height, rvec.x, rvec.y, rvec.z, rvec.w, tvec.x, tvec.y, tvec.z
            ),
            Sample::Markers {
                id,
                count,
                centroid,
            } => info!(
                "frame {}: {} markers, centroid [{:.2}, {:.2}, {:.2}]",
                id, count, centroid.x, centroid.y, centroid.z
            ),
        }
        n += 1;
    }
    n
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ReplayConfig::load(path)?,
        None => ReplayConfig::default(),
    };
    if let Some(dataset) = args.dataset {
        config.dataset = dataset;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(pattern) = args.frame_pattern {
        config.frame_pattern = pattern;
    }
    if args.max_steps.is_some() {
        config.max_steps = args.max_steps;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    if config.dataset.as_os_str().is_empty() {
        bail!("no dataset given; pass a sequence directory or set `dataset` in the config");
    }

    info!("vgm-replay v{}", env!("CARGO_PKG_VERSION"));
    let layout = DatasetLayout::from_sequence_dir(&config.dataset)?
        .with_frame_pattern(&config.frame_pattern);
    let dataset = VgmDataset::load_layout(&layout)?;
    info!(
        "camera {}x{}, {} reference markers",
        dataset.camera.width,
        dataset.camera.height,
        dataset.markers.len()
    );

    let mut grabber = VgmGrabber::new(dataset, ImageSequence::new());
    let (tx, rx) = unbounded();

    // Neither flag given: subscribe to both
    let (poses, markers) = match (args.poses, args.markers) {
        (false, false) => (true, true),
        selected => selected,
    };
    if poses {
        let tx = tx.clone();
        grabber.register_image_pose(move |id, frame, rvec, tvec| {
            let _ = tx.send(Sample::Pose {
                id,
                width: frame.width(),
                height: frame.height(),
                rvec: *rvec,
                tvec: *tvec,
            });
        });
    }
    if markers {
        grabber.register_markers(move |id, measured| {
            let _ = tx.send(Sample::Markers {
                id,
                count: measured.len(),
                centroid: compute_centroid(measured),
            });
        });
    }

    grabber.start(config.mode)?;
    let max_steps = config.max_steps.map_or(u64::MAX, |n| n as u64);
    let mut reported = 0;

    match config.mode {
        Mode::Cooperative => {
            while grabber.frame_nr() < max_steps {
                let outcome = grabber.trigger();
                reported += report(&rx);
                if outcome == StepOutcome::EndOfStream {
                    break;
                }
            }
        }
        Mode::Background => {
            while grabber.is_running() && grabber.frame_nr() < max_steps {
                std::thread::sleep(Duration::from_millis(50));
                reported += report(&rx);
            }
        }
    }

    grabber.stop();
    reported += report(&rx);
    info!("{} samples over {} steps", reported, grabber.frame_nr());
    Ok(())
}
