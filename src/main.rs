//! colrect - perspective calibration for granular column-collapse footage
//!
//! Reads the decoded frames of an experiment video, corrects the camera
//! perspective using four operator-selected corners of a calibration box of
//! known size, crops the region of interest in centimetres and writes an
//! annotated grayscale frame sequence. Parameters and corners are saved in
//! the experiment folder so later runs reproduce the same output.

mod config;
mod crop;
mod error;
mod overlay;
mod picker;
mod pipeline;
mod rectify;
mod sink;
mod source;
mod store;
mod transform;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{CalibrationPoints, RunConfig, SessionOverrides};
use crate::overlay::InfoOverlay;
use crate::picker::{FixedPicker, PointPicker, TerminalPicker};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::sink::ImageSequenceSink;
use crate::source::ImageSequenceSource;
use crate::store::{CornerStore, ParameterStore, RecordStore};

/// colrect - calibrate, rectify and crop granular collapse footage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Experiment folder holding the footage and the saved parameters
    folder: PathBuf,

    /// Configuration file path
    #[arg(short, long, default_value = "colrect.toml")]
    config: PathBuf,

    /// Directory of decoded raw frames (default: <folder>/<files.frames_dir>)
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Recording frame rate of the raw footage
    #[arg(long)]
    source_fps: Option<f64>,

    /// Calibration box height in cm (first run only)
    #[arg(long)]
    calib_height: Option<f64>,

    /// Calibration box width in cm (first run only)
    #[arg(long)]
    calib_width: Option<f64>,

    /// Crop height in cm (first run only)
    #[arg(long)]
    crop_height: Option<f64>,

    /// Crop width in cm (first run only)
    #[arg(long)]
    crop_width: Option<f64>,

    /// Axis tick spacing in cm (first run only)
    #[arg(long)]
    axis_interval: Option<f64>,

    /// Pixels per cm in the rectified frame (first run only)
    #[arg(long)]
    px_per_cm: Option<f64>,

    /// Output frame rate (first run only)
    #[arg(long)]
    fps: Option<f64>,

    /// First frame to process, 1-based (first run only)
    #[arg(long)]
    start: Option<u32>,

    /// One past the last frame to process (first run only)
    #[arg(long)]
    end: Option<u32>,

    /// Calibration corners as x,y pairs: TL, TR, BR, BL
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    corners: Option<Vec<f64>>,

    /// Delete the saved parameters and corners before running
    #[arg(long)]
    reset: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> SessionOverrides {
        SessionOverrides {
            calib_box_height: self.calib_height,
            calib_box_width: self.calib_width,
            crop_height: self.crop_height,
            crop_width: self.crop_width,
            axis_interval: self.axis_interval,
            px_per_cm: self.px_per_cm,
            output_fps: self.fps,
            frame_start: self.start,
            frame_end: self.end,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("colrect v{}", env!("CARGO_PKG_VERSION"));

    let config = RunConfig::load_or_create(&args.config)?;
    let folder = args.folder.clone();
    if !folder.is_dir() {
        bail!("Experiment folder {:?} does not exist", folder);
    }

    let param_store = ParameterStore::parameters(config.files.params.as_str());
    let corner_store = CornerStore::corners(config.files.corners.as_str());

    if args.reset {
        let removed_params = param_store.delete(&folder)?;
        let removed_corners = corner_store.delete(&folder)?;
        info!(
            "Reset folder (parameters removed: {}, corners removed: {})",
            removed_params, removed_corners
        );
    }

    let params = pipeline::resolve_parameters(&param_store, &folder, &config.defaults, &args.overrides())?;
    info!(
        "Calibration box {} x {} cm, crop {} x {} cm, {} px/cm, output {} fps",
        params.calib_box_width,
        params.calib_box_height,
        params.crop_width,
        params.crop_height,
        params.px_per_cm,
        params.output_fps
    );
    let (calib_w, calib_h) = params.calibrated_size();
    info!(
        "Frames [{}, {}) rectified to {}x{} px",
        params.frame_start, params.frame_end, calib_w, calib_h
    );

    // Open the source before anything is written
    let frames_dir = args
        .frames
        .clone()
        .unwrap_or_else(|| folder.join(&config.files.frames_dir));
    let source_fps = args.source_fps.unwrap_or(config.video.source_fps);
    let mut source = ImageSequenceSource::open(&frames_dir, source_fps)
        .context("Error capturing the video; check the folder and frame directory")?;
    info!("{} raw frames available", source.len());

    let picker: Box<dyn PointPicker> = match args.corners.as_deref() {
        Some(values) => {
            let corners = CalibrationPoints::from_flat(values)
                .context("--corners needs exactly four x,y pairs")?;
            if corner_store.load(&folder)?.is_some() {
                warn!("Ignoring --corners: this folder already has saved corners (use --reset to replace them)");
            }
            Box::new(FixedPicker::new(corners))
        }
        None => Box::new(TerminalPicker::stdio(folder.join(&config.files.pick_preview))),
    };

    let mut overlay = InfoOverlay::new(params.axis_interval, params.px_per_cm)?
        .with_label_height(config.video.label_height);
    if let Some(font) = config.video.font.as_deref() {
        overlay = overlay.with_font_file(font)?;
    }

    let output_dir = folder.join(&config.files.output_dir);
    let output_fps = params.output_fps;

    let pipeline_config = PipelineConfig {
        folder: folder.clone(),
        params,
        background: config.video.background,
    };
    let mut pipeline = Pipeline::new(pipeline_config, &corner_store, picker, Box::new(overlay));

    let summary = pipeline.run(&mut source, |width, height| {
        ImageSequenceSink::create(&output_dir, output_fps, width, height)
    })?;

    info!(
        "Done: {} frames skipped, {} frames written to {:?} ({:?})",
        summary.frames_skipped, summary.frames_written, output_dir, summary.end
    );
    if let (Some(crop), Some((w, h))) = (summary.crop, summary.calibrated_size) {
        info!("Crop window {} of the {}x{} calibrated frame", crop, w, h);
    }

    Ok(())
}
