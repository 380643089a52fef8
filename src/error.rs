//! Error types shared across the calibration pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning four picked corners into a usable homography
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("degenerate calibration: corners {0}, {1} and {2} are collinear or coincident")]
    Degenerate(usize, usize, usize),

    #[error("calibration corners must be a convex quadrilateral ordered top-left, top-right, bottom-right, bottom-left")]
    Winding,

    #[error("calibration box must have a positive size and scale (got {width} x {height} cm at {px_per_cm} px/cm)")]
    InvalidScale {
        width: f64,
        height: f64,
        px_per_cm: f64,
    },

    #[error("homography system is singular")]
    Singular,
}

/// Failures while placing the crop window inside the rectified frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CropError {
    #[error(
        "crop window {width}x{height} at ({x}, {y}) does not fit inside the {frame_width}x{frame_height} calibrated frame"
    )]
    OutOfBounds {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("crop window has zero size ({width}x{height} px)")]
    Empty { width: i64, height: i64 },

    #[error("crop size or anchor is not a finite number of pixels")]
    NotFinite,
}

/// Invalid session parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{name} must be positive (got {value})")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must be a finite number (got {value})")]
    NotFinite { name: &'static str, value: f64 },

    #[error("calibrated frame of {width} x {height} px is outside 1..={max} px per side")]
    CalibratedSize { width: f64, height: f64, max: u32 },

    #[error("frame range [{start}, {end}) is empty or starts before frame 1")]
    FrameRange { start: u32, end: u32 },
}

/// The frame source could not be opened at all
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open frame source {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },
}

/// The source has no further frames
///
/// A true end of stream and an unreadable frame are not distinguished; both
/// terminate the run normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("end of frame stream")]
pub struct DecodeEnd;

/// Failures writing processed frames
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot create output {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode frame {index}: {source}")]
    Encode {
        index: u64,
        #[source]
        source: image::ImageError,
    },

    #[error("frame is {got_width}x{got_height} but the output was created for {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("failed to write manifest {path:?}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
