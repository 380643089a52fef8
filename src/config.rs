//! Configuration management for colrect
//!
//! Everything the pipeline needs is passed in explicitly: a [`RunConfig`]
//! loaded from TOML (file names, source timing, overlay settings, default
//! session parameters) and the per-folder [`SessionParameters`] that are
//! persisted next to the footage on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ParameterError;

/// A 2D point in raw pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// The four operator-selected corners of the calibration box
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationPoints {
    /// Order: top-left, top-right, bottom-right, bottom-left
    pub corners: [Point; 4],
}

impl CalibrationPoints {
    pub const LABELS: [&'static str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];

    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Build from a flat `[x0, y0, x1, y1, ...]` list
    pub fn from_flat(values: &[f64]) -> Option<Self> {
        if values.len() != 8 {
            return None;
        }
        let mut corners = [Point::new(0.0, 0.0); 4];
        for (i, corner) in corners.iter_mut().enumerate() {
            *corner = Point::new(values[2 * i], values[2 * i + 1]);
        }
        Some(Self { corners })
    }
}

/// Where the crop window sits inside the rectified frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorPolicy {
    /// Horizontally centred, bottom edge `baseline_margin_cm` above the frame bottom
    BottomCenter { baseline_margin_cm: f64 },
    /// Against the left edge, bottom edge `baseline_margin_cm` above the frame bottom
    BottomLeft { baseline_margin_cm: f64 },
    /// Explicit top-left corner in physical units
    Offset { x_cm: f64, y_cm: f64 },
}

impl Default for AnchorPolicy {
    fn default() -> Self {
        AnchorPolicy::BottomCenter {
            baseline_margin_cm: 0.0,
        }
    }
}

/// Processing parameters for one experiment folder
///
/// Once saved for a folder these are authoritative: later runs load them
/// verbatim so the output can be reproduced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionParameters {
    /// Calibration box size (cm)
    pub calib_box_height: f64,
    pub calib_box_width: f64,

    /// Cropped region size (cm)
    pub crop_height: f64,
    pub crop_width: f64,

    /// Spacing of the burned-in axis ticks (cm)
    pub axis_interval: f64,

    /// Pixels per cm in the rectified frame
    pub px_per_cm: f64,

    /// Output frame rate (fps)
    pub output_fps: f64,

    /// First processed frame, 1-based
    pub frame_start: u32,
    /// One past the last processed frame
    pub frame_end: u32,

    #[serde(default)]
    pub anchor: AnchorPolicy,
}

/// Largest calibrated frame side in pixels
pub const MAX_CALIBRATED_SIDE: u32 = 1 << 15;

impl Default for SessionParameters {
    fn default() -> Self {
        let crop_height = 3.0;
        let frame_start = 166;
        Self {
            calib_box_height: 9.6,
            calib_box_width: 15.2,
            crop_height,
            crop_width: 2.0 * crop_height,
            axis_interval: (crop_height / 3.0).floor(),
            px_per_cm: 200.0,
            output_fps: 12.0,
            frame_start,
            frame_end: frame_start + 60,
            anchor: AnchorPolicy::default(),
        }
    }
}

impl SessionParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        let positive = [
            ("calib_box_height", self.calib_box_height),
            ("calib_box_width", self.calib_box_width),
            ("crop_height", self.crop_height),
            ("crop_width", self.crop_width),
            ("axis_interval", self.axis_interval),
            ("px_per_cm", self.px_per_cm),
            ("output_fps", self.output_fps),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ParameterError::NotPositive { name, value });
            }
        }

        let anchor = match self.anchor {
            AnchorPolicy::BottomCenter { baseline_margin_cm }
            | AnchorPolicy::BottomLeft { baseline_margin_cm } => {
                vec![("baseline_margin_cm", baseline_margin_cm)]
            }
            AnchorPolicy::Offset { x_cm, y_cm } => vec![("x_cm", x_cm), ("y_cm", y_cm)],
        };
        for (name, value) in anchor {
            if !value.is_finite() {
                return Err(ParameterError::NotFinite { name, value });
            }
        }

        let width = (self.calib_box_width * self.px_per_cm).round();
        let height = (self.calib_box_height * self.px_per_cm).round();
        let side = 1.0..=MAX_CALIBRATED_SIDE as f64;
        if !side.contains(&width) || !side.contains(&height) {
            return Err(ParameterError::CalibratedSize {
                width,
                height,
                max: MAX_CALIBRATED_SIDE,
            });
        }

        if self.frame_start < 1 || self.frame_end <= self.frame_start {
            return Err(ParameterError::FrameRange {
                start: self.frame_start,
                end: self.frame_end,
            });
        }

        Ok(())
    }

    /// Size of the rectified frame in pixels; only meaningful after `validate`
    pub fn calibrated_size(&self) -> (u32, u32) {
        (
            (self.calib_box_width * self.px_per_cm).round() as u32,
            (self.calib_box_height * self.px_per_cm).round() as u32,
        )
    }
}

/// First-run values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct SessionOverrides {
    pub calib_box_height: Option<f64>,
    pub calib_box_width: Option<f64>,
    pub crop_height: Option<f64>,
    pub crop_width: Option<f64>,
    pub axis_interval: Option<f64>,
    pub px_per_cm: Option<f64>,
    pub output_fps: Option<f64>,
    pub frame_start: Option<u32>,
    pub frame_end: Option<u32>,
}

impl SessionOverrides {
    pub fn is_empty(&self) -> bool {
        self.calib_box_height.is_none()
            && self.calib_box_width.is_none()
            && self.crop_height.is_none()
            && self.crop_width.is_none()
            && self.axis_interval.is_none()
            && self.px_per_cm.is_none()
            && self.output_fps.is_none()
            && self.frame_start.is_none()
            && self.frame_end.is_none()
    }

    pub fn apply(&self, params: &mut SessionParameters) {
        if let Some(v) = self.calib_box_height {
            params.calib_box_height = v;
        }
        if let Some(v) = self.calib_box_width {
            params.calib_box_width = v;
        }
        if let Some(v) = self.crop_height {
            params.crop_height = v;
        }
        if let Some(v) = self.crop_width {
            params.crop_width = v;
        }
        if let Some(v) = self.axis_interval {
            params.axis_interval = v;
        }
        if let Some(v) = self.px_per_cm {
            params.px_per_cm = v;
        }
        if let Some(v) = self.output_fps {
            params.output_fps = v;
        }
        if let Some(v) = self.frame_start {
            params.frame_start = v;
            // Keep the default 60-frame window when only the start moves
            if self.frame_end.is_none() {
                params.frame_end = v.saturating_add(60);
            }
        }
        if let Some(v) = self.frame_end {
            params.frame_end = v;
        }
    }
}

/// File names inside an experiment folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNames {
    /// Directory holding the decoded raw frames
    pub frames_dir: String,
    /// Persisted session parameters
    pub params: String,
    /// Persisted calibration corners
    pub corners: String,
    /// Directory receiving the processed frames
    pub output_dir: String,
    /// Where the terminal picker writes the frame to pick corners on
    pub pick_preview: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            frames_dir: "frames".to_string(),
            params: "input_parameters.toml".to_string(),
            corners: "calib_corners.json".to_string(),
            output_dir: "video_calibrated".to_string(),
            pick_preview: "calibration_frame.png".to_string(),
        }
    }
}

/// Source timing and rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Frame rate the raw footage was recorded at
    pub source_fps: f64,
    /// Value written where the rectified frame has no source pixel
    pub background: u8,
    /// TrueType font for the frame/time label; the bundled DejaVu Sans otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
    /// Label height in pixels
    pub label_height: f32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source_fps: 240.0,
            background: 0,
            font: None,
            label_height: 24.0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub files: FileNames,

    #[serde(default)]
    pub video: VideoConfig,

    /// Session parameters used when a folder has none saved
    #[serde(default)]
    pub defaults: SessionParameters,
}

impl RunConfig {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: RunConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = RunConfig::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
