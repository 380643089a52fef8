//! Processed frame output
//!
//! Frames are written as numbered grayscale PNGs. Frame rate and dimensions
//! are fixed when the output is created and recorded in `manifest.json` when
//! the output is finished, so the sequence can be muxed later
//! (`ffmpeg -framerate 12 -i %06d.png ...`). The manifest is also written on
//! drop, which keeps every frame written so far usable after an early exit.

use image::GrayImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::SinkError;

const MANIFEST_NAME: &str = "manifest.json";

/// Sequential writer for processed frames
pub trait FrameSink {
    /// Append a frame; frames are stored in call order
    fn write(&mut self, frame: &GrayImage) -> Result<(), SinkError>;

    /// Flush and close; further calls are no-ops
    fn finish(&mut self) -> Result<(), SinkError>;

    fn frames_written(&self) -> u64;
}

/// Output description stored next to the frames
#[derive(Debug, Clone, Serialize)]
struct Manifest {
    fps: f64,
    width: u32,
    height: u32,
    frames: u64,
    pattern: &'static str,
}

/// Numbered PNG frames in one directory
pub struct ImageSequenceSink {
    dir: PathBuf,
    fps: f64,
    width: u32,
    height: u32,
    frame_count: u64,
    finished: bool,
}

impl ImageSequenceSink {
    /// Create (or empty) the output directory
    pub fn create(dir: &Path, fps: f64, width: u32, height: u32) -> Result<Self, SinkError> {
        let create_err = |source| SinkError::Create {
            path: dir.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(create_err)?;

        // Stale frames from a previous, longer run would otherwise be picked
        // up by the muxer
        let mut removed = 0usize;
        for entry in std::fs::read_dir(dir).map_err(create_err)? {
            let path = entry.map_err(create_err)?.path();
            let is_output = path
                .extension()
                .map(|ext| ext == "png")
                .unwrap_or(false)
                || path.file_name().map(|n| n == MANIFEST_NAME).unwrap_or(false);
            if path.is_file() && is_output {
                std::fs::remove_file(&path).map_err(create_err)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Removed {} files from previous output in {:?}", removed, dir);
        }

        info!("Output: {:?} ({}x{} @ {} fps)", dir, width, height, fps);

        Ok(Self {
            dir: dir.to_path_buf(),
            fps,
            width,
            height,
            frame_count: 0,
            finished: false,
        })
    }

    fn write_manifest(&self) -> Result<(), SinkError> {
        let path = self.dir.join(MANIFEST_NAME);
        let manifest = Manifest {
            fps: self.fps,
            width: self.width,
            height: self.height,
            frames: self.frame_count,
            pattern: "%06d.png",
        };
        let content = serde_json::to_string_pretty(&manifest)
            .map_err(|e| SinkError::Manifest {
                path: path.clone(),
                source: e.into(),
            })?;
        std::fs::write(&path, content).map_err(|source| SinkError::Manifest { path, source })
    }
}

impl FrameSink for ImageSequenceSink {
    fn write(&mut self, frame: &GrayImage) -> Result<(), SinkError> {
        let (w, h) = frame.dimensions();
        if (w, h) != (self.width, self.height) {
            return Err(SinkError::DimensionMismatch {
                width: self.width,
                height: self.height,
                got_width: w,
                got_height: h,
            });
        }

        let index = self.frame_count + 1;
        let path = self.dir.join(format!("{:06}.png", index));
        frame
            .save(&path)
            .map_err(|source| SinkError::Encode { index, source })?;
        self.frame_count = index;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.write_manifest()?;
        info!("Closed output {:?} after {} frames", self.dir, self.frame_count);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }
}

impl Drop for ImageSequenceSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Failed to finalize output: {}", e);
        }
    }
}
