//! Raw frame input
//!
//! The pipeline pulls frames one at a time through [`FrameSource`]. The
//! bundled implementation reads a directory of still frames, e.g. the output
//! of `ffmpeg -i IMG_1694.MOV frames/%06d.png`, in file-name order.

use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DecodeEnd, SourceError};

/// Extensions the image decoder is built with
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Sequential access to raw frames
pub trait FrameSource {
    /// Decode the next frame; `Err(DecodeEnd)` once no frame can be produced
    fn next_frame(&mut self) -> Result<DynamicImage, DecodeEnd>;

    /// Recording frame rate of the footage
    fn frame_rate(&self) -> f64;
}

/// Frames stored as individual image files in one directory
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::Open {
            path: dir.to_path_buf(),
            reason,
        };

        if !(fps > 0.0) {
            return Err(open_err(format!("invalid frame rate {}", fps)));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| open_err(e.to_string()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(open_err("no frame images found".to_string()));
        }

        info!("Frame source: {:?} ({} frames @ {} fps)", dir, files.len(), fps);

        Ok(Self {
            files,
            next: 0,
            fps,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            FRAME_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<DynamicImage, DecodeEnd> {
        let path = self.files.get(self.next).ok_or(DecodeEnd)?;
        self.next += 1;

        match image::open(path) {
            Ok(frame) => {
                debug!("Decoded {:?}", path);
                Ok(frame)
            }
            Err(e) => {
                // An unreadable frame ends the stream the same way running
                // out of files does
                warn!("Failed to decode {:?}: {}; treating as end of stream", path, e);
                self.next = self.files.len();
                Err(DecodeEnd)
            }
        }
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }
}
