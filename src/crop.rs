//! Crop window placement in the rectified frame
//!
//! The crop size is given in centimetres and converted with the calibration
//! scale. A window that does not fit is reported rather than clipped: it
//! means the crop or the anchor margin was sized wrongly for this footage.

use image::{imageops, GrayImage};
use serde::Serialize;

use crate::config::AnchorPolicy;
use crate::error::CropError;

/// Pixel distances beyond this are out of any frame; keeps placement arithmetic in range
const PX_LIMIT: f64 = (1u64 << 40) as f64;

/// Pixel rectangle inside the rectified frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    pub fn compute(
        frame_width: u32,
        frame_height: u32,
        crop_width_cm: f64,
        crop_height_cm: f64,
        px_per_cm: f64,
        anchor: AnchorPolicy,
    ) -> Result<Self, CropError> {
        let to_px = |cm: f64| {
            let px = (cm * px_per_cm).round();
            if px.is_finite() {
                Ok(px.clamp(-PX_LIMIT, PX_LIMIT) as i64)
            } else {
                Err(CropError::NotFinite)
            }
        };

        let width = to_px(crop_width_cm)?;
        let height = to_px(crop_height_cm)?;
        if width <= 0 || height <= 0 {
            return Err(CropError::Empty { width, height });
        }

        let fw = frame_width as i64;
        let fh = frame_height as i64;

        let (x, y) = match anchor {
            AnchorPolicy::BottomCenter { baseline_margin_cm } => {
                ((fw - width).div_euclid(2), fh - to_px(baseline_margin_cm)? - height)
            }
            AnchorPolicy::BottomLeft { baseline_margin_cm } => {
                (0, fh - to_px(baseline_margin_cm)? - height)
            }
            AnchorPolicy::Offset { x_cm, y_cm } => (to_px(x_cm)?, to_px(y_cm)?),
        };

        let fits = |start: i64, len: i64, frame: i64| {
            start >= 0 && start.checked_add(len).map_or(false, |end| end <= frame)
        };
        if !fits(x, width, fw) || !fits(y, height, fh) {
            return Err(CropError::OutOfBounds {
                x,
                y,
                width,
                height,
                frame_width,
                frame_height,
            });
        }

        Ok(Self {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    /// Copy the window out of a rectified frame
    pub fn apply(&self, frame: &GrayImage) -> GrayImage {
        imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

impl std::fmt::Display for CropWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} at ({}, {})", self.width, self.height, self.x, self.y)
    }
}
