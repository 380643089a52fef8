//! Frame rectification
//!
//! Warps a raw grayscale frame onto the calibrated grid by inverse mapping:
//! every output pixel is pulled back through the homography and sampled
//! bilinearly from the raw frame. Pulled-back locations that fall outside
//! the raw frame get a fixed background value.

use image::{GrayImage, Luma};
use rayon::prelude::*;

use crate::transform::PerspectiveTransform;

/// Round-off allowed when a pulled-back coordinate lands on the frame edge
const EDGE_SLACK: f64 = 1e-6;

/// Warp `src` onto a `width` x `height` calibrated frame
pub fn rectify(
    src: &GrayImage,
    transform: &PerspectiveTransform,
    width: u32,
    height: u32,
    background: u8,
) -> GrayImage {
    let mut dst = GrayImage::from_pixel(width, height, Luma([background]));
    if width == 0 || height == 0 {
        return dst;
    }

    let stride = width as usize;
    // Rows are independent
    dst.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(dst_y, row)| {
            for (dst_x, out) in row.iter_mut().enumerate() {
                let (sx, sy) = transform.inverse_transform_point(dst_x as f64, dst_y as f64);
                if let Some(value) = bilinear_sample(src, sx, sy) {
                    *out = value;
                }
            }
        });

    dst
}

/// Bilinear interpolation sampling
///
/// Returns `None` outside `[0, w-1] x [0, h-1]` (including NaN coordinates).
#[inline]
fn bilinear_sample(src: &GrayImage, x: f64, y: f64) -> Option<u8> {
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let inside = |v: f64, max: f64| v >= -EDGE_SLACK && v <= max + EDGE_SLACK;
    if !(inside(x, max_x) && inside(y, max_y)) {
        return None;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = src.get_pixel(x0, y0)[0] as f64;
    let p10 = src.get_pixel(x1, y0)[0] as f64;
    let p01 = src.get_pixel(x0, y1)[0] as f64;
    let p11 = src.get_pixel(x1, y1)[0] as f64;

    let value = p00 * (1.0 - fx) * (1.0 - fy)
        + p10 * fx * (1.0 - fy)
        + p01 * (1.0 - fx) * fy
        + p11 * fx * fy;

    Some(value.round().clamp(0.0, 255.0) as u8)
}
