//! Perspective transformation from raw camera pixels to calibrated pixels
//!
//! The four picked corners of the calibration box are mapped onto an upright
//! rectangle of `width_cm * px_per_cm` by `height_cm * px_per_cm` pixels, so
//! that after warping one centimetre is the same number of pixels everywhere
//! in the frame.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::config::{CalibrationPoints, MAX_CALIBRATED_SIDE};
use crate::error::CalibrationError;

/// Two corners closer than this (px) are treated as the same point
const MIN_CORNER_DISTANCE: f64 = 1e-6;

/// Minimum sine of the angle spanned by any three corners
const COLLINEAR_TOLERANCE: f64 = 1e-3;

/// Perspective transformation matrix (3x3 homography)
#[derive(Debug, Clone)]
pub struct PerspectiveTransform {
    /// Raw pixel -> calibrated pixel
    matrix: Matrix3<f64>,
    /// Calibrated pixel -> raw pixel (used for warping)
    inverse: Matrix3<f64>,
    src: [(f64, f64); 4],
    dst: [(f64, f64); 4],
    /// Calibrated frame dimensions
    dst_width: u32,
    dst_height: u32,
}

impl PerspectiveTransform {
    /// Build the transform for a calibration box of known physical size
    ///
    /// Corners must be ordered top-left, top-right, bottom-right, bottom-left.
    pub fn estimate(
        corners: &CalibrationPoints,
        width_cm: f64,
        height_cm: f64,
        px_per_cm: f64,
    ) -> Result<Self, CalibrationError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width_cm) || !valid(height_cm) || !valid(px_per_cm) {
            return Err(CalibrationError::InvalidScale {
                width: width_cm,
                height: height_cm,
                px_per_cm,
            });
        }

        let w = width_cm * px_per_cm;
        let h = height_cm * px_per_cm;
        let side = 1.0..=MAX_CALIBRATED_SIDE as f64;
        if !side.contains(&w.round()) || !side.contains(&h.round()) {
            return Err(CalibrationError::InvalidScale {
                width: width_cm,
                height: height_cm,
                px_per_cm,
            });
        }
        let src = corners.corners.map(|p| p.as_tuple());
        let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

        Self::compute(src, dst, w.round() as u32, h.round() as u32)
    }

    /// Compute the perspective transform from 4 source points to 4 destination points
    pub fn compute(
        src: [(f64, f64); 4],
        dst: [(f64, f64); 4],
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Self, CalibrationError> {
        check_quadrilateral(&src)?;
        check_quadrilateral(&dst)?;

        let matrix = compute_homography(&src, &dst)?;
        let inverse = matrix.try_inverse().ok_or(CalibrationError::Singular)?;
        let inverse = normalize(inverse).ok_or(CalibrationError::Singular)?;

        Ok(Self {
            matrix,
            inverse,
            src,
            dst,
            dst_width,
            dst_height,
        })
    }

    /// Transform a point from raw to calibrated coordinates
    #[inline]
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.matrix, x, y)
    }

    /// Transform a point from calibrated to raw coordinates
    #[inline]
    pub fn inverse_transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.inverse, x, y)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Calibrated frame size in pixels
    pub fn output_size(&self) -> (u32, u32) {
        (self.dst_width, self.dst_height)
    }

    /// Largest distance between a mapped source corner and its target
    pub fn max_corner_error(&self) -> f64 {
        self.src
            .iter()
            .zip(self.dst.iter())
            .map(|(&(sx, sy), &(dx, dy))| {
                let (x, y) = self.transform_point(sx, sy);
                ((x - dx).powi(2) + (y - dy).powi(2)).sqrt()
            })
            .fold(0.0, f64::max)
    }
}

/// Reject coincident or collinear corners and corners out of order
fn check_quadrilateral(pts: &[(f64, f64); 4]) -> Result<(), CalibrationError> {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];

    for &(i, j, k) in &TRIPLES {
        let (a, b, c) = (pts[i], pts[j], pts[k]);
        let ab = (b.0 - a.0, b.1 - a.1);
        let ac = (c.0 - a.0, c.1 - a.1);
        let bc = (c.0 - b.0, c.1 - b.1);

        let lengths = [norm(ab), norm(ac), norm(bc)];
        if lengths.iter().any(|&l| !(l > MIN_CORNER_DISTANCE)) {
            return Err(CalibrationError::Degenerate(i, j, k));
        }

        // |ab x ac| = 2 * area; dividing by the two longest sides gives the
        // sine of the angle between them, independent of scale
        let mut sorted = lengths;
        sorted.sort_by(|x, y| y.total_cmp(x));
        let sine = cross(ab, ac).abs() / (sorted[0] * sorted[1]);
        if sine < COLLINEAR_TOLERANCE {
            return Err(CalibrationError::Degenerate(i, j, k));
        }
    }

    // Screen coordinates have y pointing down, so a clockwise walk
    // TL -> TR -> BR -> BL turns with a positive cross product at every corner
    for i in 0..4 {
        let p0 = pts[i];
        let p1 = pts[(i + 1) % 4];
        let p2 = pts[(i + 2) % 4];
        let turn = cross((p1.0 - p0.0, p1.1 - p0.1), (p2.0 - p1.0, p2.1 - p1.1));
        if turn <= 0.0 {
            return Err(CalibrationError::Winding);
        }
    }

    Ok(())
}

#[inline]
fn cross(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.0 * b.1 - a.1 * b.0
}

#[inline]
fn norm(v: (f64, f64)) -> f64 {
    (v.0 * v.0 + v.1 * v.1).sqrt()
}

/// Compute a 3x3 homography matrix from 4 point correspondences
///
/// With h33 fixed to 1 each correspondence (x,y) -> (x',y') gives two rows:
///   x*h11 + y*h12 + h13 - x'*x*h31 - x'*y*h32 = x'
///   x*h21 + y*h22 + h23 - y'*x*h31 - y'*y*h32 = y'
fn compute_homography(
    src: &[(f64, f64); 4],
    dst: &[(f64, f64); 4],
) -> Result<Matrix3<f64>, CalibrationError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (x, y) = src[i];
        let (xp, yp) = dst[i];
        let r1 = i * 2;
        let r2 = r1 + 1;

        a[(r1, 0)] = x;
        a[(r1, 1)] = y;
        a[(r1, 2)] = 1.0;
        a[(r1, 6)] = -xp * x;
        a[(r1, 7)] = -xp * y;
        b[r1] = xp;

        a[(r2, 3)] = x;
        a[(r2, 4)] = y;
        a[(r2, 5)] = 1.0;
        a[(r2, 6)] = -yp * x;
        a[(r2, 7)] = -yp * y;
        b[r2] = yp;
    }

    let h = a.lu().solve(&b).ok_or(CalibrationError::Singular)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::Singular);
    }

    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Scale so the bottom-right entry is 1
fn normalize(m: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = m[(2, 2)];
    if s.abs() < 1e-12 || !s.is_finite() {
        return None;
    }
    Some(m / s)
}

/// Apply a homography matrix to a point
///
/// Points that map to infinity come back as NaN.
#[inline]
fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return (f64::NAN, f64::NAN);
    }
    (p[0] / p[2], p[1] / p[2])
}
