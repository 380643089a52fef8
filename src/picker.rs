//! Calibration corner selection
//!
//! Picking happens once per experiment folder, on the first processed
//! frame. The terminal picker saves that frame to disk so the operator can
//! read corner coordinates off it in any image viewer, then asks for them on
//! stdin.

use anyhow::{bail, Context, Result};
use image::GrayImage;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::info;

use crate::config::{CalibrationPoints, Point};

/// Supplies the four calibration corners for a frame
pub trait PointPicker {
    /// Corners in order top-left, top-right, bottom-right, bottom-left
    fn pick(&mut self, frame: &GrayImage) -> Result<CalibrationPoints>;
}

/// Corners known up front (`--corners` or headless runs)
pub struct FixedPicker {
    corners: CalibrationPoints,
}

impl FixedPicker {
    pub fn new(corners: CalibrationPoints) -> Self {
        Self { corners }
    }
}

impl PointPicker for FixedPicker {
    fn pick(&mut self, _frame: &GrayImage) -> Result<CalibrationPoints> {
        Ok(self.corners)
    }
}

/// Interactive picker reading `x,y` lines
pub struct TerminalPicker<R, W> {
    preview_path: PathBuf,
    input: R,
    output: W,
}

impl TerminalPicker<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio(preview_path: PathBuf) -> Self {
        Self::new(preview_path, std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPicker<R, W> {
    pub fn new(preview_path: PathBuf, input: R, output: W) -> Self {
        Self {
            preview_path,
            input,
            output,
        }
    }

    fn read_point(&mut self, label: &str, width: u32, height: u32) -> Result<Point> {
        loop {
            write!(self.output, "  {} corner as x,y: ", label)?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                bail!("input closed before all calibration corners were entered");
            }

            match parse_point(&line) {
                Some(p) if p.x >= 0.0 && p.y >= 0.0 && p.x < width as f64 && p.y < height as f64 => {
                    return Ok(p)
                }
                Some(p) => writeln!(
                    self.output,
                    "  ({}, {}) is outside the {}x{} frame, try again",
                    p.x, p.y, width, height
                )?,
                None => writeln!(self.output, "  expected two numbers like 312.5,201")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> PointPicker for TerminalPicker<R, W> {
    fn pick(&mut self, frame: &GrayImage) -> Result<CalibrationPoints> {
        frame
            .save(&self.preview_path)
            .with_context(|| format!("Failed to save calibration frame to {:?}", self.preview_path))?;
        info!("Saved calibration frame to {:?}", self.preview_path);

        let (width, height) = frame.dimensions();
        writeln!(
            self.output,
            "Open {} and enter the four calibration box corners in pixels.",
            self.preview_path.display()
        )?;

        let mut corners = [Point::new(0.0, 0.0); 4];
        for (corner, label) in corners.iter_mut().zip(CalibrationPoints::LABELS) {
            *corner = self.read_point(label, width, height)?;
        }
        Ok(CalibrationPoints::new(corners))
    }
}

/// Parse `x,y`, `x y` or `(x, y)`
fn parse_point(line: &str) -> Option<Point> {
    let cleaned = line.trim().trim_start_matches('(').trim_end_matches(')');
    let mut parts = cleaned
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some(Point::new(x, y))
}
