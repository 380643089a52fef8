//! Burned-in frame annotations
//!
//! Draws calibrated axis ticks along the left and bottom edges of the
//! cropped frame and a label with the frame number and the time since the
//! first processed frame. The label uses the bundled DejaVu Sans unless
//! another TrueType font is configured.

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::path::Path;

/// DejaVu Sans, used for labels when no font file is configured
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Timing metadata for one output frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// 1-based index in the raw footage
    pub frame_id: u32,
    pub frame_start: u32,
    pub source_fps: f64,
    pub output_fps: f64,
}

impl FrameInfo {
    /// Seconds since `frame_start` in recording time
    pub fn elapsed(&self) -> f64 {
        (self.frame_id.saturating_sub(self.frame_start)) as f64 / self.source_fps
    }

    /// How much slower than real time the output plays
    pub fn slowdown(&self) -> f64 {
        self.source_fps / self.output_fps
    }

    pub fn label(&self) -> String {
        format!(
            "frame {}  t = {:.3} s  ({:.1}x slower)",
            self.frame_id,
            self.elapsed(),
            self.slowdown()
        )
    }
}

/// Draws on a cropped frame in place; must not change its size
pub trait Annotator {
    fn annotate(&mut self, frame: &mut GrayImage, info: &FrameInfo);
}

/// Axis ticks plus the frame/time label
pub struct InfoOverlay {
    tick_spacing_px: f64,
    font: Font<'static>,
    label_height: f32,
}

impl InfoOverlay {
    pub fn new(axis_interval_cm: f64, px_per_cm: f64) -> Result<Self> {
        let font = Font::try_from_bytes(BUNDLED_FONT).context("Bundled label font is unreadable")?;
        Ok(Self {
            tick_spacing_px: axis_interval_cm * px_per_cm,
            font,
            label_height: 24.0,
        })
    }

    /// Label text height in pixels
    pub fn with_label_height(mut self, label_height: f32) -> Self {
        self.label_height = label_height;
        self
    }

    /// Replace the bundled font with a TrueType font file
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font {:?}", path))?;
        self.font = Font::try_from_vec(bytes)
            .with_context(|| format!("{:?} is not a usable TrueType font", path))?;
        Ok(self)
    }

    fn draw_ticks(&self, frame: &mut GrayImage) {
        let (width, height) = frame.dimensions();
        if self.tick_spacing_px < 1.0 || width == 0 || height == 0 {
            return;
        }

        let white = Luma([255u8]);
        let major = (width.min(height) as f32 * 0.04).max(3.0);
        let bottom = (height - 1) as f32;

        // Bottom axis, measured from the left edge
        let mut x = 0.0;
        while x < width as f64 {
            let xf = x as f32;
            draw_line_segment_mut(frame, (xf, bottom), (xf, bottom - major), white);
            x += self.tick_spacing_px;
        }

        // Left axis, measured up from the bottom edge
        let mut y = 0.0;
        while y < height as f64 {
            let yf = bottom - y as f32;
            draw_line_segment_mut(frame, (0.0, yf), (major, yf), white);
            y += self.tick_spacing_px;
        }
    }

    fn draw_label(&self, frame: &mut GrayImage, text: &str) {
        let font = &self.font;
        let scale = Scale::uniform(self.label_height);
        let (text_w, text_h) = text_size(scale, font, text);
        let pad = 4;
        let w = (text_w + 2 * pad).max(1) as u32;
        let h = (text_h + 2 * pad).max(1) as u32;

        draw_filled_rect_mut(frame, Rect::at(0, 0).of_size(w, h), Luma([0u8]));
        draw_text_mut(frame, Luma([255u8]), pad, pad, scale, font, text);
    }
}

impl Annotator for InfoOverlay {
    fn annotate(&mut self, frame: &mut GrayImage, info: &FrameInfo) {
        self.draw_ticks(frame);
        self.draw_label(frame, &info.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(frame_id: u32) -> FrameInfo {
        FrameInfo {
            frame_id,
            frame_start: 166,
            source_fps: 240.0,
            output_fps: 12.0,
        }
    }

    #[test]
    fn test_elapsed_and_slowdown() {
        assert_eq!(info(166).elapsed(), 0.0);
        assert!((info(226).elapsed() - 0.25).abs() < 1e-12);
        assert_eq!(info(170).slowdown(), 20.0);
        assert!(info(190).label().starts_with("frame 190  t = 0.100 s"));
    }

    #[test]
    fn test_ticks_on_calibrated_grid() {
        // 1 cm ticks at 10 px/cm on a 6 x 3 cm crop, small label kept to the top rows
        let mut overlay = InfoOverlay::new(1.0, 10.0).unwrap().with_label_height(4.0);
        let mut frame = GrayImage::new(60, 30);
        overlay.annotate(&mut frame, &info(170));

        assert_eq!(frame.dimensions(), (60, 30));
        assert_eq!(frame.get_pixel(0, 29)[0], 255);
        assert_eq!(frame.get_pixel(10, 29)[0], 255);
        assert_eq!(frame.get_pixel(50, 28)[0], 255);
        assert_eq!(frame.get_pixel(5, 29)[0], 0);
        // Left axis tick 1 cm above the bottom
        assert_eq!(frame.get_pixel(1, 19)[0], 255);
        assert_eq!(frame.get_pixel(30, 15)[0], 0);
    }

    #[test]
    fn test_missing_font_is_an_error() {
        let overlay = InfoOverlay::new(1.0, 10.0).unwrap();
        assert!(overlay.with_font_file(Path::new("/nonexistent/font.ttf")).is_err());
    }

    #[test]
    fn test_label_burned_in_by_default() {
        let mut overlay = InfoOverlay::new(1.0, 10.0).unwrap();
        let mut render = |frame_id| {
            let mut frame = GrayImage::new(400, 60);
            overlay.annotate(&mut frame, &info(frame_id));
            frame
        };
        let a = render(170);
        let b = render(190);

        // Label area, clear of the axis ticks
        let label = |frame: &GrayImage| {
            (0..30)
                .flat_map(|y| (20..400).map(move |x| (x, y)))
                .map(|(x, y)| frame.get_pixel(x, y)[0])
                .collect::<Vec<u8>>()
        };
        assert!(label(&a).iter().any(|&v| v > 128));
        assert_ne!(label(&a), label(&b));
    }
}
