//! Frame processing pipeline
//!
//! A run walks the raw footage once:
//! - frames before `frame_start` are decoded and discarded
//! - at `frame_start` the calibration corners are loaded (or picked), and the
//!   homography and crop window are fixed for the rest of the run
//! - every frame in `[frame_start, frame_end)` is converted to grayscale,
//!   rectified, cropped, annotated and written
//! - the run ends at `frame_end` or when the source runs dry, whichever
//!   comes first
//!
//! Calibration and crop errors surface before the output is created.

use anyhow::{Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{CalibrationPoints, SessionOverrides, SessionParameters};
use crate::crop::CropWindow;
use crate::error::{DecodeEnd, SinkError};
use crate::overlay::{Annotator, FrameInfo};
use crate::picker::PointPicker;
use crate::rectify::rectify;
use crate::sink::FrameSink;
use crate::source::FrameSource;
use crate::store::RecordStore;
use crate::transform::PerspectiveTransform;

/// Settings a pipeline is constructed with
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Experiment folder; keys the saved calibration corners
    pub folder: PathBuf,
    pub params: SessionParameters,
    /// Value for rectified pixels with no source pixel behind them
    pub background: u8,
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Reached `frame_end`
    RangeComplete,
    /// The source had no more frames
    EndOfStream,
}

/// What a finished run did
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_skipped: u32,
    pub frames_written: u64,
    /// Rectified frame size, once calibrated
    pub calibrated_size: Option<(u32, u32)>,
    pub crop: Option<CropWindow>,
    pub end: EndReason,
}

/// Transform and crop fixed at the first processed frame
struct Calibration {
    transform: PerspectiveTransform,
    width: u32,
    height: u32,
    crop: CropWindow,
}

/// Single-threaded, frame-at-a-time processing of one experiment folder
pub struct Pipeline<'a> {
    config: PipelineConfig,
    corner_store: &'a dyn RecordStore<CalibrationPoints>,
    picker: Box<dyn PointPicker + 'a>,
    annotator: Box<dyn Annotator + 'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        corner_store: &'a dyn RecordStore<CalibrationPoints>,
        picker: Box<dyn PointPicker + 'a>,
        annotator: Box<dyn Annotator + 'a>,
    ) -> Self {
        Self {
            config,
            corner_store,
            picker,
            annotator,
        }
    }

    /// Process the configured frame range
    ///
    /// `make_sink` is called with the crop size once calibration succeeded.
    /// The sink is finished on every exit path after that point.
    pub fn run<S, F>(&mut self, source: &mut dyn FrameSource, make_sink: F) -> Result<RunSummary>
    where
        S: FrameSink,
        F: FnOnce(u32, u32) -> Result<S, SinkError>,
    {
        let params = self.config.params.clone();
        params.validate().context("Invalid session parameters")?;

        info!(
            "Processing frames [{}, {}) of {:?}",
            params.frame_start, params.frame_end, self.config.folder
        );

        // Seeking: decode and drop frames 1..frame_start
        let mut frames_skipped = 0;
        while frames_skipped + 1 < params.frame_start {
            if let Err(DecodeEnd) = source.next_frame() {
                warn!("Footage ended before frame {}; nothing to process", params.frame_start);
                return Ok(RunSummary {
                    frames_skipped,
                    frames_written: 0,
                    calibrated_size: None,
                    crop: None,
                    end: EndReason::EndOfStream,
                });
            }
            frames_skipped += 1;
        }
        debug!("Skipped {} frames", frames_skipped);

        // Calibrating, on the first frame of the range
        let first = match source.next_frame() {
            Ok(frame) => frame.to_luma8(),
            Err(DecodeEnd) => {
                warn!("Footage ended before frame {}; nothing to process", params.frame_start);
                return Ok(RunSummary {
                    frames_skipped,
                    frames_written: 0,
                    calibrated_size: None,
                    crop: None,
                    end: EndReason::EndOfStream,
                });
            }
        };
        let calibration = self.calibrate(&first)?;

        let mut sink = make_sink(calibration.crop.width, calibration.crop.height)
            .context("Failed to create output")?;

        // Processing
        let started = Instant::now();
        let result = self.process(source, &calibration, first, &mut sink);
        let finished = sink.finish().context("Failed to finalize output");
        let end = result?;
        finished?;

        let frames_written = sink.frames_written();
        info!(
            "Wrote {} frames in {:.1}s ({:?})",
            frames_written,
            started.elapsed().as_secs_f64(),
            end
        );

        Ok(RunSummary {
            frames_skipped,
            frames_written,
            calibrated_size: Some((calibration.width, calibration.height)),
            crop: Some(calibration.crop),
            end,
        })
    }

    fn calibrate(&mut self, first: &GrayImage) -> Result<Calibration> {
        let folder = self.config.folder.as_path();
        let params = &self.config.params;

        let (corners, picked) = match self.corner_store.load(folder)? {
            Some(corners) => {
                info!("Calibration points were selected previously; reusing them");
                (corners, false)
            }
            None => {
                info!("Select the calibration points to correct the perspective");
                (self.picker.pick(first)?, true)
            }
        };

        let transform = PerspectiveTransform::estimate(
            &corners,
            params.calib_box_width,
            params.calib_box_height,
            params.px_per_cm,
        )?;
        debug!("Homography: {:?}", transform.matrix());
        debug!("Max corner error: {:.2e} px", transform.max_corner_error());

        if picked {
            self.corner_store.save(folder, &corners)?;
        }

        let (width, height) = transform.output_size();
        let crop = CropWindow::compute(
            width,
            height,
            params.crop_width,
            params.crop_height,
            params.px_per_cm,
            params.anchor,
        )?;
        info!("Calibrated frame {}x{}, crop {}", width, height, crop);

        Ok(Calibration {
            transform,
            width,
            height,
            crop,
        })
    }

    fn process<S: FrameSink>(
        &mut self,
        source: &mut dyn FrameSource,
        calibration: &Calibration,
        first: GrayImage,
        sink: &mut S,
    ) -> Result<EndReason> {
        let params = &self.config.params;
        let source_fps = source.frame_rate();

        let mut gray = first;
        let mut frame_id = params.frame_start;
        loop {
            let rectified = rectify(
                &gray,
                &calibration.transform,
                calibration.width,
                calibration.height,
                self.config.background,
            );
            let mut out = calibration.crop.apply(&rectified);

            let info = FrameInfo {
                frame_id,
                frame_start: params.frame_start,
                source_fps,
                output_fps: params.output_fps,
            };
            self.annotator.annotate(&mut out, &info);

            sink.write(&out)
                .with_context(|| format!("Failed to write frame {}", frame_id))?;
            debug!("Frame {} written", frame_id);

            frame_id += 1;
            if frame_id >= params.frame_end {
                return Ok(EndReason::RangeComplete);
            }

            gray = match source.next_frame() {
                Ok(frame) => frame.to_luma8(),
                Err(DecodeEnd) => {
                    info!("Footage ended at frame {}", frame_id - 1);
                    return Ok(EndReason::EndOfStream);
                }
            };
        }
    }
}

/// Load the folder's saved parameters, or build and save them on first run
pub fn resolve_parameters(
    store: &dyn RecordStore<SessionParameters>,
    folder: &Path,
    defaults: &SessionParameters,
    overrides: &SessionOverrides,
) -> Result<SessionParameters> {
    if let Some(params) = store.load(folder)? {
        info!("Input parameters have been saved previously, so import them");
        if !overrides.is_empty() {
            warn!("Ignoring command-line parameters: this folder already has saved parameters (use --reset to replace them)");
        }
        return Ok(params);
    }

    info!("No saved input parameters; using defaults and command-line values");
    let mut params = defaults.clone();
    overrides.apply(&mut params);
    params.validate().context("Invalid session parameters")?;
    store.save(folder, &params)?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnchorPolicy, Point};
    use crate::error::{CalibrationError, CropError};
    use crate::store::tests::MemoryStore;
    use image::{DynamicImage, Luma, RgbImage, Rgb};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Frame `i` (1-based) is a uniform RGB frame of gray level `10 * i`
    struct FakeSource {
        frames: u32,
        decoded: Rc<Cell<u32>>,
        width: u32,
        height: u32,
    }

    impl FakeSource {
        fn new(frames: u32, width: u32, height: u32) -> Self {
            Self {
                frames,
                decoded: Rc::new(Cell::new(0)),
                width,
                height,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<DynamicImage, DecodeEnd> {
            let next = self.decoded.get() + 1;
            if next > self.frames {
                return Err(DecodeEnd);
            }
            self.decoded.set(next);
            let v = (next * 10) as u8;
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                self.width,
                self.height,
                Rgb([v, v, v]),
            )))
        }

        fn frame_rate(&self) -> f64 {
            240.0
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Rc<RefCell<Vec<GrayImage>>>,
        finished: Rc<Cell<bool>>,
        fail_at: Option<usize>,
    }

    impl FrameSink for RecordingSink {
        fn write(&mut self, frame: &GrayImage) -> Result<(), SinkError> {
            if Some(self.frames.borrow().len()) == self.fail_at {
                return Err(SinkError::Create {
                    path: PathBuf::from("disk-full"),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.frames.borrow_mut().push(frame.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            self.finished.set(true);
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            self.frames.borrow().len() as u64
        }
    }

    struct CountingPicker {
        corners: CalibrationPoints,
        calls: Rc<Cell<u32>>,
    }

    impl PointPicker for CountingPicker {
        fn pick(&mut self, _frame: &GrayImage) -> Result<CalibrationPoints> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.corners)
        }
    }

    struct RecordingAnnotator {
        seen: Rc<RefCell<Vec<FrameInfo>>>,
    }

    impl Annotator for RecordingAnnotator {
        fn annotate(&mut self, _frame: &mut GrayImage, info: &FrameInfo) {
            self.seen.borrow_mut().push(*info);
        }
    }

    /// Corners of an 8 x 6 px frame; at 1 px/cm the homography is the identity
    fn identity_corners() -> CalibrationPoints {
        CalibrationPoints::new([
            Point::new(0.0, 0.0),
            Point::new(8.0, 0.0),
            Point::new(8.0, 6.0),
            Point::new(0.0, 6.0),
        ])
    }

    fn params(frame_start: u32, frame_end: u32) -> SessionParameters {
        SessionParameters {
            calib_box_height: 6.0,
            calib_box_width: 8.0,
            crop_height: 3.0,
            crop_width: 4.0,
            axis_interval: 1.0,
            px_per_cm: 1.0,
            output_fps: 12.0,
            frame_start,
            frame_end,
            anchor: AnchorPolicy::BottomCenter {
                baseline_margin_cm: 0.0,
            },
        }
    }

    struct Harness {
        store: MemoryStore<CalibrationPoints>,
        picks: Rc<Cell<u32>>,
        seen: Rc<RefCell<Vec<FrameInfo>>>,
        sink: RecordingSink,
        sink_created: Rc<Cell<bool>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MemoryStore::default(),
                picks: Rc::new(Cell::new(0)),
                seen: Rc::new(RefCell::new(Vec::new())),
                sink: RecordingSink::default(),
                sink_created: Rc::new(Cell::new(false)),
            }
        }

        fn run(
            &self,
            params: SessionParameters,
            corners: CalibrationPoints,
            source: &mut FakeSource,
        ) -> Result<RunSummary> {
            let picker = CountingPicker {
                corners,
                calls: self.picks.clone(),
            };
            let annotator = RecordingAnnotator {
                seen: self.seen.clone(),
            };
            let config = PipelineConfig {
                folder: PathBuf::from("/lab/T1b"),
                params,
                background: 0,
            };
            let mut pipeline = Pipeline::new(config, &self.store, Box::new(picker), Box::new(annotator));

            let sink = self.sink.clone();
            let created = self.sink_created.clone();
            pipeline.run(source, move |_w, _h| {
                created.set(true);
                Ok(sink)
            })
        }
    }

    #[test]
    fn test_processes_configured_range() {
        let h = Harness::new();
        let mut source = FakeSource::new(5, 8, 6);

        let summary = h.run(params(2, 4), identity_corners(), &mut source).unwrap();

        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.frames_written, 2);
        assert_eq!(summary.end, EndReason::RangeComplete);
        assert_eq!(summary.calibrated_size, Some((8, 6)));
        assert_eq!(
            summary.crop,
            Some(CropWindow {
                x: 2,
                y: 3,
                width: 4,
                height: 3
            })
        );

        // Frame 1 discarded, frames 2 and 3 processed, frame 4 never decoded
        assert_eq!(source.decoded.get(), 3);
        let frames = h.sink.frames.borrow();
        assert_eq!(frames.len(), 2);
        for (frame, level) in frames.iter().zip([20u8, 30]) {
            assert_eq!(frame.dimensions(), (4, 3));
            assert!(frame.pixels().all(|p| *p == Luma([level])));
        }
        assert!(h.sink.finished.get());

        let ids: Vec<u32> = h.seen.borrow().iter().map(|i| i.frame_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(h.seen.borrow()[1].elapsed(), 1.0 / 240.0);

        // Picked once and saved for the next run
        assert_eq!(h.picks.get(), 1);
        assert_eq!(
            h.store.load(Path::new("/lab/T1b")).unwrap(),
            Some(identity_corners())
        );
    }

    #[test]
    fn test_saved_corners_skip_picker() {
        let h = Harness::new();
        h.store.save(Path::new("/lab/T1b"), &identity_corners()).unwrap();

        // The picker would hand back garbage if it were asked
        let bogus = CalibrationPoints::new([Point::new(0.0, 0.0); 4]);
        let mut source = FakeSource::new(5, 8, 6);
        let summary = h.run(params(1, 3), bogus, &mut source).unwrap();

        assert_eq!(h.picks.get(), 0);
        assert_eq!(summary.frames_skipped, 0);
        assert_eq!(summary.frames_written, 2);
    }

    #[test]
    fn test_source_ending_early_keeps_written_frames() {
        let h = Harness::new();
        let mut source = FakeSource::new(3, 8, 6);

        let summary = h.run(params(2, 10), identity_corners(), &mut source).unwrap();

        assert_eq!(summary.end, EndReason::EndOfStream);
        assert_eq!(summary.frames_written, 2);
        assert!(h.sink.finished.get());
    }

    #[test]
    fn test_source_ending_while_seeking() {
        let h = Harness::new();
        let mut source = FakeSource::new(3, 8, 6);

        let summary = h.run(params(5, 8), identity_corners(), &mut source).unwrap();

        assert_eq!(summary.end, EndReason::EndOfStream);
        assert_eq!(summary.frames_skipped, 3);
        assert_eq!(summary.frames_written, 0);
        assert_eq!(summary.crop, None);
        assert!(!h.sink_created.get());
        assert_eq!(h.picks.get(), 0);
    }

    #[test]
    fn test_degenerate_pick_aborts_before_output() {
        let h = Harness::new();
        let collinear = CalibrationPoints::new([
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(0.0, 10.0),
        ]);
        let mut source = FakeSource::new(5, 8, 6);

        let err = h.run(params(2, 4), collinear, &mut source).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CalibrationError>(),
            Some(CalibrationError::Degenerate(..))
        ));
        assert!(!h.sink_created.get());
        // A rejected pick is not saved
        assert!(h.store.load(Path::new("/lab/T1b")).unwrap().is_none());
    }

    #[test]
    fn test_oversized_crop_aborts_before_output() {
        let h = Harness::new();
        let mut p = params(2, 4);
        p.crop_width = 9.0;
        let mut source = FakeSource::new(5, 8, 6);

        let err = h.run(p, identity_corners(), &mut source).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CropError>(),
            Some(CropError::OutOfBounds { .. })
        ));
        assert!(!h.sink_created.get());
        assert!(h.sink.frames.borrow().is_empty());
    }

    #[test]
    fn test_sink_failure_still_finishes_output() {
        let mut h = Harness::new();
        h.sink.fail_at = Some(1);
        let mut source = FakeSource::new(5, 8, 6);

        assert!(h.run(params(1, 5), identity_corners(), &mut source).is_err());
        assert_eq!(h.sink.frames.borrow().len(), 1);
        assert!(h.sink.finished.get());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let h = Harness::new();
        let mut source = FakeSource::new(5, 8, 6);
        assert!(h.run(params(4, 4), identity_corners(), &mut source).is_err());
        assert_eq!(source.decoded.get(), 0);
    }

    #[test]
    fn test_resolve_parameters_first_run_saves() {
        let store = MemoryStore::<SessionParameters>::default();
        let folder = Path::new("/lab/T2");
        let overrides = SessionOverrides {
            frame_start: Some(20),
            frame_end: Some(50),
            ..Default::default()
        };

        let params =
            resolve_parameters(&store, folder, &SessionParameters::default(), &overrides).unwrap();
        assert_eq!(params.frame_start, 20);
        assert_eq!(params.frame_end, 50);
        assert_eq!(store.load(folder).unwrap(), Some(params));
    }

    #[test]
    fn test_resolve_parameters_saved_values_win() {
        let store = MemoryStore::<SessionParameters>::default();
        let folder = Path::new("/lab/T3");
        let saved = params(7, 9);
        store.save(folder, &saved).unwrap();

        let overrides = SessionOverrides {
            px_per_cm: Some(50.0),
            ..Default::default()
        };
        let params =
            resolve_parameters(&store, folder, &SessionParameters::default(), &overrides).unwrap();
        assert_eq!(params, saved);
    }

    #[test]
    fn test_resolve_parameters_rejects_invalid_first_run() {
        let store = MemoryStore::<SessionParameters>::default();
        let folder = Path::new("/lab/T4");
        let overrides = SessionOverrides {
            crop_height: Some(-1.0),
            ..Default::default()
        };
        assert!(resolve_parameters(&store, folder, &SessionParameters::default(), &overrides).is_err());
        assert!(store.load(folder).unwrap().is_none());
    }
}
