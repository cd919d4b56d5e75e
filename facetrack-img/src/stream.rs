use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbaImage;
use tracing::{Level, debug, error, info, span, trace, warn};

use crate::error::GeometryError;
use crate::pipeline::Pipeline;
use crate::tracker::{TrackState, TrackUpdate};

/// Pull side of the frame loop. `None` once there is nothing left to read.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>>;
}

pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        (**self).next_frame()
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        (**self).write_frame(frame)
    }
}

/// Shared quit flag, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Warn about frames taking longer than this to process
    pub max_frame_lag: Option<Duration>,
}

/// Frame counts by outcome over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: usize,
    pub detections: usize,
    pub tracked: usize,
    pub lost: usize,
    pub empty: usize,
}

impl RunSummary {
    fn record(&mut self, update: &TrackUpdate) {
        self.frames += 1;
        match update {
            TrackUpdate::NoFace => self.empty += 1,
            TrackUpdate::Detected { .. } => self.detections += 1,
            TrackUpdate::Tracked { .. } => self.tracked += 1,
            TrackUpdate::Lost { .. } => self.lost += 1,
        }
    }
}

/// Feeds frames from `source` through `pipeline` into `sink` until the
/// source runs dry, hands over an empty frame, or `stop` is raised.
///
/// A frame the detector or landmark model fails on is logged and passed to
/// the sink as is, and tracking starts over from detection on the next one.
/// A [`GeometryError`] ends the run.
pub fn run(
    pipeline: &mut Pipeline,
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    stop: &StopSignal,
    options: &RunOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let mut state = TrackState::new();

    while !stop.is_stopped() {
        let span = span!(Level::INFO, "frame_loop_iter");
        let _guard = span.enter();

        let get_frame_span = span!(Level::DEBUG, "get_frame");
        let get_frame_guard = get_frame_span.enter();
        let frame = match source.next_frame()? {
            Some(frame) => frame,
            None => {
                info!("Frame source exhausted");
                break;
            }
        };
        drop(get_frame_guard);

        let processed = match pipeline.process_frame(&frame, state) {
            Ok(Some(processed)) => Some(processed),
            Ok(None) => break,
            // Broken geometry invariant, retrying would hit it again
            Err(e) if e.downcast_ref::<GeometryError>().is_some() => return Err(e),
            Err(e) => {
                error!("Failed to process frame: {e:?}");
                None
            }
        };

        let output = match processed {
            Some(processed) => {
                if let Some(max_lag) = options.max_frame_lag {
                    if processed.timings.total > max_lag {
                        warn!(
                            "Frame took {:?}, over the allowed {:?}",
                            processed.timings.total, max_lag
                        );
                    }
                }
                summary.record(&processed.update);
                state = processed.state;
                processed.overlay
            }
            None => {
                state = TrackState::new();
                frame
            }
        };

        let write_frame_span = span!(Level::DEBUG, "write_frame");
        let write_frame_guard = write_frame_span.enter();
        match sink.write_frame(&output) {
            Ok(_) => trace!("Rendered frame."),
            Err(e) => error!("Failed to render frame: {e:?}"),
        }
        drop(write_frame_guard);
    }

    debug!("Frame loop finished: {:?}", summary);
    Ok(summary)
}

/// Pulls frames from another source on a dedicated capture thread, so
/// capture and processing overlap. At most `capacity` frames wait in
/// between, after that capture blocks.
///
/// The wrapped source is opened on the capture thread, so it does not need
/// to be `Send`. Frames come out in capture order.
pub struct ThreadedSource {
    frames: flume::Receiver<Result<RgbaImage>>,
}

impl ThreadedSource {
    pub fn spawn<S, F>(open: F, capacity: usize) -> Result<ThreadedSource>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (tx, rx) = flume::bounded(capacity.max(1));

        thread::Builder::new()
            .name("frame_capture".into())
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                loop {
                    match source.next_frame() {
                        Ok(Some(frame)) => {
                            // Receiver gone, nobody is reading anymore
                            if tx.send(Ok(frame)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
                debug!("Capture thread done");
            })
            .context("Failed to start capture thread")?;

        Ok(ThreadedSource { frames: rx })
    }
}

impl FrameSource for ThreadedSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        match self.frames.recv() {
            Ok(frame) => frame.map(Some),
            // capture thread finished and everything it sent was read
            Err(flume::RecvError::Disconnected) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FaceDetector;
    use crate::shapes::Rect;
    use crate::testing::{ScriptedDetector, ScriptedModel, frame};
    use crate::tracker::{Tracker, TrackingMode, policy::from_fn};
    use anyhow::Error;
    use image::Rgba;
    use std::collections::VecDeque;

    struct VecSource(VecDeque<RgbaImage>);

    impl VecSource {
        fn new(frames: Vec<RgbaImage>) -> VecSource {
            VecSource(frames.into())
        }
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            Ok(self.0.pop_front())
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
            Err(Error::msg("camera unplugged"))
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&mut self, _frame: &RgbaImage) -> Result<Vec<Rect>> {
            Err(Error::msg("inference failed"))
        }
    }

    /// Keeps everything, raises `stop` after `stop_after` frames if set.
    #[derive(Default)]
    struct CollectSink {
        frames: Vec<RgbaImage>,
        stop: StopSignal,
        stop_after: Option<usize>,
    }

    impl FrameSink for CollectSink {
        fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
            self.frames.push(frame.clone());
            if Some(self.frames.len()) == self.stop_after {
                self.stop.stop();
            }
            Ok(())
        }
    }

    fn pipeline(detector: &ScriptedDetector, model: &ScriptedModel) -> Pipeline {
        Pipeline::new(
            detector.clone(),
            model.clone(),
            Tracker::new(TrackingMode::Continuous, Box::new(from_fn(|_| false))),
        )
        .unwrap()
    }

    fn numbered(n: u8) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba([n, 0, 0, 255]))
    }

    #[test]
    fn test_empty_frame_ends_run() {
        let detector = ScriptedDetector::new(vec![vec![Rect::new(10., 10., 50., 50.)]]);
        let model = ScriptedModel::new();
        let mut source = VecSource::new(vec![RgbaImage::new(0, 0), frame(160, 120)]);
        let mut sink = CollectSink::default();

        let summary = run(
            &mut pipeline(&detector, &model),
            &mut source,
            &mut sink,
            &StopSignal::new(),
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(detector.calls(), 0);
        assert!(model.cold_calls().is_empty());
        assert!(model.warm_calls().is_empty());
        assert!(sink.frames.is_empty());
        // the frame after the empty one is never pulled
        assert_eq!(source.0.len(), 1);
    }

    #[test]
    fn test_runs_until_source_exhausted() {
        let face = Rect::new(100., 50., 80., 80.);
        let detector = ScriptedDetector::new(vec![vec![], vec![face]]);
        let model = ScriptedModel::new();
        let mut source = VecSource::new(vec![frame(320, 240); 4]);
        let mut sink = CollectSink::default();

        let summary = run(
            &mut pipeline(&detector, &model),
            &mut source,
            &mut sink,
            &StopSignal::new(),
            &RunOptions {
                max_frame_lag: Some(Duration::from_secs(5)),
            },
        )
        .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                frames: 4,
                detections: 1,
                tracked: 2,
                lost: 0,
                empty: 1,
            }
        );
        assert_eq!(detector.calls(), 2);
        assert_eq!(model.warm_calls().len(), 2);
        assert_eq!(sink.frames.len(), 4);
    }

    #[test]
    fn test_stop_signal() {
        let detector = ScriptedDetector::new(vec![]);
        let model = ScriptedModel::new();
        let stop = StopSignal::new();
        let mut sink = CollectSink {
            stop: stop.clone(),
            stop_after: Some(2),
            ..Default::default()
        };

        let summary = run(
            &mut pipeline(&detector, &model),
            &mut VecSource::new(vec![frame(64, 64); 5]),
            &mut sink,
            &stop,
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.frames, 2);
        assert!(stop.is_stopped());

        // already raised, nothing runs
        let summary = run(
            &mut pipeline(&detector, &model),
            &mut VecSource::new(vec![frame(64, 64)]),
            &mut CollectSink::default(),
            &stop,
            &RunOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn test_geometry_error_ends_run() {
        let face = Rect::new(100., 50., 80., 80.);
        let detector = ScriptedDetector::new(vec![vec![face]; 5]);
        let model = ScriptedModel::new().failing_with(GeometryError::InvalidInput);
        let mut sink = CollectSink::default();

        let result = run(
            &mut pipeline(&detector, &model),
            &mut VecSource::new(vec![frame(320, 240); 5]),
            &mut sink,
            &StopSignal::new(),
            &RunOptions::default(),
        );

        let err = result.err().unwrap();
        assert_eq!(
            err.downcast_ref::<GeometryError>(),
            Some(&GeometryError::InvalidInput)
        );
        assert_eq!(detector.calls(), 1);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_detector_error_passes_frame_through() {
        let frames: Vec<RgbaImage> = (0..3).map(numbered).collect();
        let mut sink = CollectSink::default();
        let mut pipeline = Pipeline::new(
            FailingDetector,
            ScriptedModel::new(),
            Tracker::new(TrackingMode::Continuous, Box::new(from_fn(|_| false))),
        )
        .unwrap();

        let summary = run(
            &mut pipeline,
            &mut VecSource::new(frames.clone()),
            &mut sink,
            &StopSignal::new(),
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(sink.frames, frames);
    }

    #[test]
    fn test_source_error_ends_run() {
        let detector = ScriptedDetector::new(vec![]);
        let model = ScriptedModel::new();

        let result = run(
            &mut pipeline(&detector, &model),
            &mut FailingSource,
            &mut CollectSink::default(),
            &StopSignal::new(),
            &RunOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_threaded_source_keeps_order() {
        let frames: Vec<RgbaImage> = (0..6).map(numbered).collect();
        let expected = frames.clone();
        let mut source = ThreadedSource::spawn(move || Ok(VecSource::new(frames)), 2).unwrap();

        let mut received = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            received.push(frame);
        }
        assert_eq!(received, expected);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_threaded_source_forwards_errors() {
        let mut source = ThreadedSource::spawn(|| Ok(FailingSource), 1).unwrap();
        assert!(source.next_frame().is_err());

        let mut source =
            ThreadedSource::spawn(|| Err::<VecSource, _>(Error::msg("no camera")), 1).unwrap();
        assert!(source.next_frame().is_err());
        assert!(source.next_frame().unwrap().is_none());
    }
}
