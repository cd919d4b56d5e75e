use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbaImage;
use tracing::{Level, debug, info, span, trace};

use crate::config::PipelineConfig;
use crate::shapes::scale_factor;
use crate::tracker::{TrackState, TrackUpdate, Tracker};
pub use detection::{BlazeFaceDetector, FaceDetector};
pub use landmarks::{CascadeModel, LandmarkModel};

pub mod detection;
pub mod landmarks;
mod model;
pub mod overlay;

pub struct Pipeline {
    face_detector: Box<dyn FaceDetector>,
    landmark_model: Box<dyn LandmarkModel>,
    tracker: Tracker,
}

/// Wall time spent in each stage of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimings {
    pub detection: Option<Duration>,
    pub landmarks: Option<Duration>,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Copy of the input with the detection box and landmarks drawn on
    pub overlay: RgbaImage,
    pub state: TrackState,
    pub update: TrackUpdate,
    pub timings: FrameTimings,
}

impl Pipeline {
    pub fn new(
        face_detector: impl FaceDetector + 'static,
        landmark_model: impl LandmarkModel + 'static,
        tracker: Tracker,
    ) -> Result<Pipeline> {
        // Every warm start divides by the mean shape's box, a flat one is a
        // broken model
        let mean = landmark_model.mean_shape();
        scale_factor(mean, mean)?;

        Ok(Pipeline {
            face_detector: Box::new(face_detector),
            landmark_model: Box::new(landmark_model),
            tracker,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Pipeline> {
        let face_detector =
            BlazeFaceDetector::new(&config.detector_model, config.threads, config.detector)?;
        let landmark_model = CascadeModel::load(&config.landmark_model)?;
        info!(
            "Loaded landmark model with {} landmarks, {} cascade stages",
            landmark_model.mean_shape().len(),
            landmark_model.num_stages()
        );

        Pipeline::new(
            face_detector,
            landmark_model,
            Tracker::from_config(&config.tracking),
        )
    }

    /// Runs detection or tracking on one frame, depending on `state`, and
    /// renders the result onto a copy of the frame.
    ///
    /// An empty frame marks the end of the stream: `None` comes back and
    /// neither detector nor landmark model is touched.
    pub fn process_frame(
        &mut self,
        frame: &RgbaImage,
        state: TrackState,
    ) -> Result<Option<ProcessedFrame>> {
        let span = span!(Level::DEBUG, "process_frame");
        let _guard = span.enter();

        if frame.width() == 0 || frame.height() == 0 {
            debug!("Empty frame, end of stream");
            return Ok(None);
        }

        let start = Instant::now();
        let mut timings = FrameTimings::default();
        let (update, state) = self.tracker.step(
            self.face_detector.as_mut(),
            self.landmark_model.as_ref(),
            frame,
            state,
            &mut timings,
        )?;

        let mut overlay = frame.clone();
        if let Some(face) = update.face() {
            overlay::draw_detection(&mut overlay, face);
        }
        if let Some(landmarks) = update.landmarks() {
            overlay::draw_landmarks(&mut overlay, landmarks);
        }
        timings.total = start.elapsed();

        debug!(
            "FD: {:?}\tLM: {:?}\ttotal: {:?}",
            timings.detection, timings.landmarks, timings.total
        );
        trace!("Track phase {:?}", state.phase());

        Ok(Some(ProcessedFrame {
            overlay,
            state,
            update,
            timings,
        }))
    }
}
