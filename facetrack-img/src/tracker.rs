use std::time::Instant;

use anyhow::Result;
use image::RgbaImage;
use tracing::{Level, debug, span, trace};

use crate::config::TrackingConfig;
use crate::pipeline::{FaceDetector, FrameTimings, LandmarkModel};
use crate::shapes::{LandmarkSet, Rect, align_mean};
pub use policy::{TrackContext, TrackLossPolicy};

pub mod policy;

/// What a successful cold start leads to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackingMode {
    /// Enter tracking and warm-start from the previous landmarks until the
    /// track-loss policy fires.
    #[default]
    Continuous,
    /// Run the face detector on every frame. Landmarks are still recorded
    /// but never used to seed the next frame.
    DetectEveryFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoTrack,
    Tracking,
}

/// Tracking state carried from one frame to the next.
///
/// While tracking, `last_landmarks` is always a non-empty result from the
/// frame before. Outside of tracking it may hold stale landmarks, which are
/// never used to seed a regression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackState {
    tracking: bool,
    last_landmarks: Option<LandmarkSet>,
    frames_tracked: u32,
}

impl TrackState {
    pub fn new() -> TrackState {
        TrackState::default()
    }

    pub fn phase(&self) -> Phase {
        if self.tracking {
            Phase::Tracking
        } else {
            Phase::NoTrack
        }
    }

    pub fn last_landmarks(&self) -> Option<&LandmarkSet> {
        self.last_landmarks.as_ref()
    }

    /// Warm-start frames since the last cold start.
    pub fn frames_tracked(&self) -> u32 {
        self.frames_tracked
    }

    fn anchored(landmarks: LandmarkSet, mode: TrackingMode) -> TrackState {
        if landmarks.is_empty() {
            return TrackState::default();
        }

        TrackState {
            tracking: mode == TrackingMode::Continuous,
            last_landmarks: Some(landmarks),
            frames_tracked: 0,
        }
    }

    fn tracked(landmarks: LandmarkSet, frames_tracked: u32) -> TrackState {
        debug_assert!(!landmarks.is_empty());
        TrackState {
            tracking: true,
            last_landmarks: Some(landmarks),
            frames_tracked,
        }
    }

    fn into_track(self) -> Option<(LandmarkSet, u32)> {
        match (self.tracking, self.last_landmarks) {
            (true, Some(landmarks)) if !landmarks.is_empty() => {
                Some((landmarks, self.frames_tracked))
            }
            _ => None,
        }
    }
}

/// Outcome of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackUpdate {
    /// Detector found nothing, nothing to draw.
    NoFace,
    /// Cold start from the first detected face.
    Detected { face: Rect, landmarks: LandmarkSet },
    /// Warm start from the previous frame's landmarks.
    Tracked { landmarks: LandmarkSet },
    /// Warm start result rejected by the track-loss policy.
    Lost { landmarks: LandmarkSet },
}

impl TrackUpdate {
    /// Landmarks worth drawing, if any.
    pub fn landmarks(&self) -> Option<&LandmarkSet> {
        match self {
            TrackUpdate::Detected { landmarks, .. } | TrackUpdate::Tracked { landmarks } => {
                Some(landmarks)
            }
            TrackUpdate::NoFace | TrackUpdate::Lost { .. } => None,
        }
    }

    pub fn face(&self) -> Option<&Rect> {
        match self {
            TrackUpdate::Detected { face, .. } => Some(face),
            _ => None,
        }
    }
}

pub struct Tracker {
    mode: TrackingMode,
    policy: Box<dyn TrackLossPolicy>,
}

impl Tracker {
    pub fn new(mode: TrackingMode, policy: Box<dyn TrackLossPolicy>) -> Tracker {
        Tracker { mode, policy }
    }

    pub fn from_config(config: &TrackingConfig) -> Tracker {
        Tracker::new(config.mode, config.policy())
    }

    /// Advance the state machine by one frame: detect when there is no
    /// track, warm-start the regression when there is.
    pub fn step(
        &self,
        detector: &mut dyn FaceDetector,
        model: &dyn LandmarkModel,
        frame: &RgbaImage,
        state: TrackState,
        timings: &mut FrameTimings,
    ) -> Result<(TrackUpdate, TrackState)> {
        match state.into_track() {
            Some((last, frames_tracked)) => self.track(model, frame, last, frames_tracked, timings),
            None => self.detect(detector, model, frame, timings),
        }
    }

    fn detect(
        &self,
        detector: &mut dyn FaceDetector,
        model: &dyn LandmarkModel,
        frame: &RgbaImage,
        timings: &mut FrameTimings,
    ) -> Result<(TrackUpdate, TrackState)> {
        let start = Instant::now();
        let faces = detector.detect(frame)?;
        timings.detection = Some(start.elapsed());

        // First candidate, in whatever order the detector ranks them
        let Some(face) = faces.first().copied() else {
            trace!("No faces found");
            return Ok((TrackUpdate::NoFace, TrackState::default()));
        };
        trace!("Face bound: {face:?}");

        let start = Instant::now();
        let landmarks = model.detect(frame, &face)?;
        timings.landmarks = Some(start.elapsed());

        let state = TrackState::anchored(landmarks.clone(), self.mode);
        debug!("Cold start with {} landmarks", landmarks.len());
        Ok((TrackUpdate::Detected { face, landmarks }, state))
    }

    fn track(
        &self,
        model: &dyn LandmarkModel,
        frame: &RgbaImage,
        last: LandmarkSet,
        frames_tracked: u32,
        timings: &mut FrameTimings,
    ) -> Result<(TrackUpdate, TrackState)> {
        let span = span!(Level::DEBUG, "warm_start");
        let _guard = span.enter();

        let initial = align_mean(model.mean_shape(), &last)?;

        let start = Instant::now();
        let landmarks = model.detect_from(frame, &initial)?;
        timings.landmarks = Some(start.elapsed());

        if landmarks.is_empty() {
            debug!("Track lost: empty regression result");
            return Ok((TrackUpdate::Lost { landmarks }, TrackState::default()));
        }

        let frames_tracked = frames_tracked + 1;
        let ctx = TrackContext {
            previous: &last,
            current: &landmarks,
            frame_width: frame.width(),
            frame_height: frame.height(),
            frames_tracked,
        };
        if self.policy.is_lost(&ctx) {
            debug!("Track lost after {frames_tracked} frames");
            return Ok((TrackUpdate::Lost { landmarks }, TrackState::default()));
        }

        let state = TrackState::tracked(landmarks.clone(), frames_tracked);
        Ok((TrackUpdate::Tracked { landmarks }, state))
    }
}
