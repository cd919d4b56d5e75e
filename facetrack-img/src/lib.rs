//! Facial landmark tracking for video streams.
//!
//! Every frame either runs the face detector and a cold-start landmark
//! regression, or re-seeds the regression from the previous frame's
//! landmarks. [`tracker`] holds that decision, [`shapes`] the bounding box
//! bookkeeping behind the warm start, and [`pipeline`] / [`stream`] sequence
//! detection, regression, overlay and display.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod shapes;
pub mod stream;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DetectorConfig, PipelineConfig, TrackingConfig};
pub use error::GeometryError;
pub use pipeline::{FaceDetector, FrameTimings, LandmarkModel, Pipeline, ProcessedFrame};
pub use shapes::{Landmark, LandmarkSet, PointF32, Rect};
pub use stream::{FrameSink, FrameSource, RunOptions, RunSummary, StopSignal, ThreadedSource};
pub use tracker::{Phase, TrackLossPolicy, TrackState, TrackUpdate, Tracker, TrackingMode};
