use std::path::PathBuf;

use crate::tracker::TrackingMode;
use crate::tracker::policy::{
    AnyOf, MinFaceSize, OutOfFrame, ReanchorEvery, ScaleJump, TrackLossPolicy,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// BlazeFace short range ONNX model
    pub detector_model: PathBuf,
    /// Cascaded regression landmark model (bincode)
    pub landmark_model: PathBuf,
    /// Inference threads for the detector session
    pub threads: usize,
    pub detector: DetectorConfig,
    pub tracking: TrackingConfig,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            detector_model: PathBuf::from("models/mediapipe_face_detection_short_range.onnx"),
            landmark_model: PathBuf::from("data/rcr/face_landmarks_model.bin"),
            threads: 4,
            detector: DetectorConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Candidates scoring below this are dropped
    pub min_confidence: f32,
    /// Overlap (IoU %) above which the less confident of two boxes is dropped
    pub max_overlap_pct: f32,
    /// Smallest face side in pixels
    pub min_face_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> DetectorConfig {
        DetectorConfig {
            min_confidence: 0.5,
            max_overlap_pct: 30.,
            min_face_size: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingConfig {
    pub mode: TrackingMode,
    /// Track is dropped once the landmark box gets narrower or shorter than this
    pub min_face_size: f32,
    /// Fraction of the landmark box that has to stay inside the frame
    pub min_visible_fraction: f32,
    /// Largest allowed frame-to-frame change of the landmark box area
    pub max_scale_change: f32,
    /// Force a fresh detection after this many tracked frames
    pub reanchor_frames: Option<u32>,
}

impl Default for TrackingConfig {
    fn default() -> TrackingConfig {
        TrackingConfig {
            mode: TrackingMode::Continuous,
            min_face_size: 20.,
            min_visible_fraction: 0.5,
            max_scale_change: 1.5,
            reanchor_frames: None,
        }
    }
}

impl TrackingConfig {
    pub fn policy(&self) -> Box<dyn TrackLossPolicy> {
        let mut policies: Vec<Box<dyn TrackLossPolicy>> = vec![
            Box::new(MinFaceSize(self.min_face_size)),
            Box::new(OutOfFrame(self.min_visible_fraction)),
            Box::new(ScaleJump(self.max_scale_change)),
        ];
        if let Some(frames) = self.reanchor_frames {
            policies.push(Box::new(ReanchorEvery(frames)));
        }

        Box::new(AnyOf(policies))
    }
}
