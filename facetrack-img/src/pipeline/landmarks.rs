use std::fs;
use std::path::Path;

use anyhow::{Context, Error, Result};
use image::{RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::{Level, span, trace};

use crate::shapes::{LandmarkSet, PointF32, Rect, scale_factor};
pub use tree::{RegressionTree, SplitFeature, TreeEnsemble, TreeNode};

pub mod tree;

/// Landmark regression, seeded either from a face box or from a previous
/// frame's landmarks.
pub trait LandmarkModel {
    /// Canonical shape in normalized [0, 1] face box coordinates. Every
    /// returned set uses its ids and ordering.
    fn mean_shape(&self) -> &LandmarkSet;

    /// Cold start: the mean shape laid into `face`, then refined.
    fn detect(&self, frame: &RgbaImage, face: &Rect) -> Result<LandmarkSet>;

    /// Warm start: refine `initial`, which is already in frame pixels.
    fn detect_from(&self, frame: &RgbaImage, initial: &LandmarkSet) -> Result<LandmarkSet>;
}

/// Cascade of regression tree ensembles over pixel difference features.
/// Each stage nudges the shape by the summed leaf deltas of its trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeModel {
    mean_shape: LandmarkSet,
    cascade: Vec<TreeEnsemble>,
}

impl CascadeModel {
    pub fn new(mean_shape: LandmarkSet, cascade: Vec<TreeEnsemble>) -> Result<CascadeModel> {
        let model = CascadeModel {
            mean_shape,
            cascade,
        };
        model.validate()?;
        Ok(model)
    }

    /// Reads a bincode encoded model file.
    pub fn load(path: &Path) -> Result<CascadeModel> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read landmark model {}", path.display()))?;
        Self::from_bytes(&bytes)
            .with_context(|| format!("Invalid landmark model {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<CascadeModel> {
        let model: CascadeModel = bincode::deserialize(bytes)?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn num_stages(&self) -> usize {
        self.cascade.len()
    }

    fn validate(&self) -> Result<()> {
        if self.mean_shape.is_empty() {
            return Err(Error::msg("Landmark model has an empty mean shape"));
        }
        scale_factor(&self.mean_shape, &self.mean_shape)?;

        let num_landmarks = self.mean_shape.len();
        for (stage, ensemble) in self.cascade.iter().enumerate() {
            for tree in &ensemble.trees {
                tree.validate(num_landmarks)
                    .with_context(|| format!("Cascade stage {stage}"))?;
            }
        }

        Ok(())
    }

    fn regress(&self, frame: &RgbaImage, mut shape: Vec<PointF32>, face: &Rect) -> LandmarkSet {
        let span = span!(Level::DEBUG, "face_landmarker");
        let _guard = span.enter();

        let gray = imageops::grayscale(frame);
        let num_landmarks = shape.len();
        for ensemble in &self.cascade {
            let delta = ensemble.predict(num_landmarks, |feature| {
                tree::feature_value(feature, &shape, face, &gray)
            });
            for (p, d) in shape.iter_mut().zip(delta) {
                p.x += d.x * face.w;
                p.y += d.y * face.h;
            }
        }
        trace!("Regressed {} landmarks in {:?}", num_landmarks, face);

        self.mean_shape.with_points(shape)
    }
}

impl LandmarkModel for CascadeModel {
    fn mean_shape(&self) -> &LandmarkSet {
        &self.mean_shape
    }

    fn detect(&self, frame: &RgbaImage, face: &Rect) -> Result<LandmarkSet> {
        let initial = self
            .mean_shape
            .points()
            .map(|p| PointF32::new(face.x + p.x * face.w, face.y + p.y * face.h))
            .collect();
        Ok(self.regress(frame, initial, face))
    }

    fn detect_from(&self, frame: &RgbaImage, initial: &LandmarkSet) -> Result<LandmarkSet> {
        if initial.len() != self.mean_shape.len() {
            return Err(Error::msg(format!(
                "Initial shape has {} landmarks, model has {}",
                initial.len(),
                self.mean_shape.len()
            )));
        }

        // The face box the mean shape would have to sit in to produce `initial`
        let (sx, sy) = scale_factor(initial, &self.mean_shape)?;
        let initial_box = initial.enclosing_bbox()?;
        let mean_box = self.mean_shape.enclosing_bbox()?;
        let face = Rect::new(
            initial_box.x - mean_box.x * sx,
            initial_box.y - mean_box.y * sy,
            sx,
            sy,
        );

        Ok(self.regress(frame, initial.points().collect(), &face))
    }
}
