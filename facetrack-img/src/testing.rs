use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use image::{Rgba, RgbaImage};

use crate::error::GeometryError;
use crate::pipeline::{FaceDetector, LandmarkModel};
use crate::shapes::{LandmarkSet, PointF32, Rect};

pub fn frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([40, 40, 40, 255]))
}

pub fn mean_shape() -> LandmarkSet {
    LandmarkSet::from_points([
        PointF32::new(0.25, 0.375),
        PointF32::new(0.75, 0.375),
        PointF32::new(0.5, 0.5),
        PointF32::new(0.375, 0.75),
        PointF32::new(0.625, 0.75),
    ])
}

/// Mean shape laid into a face box, what the scripted model's cold start returns.
pub fn face_at(face: &Rect) -> LandmarkSet {
    let mean = mean_shape();
    mean.with_points(
        mean.points()
            .map(|p| PointF32::new(face.x + p.x * face.w, face.y + p.y * face.h)),
    )
}

/// Replays one list of boxes per call, then reports no faces.
#[derive(Clone)]
pub struct ScriptedDetector {
    script: Arc<Mutex<VecDeque<Vec<Rect>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Rect>>) -> ScriptedDetector {
        ScriptedDetector {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbaImage) -> Result<Vec<Rect>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Records every seed it is handed. Warm starts drift the seed by (2, 1).
#[derive(Clone)]
pub struct ScriptedModel {
    mean: LandmarkSet,
    cold: Arc<Mutex<Vec<Rect>>>,
    warm: Arc<Mutex<Vec<LandmarkSet>>>,
    cold_empty: bool,
    warm_empty: bool,
    failure: Option<GeometryError>,
}

impl ScriptedModel {
    pub fn new() -> ScriptedModel {
        ScriptedModel::with_mean(mean_shape())
    }

    pub fn with_mean(mean: LandmarkSet) -> ScriptedModel {
        ScriptedModel {
            mean,
            cold: Arc::default(),
            warm: Arc::default(),
            cold_empty: false,
            warm_empty: false,
            failure: None,
        }
    }

    pub fn returning_empty(mut self) -> ScriptedModel {
        self.cold_empty = true;
        self
    }

    pub fn warm_returning_empty(mut self) -> ScriptedModel {
        self.warm_empty = true;
        self
    }

    /// Both starts fail with `err`.
    pub fn failing_with(mut self, err: GeometryError) -> ScriptedModel {
        self.failure = Some(err);
        self
    }

    pub fn cold_calls(&self) -> Vec<Rect> {
        self.cold.lock().unwrap().clone()
    }

    pub fn warm_calls(&self) -> Vec<LandmarkSet> {
        self.warm.lock().unwrap().clone()
    }
}

impl LandmarkModel for ScriptedModel {
    fn mean_shape(&self) -> &LandmarkSet {
        &self.mean
    }

    fn detect(&self, _frame: &RgbaImage, face: &Rect) -> Result<LandmarkSet> {
        self.cold.lock().unwrap().push(*face);
        if let Some(err) = &self.failure {
            return Err(err.clone().into());
        }
        if self.cold_empty {
            return Ok(LandmarkSet::default());
        }
        Ok(face_at(face))
    }

    fn detect_from(&self, _frame: &RgbaImage, initial: &LandmarkSet) -> Result<LandmarkSet> {
        self.warm.lock().unwrap().push(initial.clone());
        if let Some(err) = &self.failure {
            return Err(err.clone().into());
        }
        if self.warm_empty {
            return Ok(LandmarkSet::default());
        }
        Ok(initial.with_points(initial.points().map(|p| PointF32::new(p.x + 2., p.y + 1.))))
    }
}
