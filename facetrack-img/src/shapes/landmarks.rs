use serde::{Deserialize, Serialize};

use super::point::PointF32;
use super::rect::Rect;
use crate::error::GeometryError;

/// One facial landmark. `id` is fixed by the model and stable across frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: u16,
    pub point: PointF32,
}

impl Landmark {
    pub const fn new(id: u16, x: f32, y: f32) -> Landmark {
        Landmark {
            id,
            point: PointF32::new(x, y),
        }
    }
}

/// Landmarks in the model's canonical order. The order matters: warm starts
/// pair each point with the mean shape point at the same index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    landmarks: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(landmarks: Vec<Landmark>) -> LandmarkSet {
        LandmarkSet { landmarks }
    }

    /// Number points sequentially, ids following their position.
    pub fn from_points(points: impl IntoIterator<Item = PointF32>) -> LandmarkSet {
        let landmarks = points
            .into_iter()
            .enumerate()
            .map(|(i, point)| Landmark {
                id: i as u16,
                point,
            })
            .collect();
        LandmarkSet { landmarks }
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.landmarks.iter()
    }

    pub fn points(&self) -> impl Iterator<Item = PointF32> + '_ {
        self.landmarks.iter().map(|l| l.point)
    }

    pub fn enclosing_bbox(&self) -> Result<Rect, GeometryError> {
        enclosing_bbox(self)
    }

    /// Same ids, new positions. `points` must yield one point per landmark.
    pub fn with_points(&self, points: impl IntoIterator<Item = PointF32>) -> LandmarkSet {
        let landmarks = self
            .landmarks
            .iter()
            .zip(points)
            .map(|(l, point)| Landmark { id: l.id, point })
            .collect();
        LandmarkSet { landmarks }
    }
}

impl std::ops::Index<usize> for LandmarkSet {
    type Output = Landmark;

    fn index(&self, idx: usize) -> &Landmark {
        &self.landmarks[idx]
    }
}

impl<'a> IntoIterator for &'a LandmarkSet {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;

    fn into_iter(self) -> Self::IntoIter {
        self.landmarks.iter()
    }
}

/// Tightest axis-aligned box around every landmark.
pub fn enclosing_bbox(landmarks: &LandmarkSet) -> Result<Rect, GeometryError> {
    let first = match landmarks.landmarks.first() {
        Some(l) => l.point,
        None => return Err(GeometryError::InvalidInput),
    };

    let (min, max) = landmarks
        .points()
        .fold((first, first), |(min, max), p| {
            (
                PointF32::new(min.x.min(p.x), min.y.min(p.y)),
                PointF32::new(max.x.max(p.x), max.y.max(p.y)),
            )
        });

    Ok(Rect::new(min.x, min.y, max.x - min.x, max.y - min.y))
}

/// Per-axis ratio of the subject's box size to the reference's.
pub fn scale_factor(
    subject: &LandmarkSet,
    reference: &LandmarkSet,
) -> Result<(f32, f32), GeometryError> {
    let subject_box = enclosing_bbox(subject)?;
    let reference_box = enclosing_bbox(reference)?;

    if reference_box.w <= 0. || reference_box.h <= 0. {
        return Err(GeometryError::DegenerateGeometry {
            width: reference_box.w,
            height: reference_box.h,
        });
    }

    Ok((
        subject_box.w / reference_box.w,
        subject_box.h / reference_box.h,
    ))
}

/// Warm start shape: `mean` stretched onto the box of `target` and moved so
/// both boxes share an origin.
pub fn align_mean(mean: &LandmarkSet, target: &LandmarkSet) -> Result<LandmarkSet, GeometryError> {
    let target_box = enclosing_bbox(target)?;
    let mean_box = enclosing_bbox(mean)?;
    let (scale_x, scale_y) = scale_factor(target, mean)?;

    let origin = mean_box.origin();
    Ok(mean.with_points(mean.points().map(|p| {
        let offset = p - origin;
        PointF32::new(
            target_box.x + offset.x * scale_x,
            target_box.y + offset.y * scale_y,
        )
    })))
}
