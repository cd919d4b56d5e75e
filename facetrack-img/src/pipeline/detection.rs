use std::path::Path;

use anyhow::{Error, Result};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use tracing::{Level, span, trace};

use super::model::{Session, initialize_model};
use crate::config::DetectorConfig;
use crate::shapes::{PointF32, Rect};
use anchors::gen_anchors;

mod anchors;

const WIDTH: u32 = 128;
const HEIGHT: u32 = 128;

// box center, box size, then 6 keypoints
const REGRESSOR_LEN: usize = 16;
const SCORE_CLIP: f32 = 100.;

/// Finds candidate faces in a frame.
pub trait FaceDetector {
    /// Face boxes in frame pixels, best first. No faces is an ordinary
    /// result, not an error.
    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Rect>>;
}

/// BlazeFace short range model wrapper. ort runs the model, decoding the
/// outputs into boxes happens here.
///
/// Model input: 1x128x128x3 f32 image in [-1, 1]
/// Model output:
/// - `classificators`: 896 logits, one per anchor
/// - `regressors`: 896 x 16, the first 4 values are center offset and size
///   in input pixels relative to the anchor, the rest are keypoints
pub struct BlazeFaceDetector {
    model: Session,
    anchors: Vec<PointF32>,
    config: DetectorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Face {
    bounds: Rect,
    confidence: f32,
}

impl BlazeFaceDetector {
    pub fn new(model_path: &Path, threads: usize, config: DetectorConfig) -> Result<BlazeFaceDetector> {
        Ok(BlazeFaceDetector {
            model: initialize_model(model_path, threads)?,
            anchors: gen_anchors(WIDTH, HEIGHT),
            config,
        })
    }
}

impl FaceDetector for BlazeFaceDetector {
    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Rect>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let resized = imageops::resize(frame, WIDTH, HEIGHT, FilterType::Triangle);
        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                resized.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1. // -1. - 1. range
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self.model.run(ort::inputs!["input" => input]?)?;
        let regressors: Vec<f32> = outputs["regressors"]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();
        let scores: Vec<f32> = outputs["classificators"]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        let faces = decode_faces(
            &regressors,
            &scores,
            &self.anchors,
            frame.width(),
            frame.height(),
            &self.config,
        )?;
        trace!("Detected {} faces", faces.len());

        Ok(faces.into_iter().map(|f| f.bounds).collect())
    }
}

fn decode_faces(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[PointF32],
    frame_width: u32,
    frame_height: u32,
    config: &DetectorConfig,
) -> Result<Vec<Face>> {
    if scores.len() != anchors.len() || regressors.len() != anchors.len() * REGRESSOR_LEN {
        return Err(Error::msg(format!(
            "Unexpected detector output: {} scores and {} regressors for {} anchors",
            scores.len(),
            regressors.len(),
            anchors.len()
        )));
    }

    let x_scale = frame_width as f32;
    let y_scale = frame_height as f32;
    let min_size = config.min_face_size as f32;

    let mut candidates = Vec::new();
    for ((anchor, res), score) in anchors
        .iter()
        .zip(regressors.chunks_exact(REGRESSOR_LEN))
        .zip(scores)
    {
        let confidence = sigmoid_stable(score.clamp(-SCORE_CLIP, SCORE_CLIP));
        if confidence < config.min_confidence {
            continue;
        }

        let center = PointF32::new(
            (anchor.x + res[0] / WIDTH as f32) * x_scale,
            (anchor.y + res[1] / HEIGHT as f32) * y_scale,
        );
        let bounds = Rect::from_center(
            center,
            res[2] / WIDTH as f32 * x_scale,
            res[3] / HEIGHT as f32 * y_scale,
        );
        if bounds.w < min_size || bounds.h < min_size {
            continue;
        }

        candidates.push(Face { bounds, confidence });
    }

    // Most confident first, overlapping boxes collapse onto it
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut results: Vec<Face> = Vec::new();
    for candidate in candidates {
        if results
            .iter()
            .all(|kept| kept.bounds.overlap_pct(&candidate.bounds) <= config.max_overlap_pct)
        {
            results.push(candidate);
        }
    }

    Ok(results)
}

fn sigmoid_stable(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regressor(dx: f32, dy: f32, w: f32, h: f32) -> [f32; REGRESSOR_LEN] {
        let mut res = [0.; REGRESSOR_LEN];
        res[..4].copy_from_slice(&[dx, dy, w, h]);
        res
    }

    fn decode(raw: &[([f32; REGRESSOR_LEN], f32)], anchors: &[PointF32]) -> Vec<Face> {
        let regressors: Vec<f32> = raw.iter().flat_map(|(r, _)| r.iter().copied()).collect();
        let scores: Vec<f32> = raw.iter().map(|(_, s)| *s).collect();
        decode_faces(
            &regressors,
            &scores,
            anchors,
            256,
            256,
            &DetectorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_sigmoid_stable() {
        assert_eq!(sigmoid_stable(0.), 0.5);
        assert!(sigmoid_stable(10.) > 0.99);
        assert!(sigmoid_stable(-10.) < 0.01);
        assert!(sigmoid_stable(-SCORE_CLIP).is_finite());
    }

    #[test]
    fn test_decode_scales_to_frame() {
        let anchors = [PointF32::new(0.5, 0.5)];
        let faces = decode(&[(regressor(8., -4., 64., 32.), 4.)], &anchors);

        // 128px input onto a 256px frame
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bounds, Rect::new(80., 88., 128., 64.));
    }

    #[test]
    fn test_decode_filters_and_orders() {
        let anchors = [
            PointF32::new(0.25, 0.25),
            PointF32::new(0.265625, 0.25),
            PointF32::new(0.75, 0.75),
            PointF32::new(0.5, 0.5),
            PointF32::new(0.5, 0.1),
        ];
        let faces = decode(
            &[
                // overlaps the next one, less confident
                (regressor(0., 0., 40., 40.), 1.),
                (regressor(0., 0., 40., 40.), 3.),
                (regressor(0., 0., 48., 48.), 2.),
                // below min confidence
                (regressor(0., 0., 40., 40.), -2.),
                // too small, 10px on the frame
                (regressor(0., 0., 5., 5.), 5.),
            ],
            &anchors,
        );

        let centers: Vec<PointF32> = faces.iter().map(|f| f.bounds.center()).collect();
        assert_eq!(
            centers,
            vec![PointF32::new(68., 64.), PointF32::new(192., 192.)]
        );
        assert!(faces[0].confidence > faces[1].confidence);
    }

    #[test]
    fn test_decode_rejects_mismatched_output() {
        let result = decode_faces(
            &[0.; REGRESSOR_LEN],
            &[0., 0.],
            &[PointF32::new(0.5, 0.5)],
            256,
            256,
            &DetectorConfig::default(),
        );
        assert!(result.is_err());
    }
}
