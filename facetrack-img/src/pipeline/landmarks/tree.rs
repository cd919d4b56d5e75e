use anyhow::{Error, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::shapes::{PointF32, Rect};

/// Pixel pair to compare, each pinned to a landmark of the current shape.
/// Offsets are in face box units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFeature {
    pub anchor1: u16,
    pub offset1: PointF32,
    pub anchor2: u16,
    pub offset2: PointF32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: SplitFeature,
        threshold: f32,
        left: u32,
        right: u32,
    },
    /// Shape update in face box units, one entry per landmark
    Leaf { delta: Vec<PointF32> },
}

/// Node 0 is the root. Children always sit after their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn new(nodes: Vec<TreeNode>) -> RegressionTree {
        RegressionTree { nodes }
    }

    pub fn predict<F>(&self, get_feature: F) -> &[PointF32]
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if get_feature(feature) > *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                TreeNode::Leaf { delta } => return delta,
            }
        }
    }

    pub(super) fn validate(&self, num_landmarks: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::msg("Regression tree without nodes"));
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    for child in [*left as usize, *right as usize] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(Error::msg(format!(
                                "Node {idx} points at invalid child {child}"
                            )));
                        }
                    }
                    for anchor in [feature.anchor1, feature.anchor2] {
                        if anchor as usize >= num_landmarks {
                            return Err(Error::msg(format!(
                                "Node {idx} anchors on landmark {anchor} of {num_landmarks}"
                            )));
                        }
                    }
                }
                TreeNode::Leaf { delta } => {
                    if delta.len() != num_landmarks {
                        return Err(Error::msg(format!(
                            "Leaf {idx} moves {} landmarks, model has {num_landmarks}",
                            delta.len()
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// One cascade stage: the trees' leaf deltas add up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<RegressionTree>,
}

impl TreeEnsemble {
    pub fn new(trees: Vec<RegressionTree>) -> TreeEnsemble {
        TreeEnsemble { trees }
    }

    pub fn predict<F>(&self, num_landmarks: usize, get_feature: F) -> Vec<PointF32>
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut delta = vec![PointF32::default(); num_landmarks];
        for tree in &self.trees {
            for (d, t) in delta.iter_mut().zip(tree.predict(&get_feature)) {
                *d = *d + *t;
            }
        }
        delta
    }
}

/// Grey level difference between the feature's two pixels.
pub fn feature_value(
    feature: &SplitFeature,
    shape: &[PointF32],
    face: &Rect,
    image: &GrayImage,
) -> f32 {
    let at = |anchor: u16, offset: PointF32| {
        let p = shape[anchor as usize];
        sample_bilinear(image, p.x + offset.x * face.w, p.y + offset.y * face.h)
    };

    at(feature.anchor1, feature.offset1) - at(feature.anchor2, feature.offset2)
}

fn pixel(image: &GrayImage, x: i32, y: i32) -> f32 {
    if x < 0 || y < 0 {
        return 0.;
    }
    image
        .get_pixel_checked(x as u32, y as u32)
        .map(|p| p[0] as f32)
        .unwrap_or(0.)
}

/// Outside the image reads as black.
pub fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    // Also catches NaN and coordinates too far off to fit an i32
    let inside = x > -1. && y > -1. && x < image.width() as f32 && y < image.height() as f32;
    if !inside {
        return 0.;
    }

    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = pixel(image, x0, y0) * (1. - fx) + pixel(image, x0 + 1, y0) * fx;
    let bottom = pixel(image, x0, y0 + 1) * (1. - fx) + pixel(image, x0 + 1, y0 + 1) * fx;
    top * (1. - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn split(left: u32, right: u32) -> TreeNode {
        TreeNode::Split {
            feature: SplitFeature {
                anchor1: 0,
                offset1: PointF32::default(),
                anchor2: 1,
                offset2: PointF32::default(),
            },
            threshold: 50.,
            left,
            right,
        }
    }

    fn leaf(x: f32, y: f32) -> TreeNode {
        TreeNode::Leaf {
            delta: vec![PointF32::new(x, y), PointF32::new(x, y)],
        }
    }

    #[test]
    fn test_tree_traversal() {
        let tree = RegressionTree::new(vec![split(1, 2), leaf(-0.1, 0.), leaf(0.1, 0.)]);

        // above threshold goes left
        assert_eq!(tree.predict(|_| 100.)[0].x, -0.1);
        assert_eq!(tree.predict(|_| 50.)[0].x, 0.1);
    }

    #[test]
    fn test_ensemble_sums_trees() {
        let ensemble = TreeEnsemble::new(vec![
            RegressionTree::new(vec![leaf(0.25, 0.5)]),
            RegressionTree::new(vec![leaf(0.5, 0.25)]),
        ]);
        let delta = ensemble.predict(2, |_| 0.);
        assert_eq!(delta, vec![PointF32::new(0.75, 0.75); 2]);
    }

    #[test]
    fn test_validate() {
        assert!(RegressionTree::new(vec![split(1, 2), leaf(0., 0.), leaf(0., 0.)])
            .validate(2)
            .is_ok());
        assert!(RegressionTree::new(vec![]).validate(2).is_err());
        // cycle back to the root
        assert!(RegressionTree::new(vec![split(0, 1), leaf(0., 0.)])
            .validate(2)
            .is_err());
        assert!(RegressionTree::new(vec![split(1, 5), leaf(0., 0.)])
            .validate(2)
            .is_err());
        // anchors on landmark 1, but only one landmark
        assert!(RegressionTree::new(vec![split(1, 2), leaf(0., 0.), leaf(0., 0.)])
            .validate(1)
            .is_err());
        assert!(RegressionTree::new(vec![leaf(0., 0.)]).validate(3).is_err());
    }

    #[test]
    fn test_sample_bilinear() {
        let img = GrayImage::from_raw(2, 2, vec![0, 100, 200, 50]).unwrap();

        assert_eq!(sample_bilinear(&img, 1., 0.), 100.);
        assert_eq!(sample_bilinear(&img, 0., 1.), 200.);
        assert_eq!(sample_bilinear(&img, 0.5, 0.5), 87.5);
        assert_eq!(sample_bilinear(&img, 0.5, 0.), 50.);
        assert_eq!(sample_bilinear(&img, -3., 0.), 0.);
        // right neighbour of the last column is off the image
        assert_eq!(sample_bilinear(&img, 1.5, 0.), 50.);
    }

    #[test]
    fn test_sample_far_outside() {
        let img = GrayImage::from_pixel(4, 4, Luma([200]));

        assert_eq!(sample_bilinear(&img, 3.0e10, 1.), 0.);
        assert_eq!(sample_bilinear(&img, 1., -3.0e10), 0.);
        assert_eq!(sample_bilinear(&img, f32::NAN, 1.), 0.);
        assert_eq!(sample_bilinear(&img, f32::INFINITY, f32::NEG_INFINITY), 0.);
    }

    #[test]
    fn test_feature_value() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([(x * 20) as u8]));
        let shape = [PointF32::new(2., 5.), PointF32::new(7., 5.)];
        let face = Rect::new(0., 0., 10., 10.);
        let feature = SplitFeature {
            anchor1: 0,
            offset1: PointF32::new(0.1, 0.),
            anchor2: 1,
            offset2: PointF32::default(),
        };

        // x=3 is 60, x=7 is 140
        assert_eq!(feature_value(&feature, &shape, &face, &img), -80.);
    }
}
