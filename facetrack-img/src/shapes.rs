pub mod landmarks;
pub mod point;
pub mod rect;

pub use landmarks::{Landmark, LandmarkSet, align_mean, enclosing_bbox, scale_factor};
pub use point::PointF32;
pub use rect::Rect;
