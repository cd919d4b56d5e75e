use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointF32 {
    pub x: f32,
    pub y: f32,
}

impl PointF32 {
    pub const fn new(x: f32, y: f32) -> PointF32 {
        PointF32 { x, y }
    }

    // Nearest pixel, for drawing
    pub fn round(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

impl std::ops::Add for PointF32 {
    type Output = PointF32;

    fn add(self, rhs: PointF32) -> PointF32 {
        PointF32::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for PointF32 {
    type Output = PointF32;

    fn sub(self, rhs: PointF32) -> PointF32 {
        PointF32::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_arithmetic() {
        let a = PointF32::new(1., 2.);
        let b = PointF32::new(4., 6.);

        assert_eq!(b - a, PointF32::new(3., 4.));
        assert_eq!(a + b, PointF32::new(5., 8.));
        assert_eq!(PointF32::new(1.4, 2.6).round(), (1, 3));
    }
}
