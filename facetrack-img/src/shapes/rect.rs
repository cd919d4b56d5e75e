use super::point::PointF32;

/// Axis-aligned box in image pixels, anchored at its top-left corner.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl From<Rect> for imageproc::rect::Rect {
    fn from(r: Rect) -> imageproc::rect::Rect {
        // imageproc rejects empty rects
        imageproc::rect::Rect::at(r.x.round() as i32, r.y.round() as i32)
            .of_size(r.w.round().max(1.) as u32, r.h.round().max(1.) as u32)
    }
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect { x, y, w, h }
    }

    pub fn from_center(center: PointF32, w: f32, h: f32) -> Rect {
        Rect {
            x: center.x - w / 2.,
            y: center.y - h / 2.,
            w,
            h,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }
    pub fn right(&self) -> f32 {
        self.x + self.w
    }
    pub fn top(&self) -> f32 {
        self.y
    }
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn origin(&self) -> PointF32 {
        PointF32::new(self.x, self.y)
    }

    pub fn center(&self) -> PointF32 {
        PointF32::new(self.x + self.w / 2., self.y + self.h / 2.)
    }

    pub fn contains(&self, p: &PointF32) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }

    /// Part of the box that lies inside a `width` x `height` image, if any.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let left = self.left().max(0.);
        let top = self.top().max(0.);
        let right = self.right().min(width as f32);
        let bottom = self.bottom().min(height as f32);

        if left < right && top < bottom {
            Some(Rect::new(left, top, right - left, bottom - top))
        } else {
            None
        }
    }

    /// Intersection over union, as a percentage.
    pub fn overlap_pct(&self, other: &Rect) -> f32 {
        let x_min = self.left().max(other.left());
        let x_max = self.right().min(other.right());
        let y_min = self.top().max(other.top());
        let y_max = self.bottom().min(other.bottom());

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) * (y_max - y_min)
        } else {
            0.
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0. {
            overlap_area / area_delta * 100.
        } else {
            0.
        }
    }
}
