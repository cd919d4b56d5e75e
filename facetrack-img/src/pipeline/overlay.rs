use image::{Rgba, RgbaImage};
use imageproc::drawing;

use crate::shapes::{LandmarkSet, Rect};

pub const DETECTION_COLOR: Rgba<u8> = Rgba([0u8, 0u8, 255u8, 255u8]);
pub const LANDMARK_COLOR: Rgba<u8> = Rgba([0u8, 255u8, 0u8, 255u8]);

const LANDMARK_RADIUS: i32 = 2;

pub fn draw_detection(img: &mut RgbaImage, face: &Rect) {
    drawing::draw_hollow_rect_mut(img, (*face).into(), DETECTION_COLOR);
}

pub fn draw_landmarks(img: &mut RgbaImage, landmarks: &LandmarkSet) {
    for p in landmarks.points() {
        drawing::draw_filled_circle_mut(img, p.round(), LANDMARK_RADIUS, LANDMARK_COLOR);
    }
}
