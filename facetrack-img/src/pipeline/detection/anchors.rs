use crate::shapes::PointF32;

// BlazeFace short range SSD layout, as produced by mediapipe's
// SsdAnchorsCalculator: 4 layers, 2 anchors per layer, consecutive layers
// sharing a stride are merged onto one grid.
const STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: u32 = 2;
const ANCHOR_OFFSET: f32 = 0.5;

pub const NUM_ANCHORS: usize = 896;

/// Anchor centers in normalized [0, 1] input coordinates. The model uses
/// fixed size anchors, so a center is all there is.
pub fn gen_anchors(width: u32, height: u32) -> Vec<PointF32> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];

        let mut per_cell = 0;
        while layer < STRIDES.len() && STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let rows = height.div_ceil(stride);
        let cols = width.div_ceil(stride);
        for y in 0..rows {
            for x in 0..cols {
                let center = PointF32::new(
                    (x as f32 + ANCHOR_OFFSET) / cols as f32,
                    (y as f32 + ANCHOR_OFFSET) / rows as f32,
                );
                for _ in 0..per_cell {
                    anchors.push(center);
                }
            }
        }
    }

    anchors
}
