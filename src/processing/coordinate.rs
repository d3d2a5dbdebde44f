use ndarray::{ArrayViewMut1, ArrayViewMut2};

use crate::processing::preprocess::{AxisScale, Offset};

/// to_original_space undoes the resize + centered padding of `preprocess`.
///
/// `offset` is in tensor pixels, so it is removed before dividing by the
/// per-axis scale: `x' = x / scale.x - offset.x / scale.x`.
#[inline]
pub fn to_original_space(x: f32, y: f32, scale: AxisScale, offset: Offset) -> (f32, f32) {
    ((x - offset.x) / scale.x, (y - offset.y) / scale.y)
}

/// map_box maps both corners of `[x1, y1, x2, y2]` in place.
pub fn map_box(mut bbox: ArrayViewMut1<f32>, scale: AxisScale, offset: Offset) {
    let (x1, y1) = to_original_space(bbox[0], bbox[1], scale, offset);
    let (x2, y2) = to_original_space(bbox[2], bbox[3], scale, offset);
    bbox[0] = x1;
    bbox[1] = y1;
    bbox[2] = x2;
    bbox[3] = y2;
}

/// map_landmarks maps a `(5, 2)` block of points in place.
pub fn map_landmarks(mut points: ArrayViewMut2<f32>, scale: AxisScale, offset: Offset) {
    for mut point in points.outer_iter_mut() {
        let (x, y) = to_original_space(point[0], point[1], scale, offset);
        point[0] = x;
        point[1] = y;
    }
}
