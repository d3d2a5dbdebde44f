// Boxes are [x1, y1, x2, y2] with inclusive pixel corners, so a box whose
// corners coincide still covers one pixel.

const MIN_UNION: f32 = 1.0e-10;

/// area returns `(x2 - x1 + 1) * (y2 - y1 + 1)`, zero for degenerate boxes.
pub fn area(b: &[f32]) -> f32 {
    let w = (b[2] - b[0] + 1.0).max(0.0);
    let h = (b[3] - b[1] + 1.0).max(0.0);
    w * h
}

/// intersection returns the inclusive overlap area of two boxes.
pub fn intersection(a: &[f32], b: &[f32]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0]) + 1.0).max(0.0);
    if iw <= 0.0 {
        return 0.0;
    }
    let ih = (a[3].min(b[3]) - a[1].max(b[1]) + 1.0).max(0.0);
    iw * ih
}

/// iou returns the intersection-over-union of two boxes.
///
/// The union is floored at a tiny epsilon so degenerate inputs yield `0.0`
/// instead of NaN.
pub fn iou(a: &[f32], b: &[f32]) -> f32 {
    let inter = intersection(a, b);
    if inter <= 0.0 {
        return 0.0;
    }
    let ua = (area(a) + area(b) - inter).max(MIN_UNION);
    inter / ua
}
