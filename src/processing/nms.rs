use ndarray::ArrayView2;

use crate::rcnn::bbox::iou;

/// greedily select boxes with high confidence, ruling out any box whose
/// overlap with an already kept box is >= thresh
///
/// * `dets` - `[[x1, y1, x2, y2, score]]`
/// * `thresh` - overlaps below this value are retained
/// * `return` - indexes into `dets` to keep, highest score first
///
/// Ties keep their original order.
pub fn nms(dets: ArrayView2<f32>, thresh: f32) -> Vec<usize> {
    let ndets = dets.nrows();
    if ndets == 0 {
        return Vec::new();
    }

    let boxes: Vec<[f32; 4]> = dets
        .outer_iter()
        .map(|d| [d[0], d[1], d[2], d[3]])
        .collect();

    let mut order: Vec<usize> = (0..ndets).collect();
    order.sort_by(|&a, &b| dets[[b, 4]].total_cmp(&dets[[a, 4]]));

    let mut suppressed = vec![false; ndets];
    let mut keep = Vec::new();

    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if suppressed[j] {
                continue;
            }
            // disjoint boxes never suppress each other, even at thresh 0
            let ovr = iou(&boxes[i], &boxes[j]);
            if ovr > 0.0 && ovr >= thresh {
                suppressed[j] = true;
            }
        }
    }

    keep
}
