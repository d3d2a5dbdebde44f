use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

fn widths_and_centers(boxes: &ArrayView2<f32>) -> (Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>) {
    let n = boxes.nrows();
    let mut widths = Vec::with_capacity(n);
    let mut heights = Vec::with_capacity(n);
    let mut ctr_x = Vec::with_capacity(n);
    let mut ctr_y = Vec::with_capacity(n);
    for b in boxes.outer_iter() {
        let w = b[2] - b[0] + 1.0;
        let h = b[3] - b[1] + 1.0;
        widths.push(w);
        heights.push(h);
        ctr_x.push(b[0] + 0.5 * (w - 1.0));
        ctr_y.push(b[1] + 0.5 * (h - 1.0));
    }
    (widths, heights, ctr_x, ctr_y)
}

/// bbox_pred applies regression deltas `[dx, dy, dw, dh]` to anchor boxes.
///
/// Centers move linearly with the anchor size, sizes scale by `exp(delta)`.
/// Columns past the fourth are copied through unchanged.
pub fn bbox_pred(boxes: ArrayView2<f32>, box_deltas: ArrayView2<f32>) -> Array2<f32> {
    let mut pred_boxes = Array2::<f32>::zeros(box_deltas.raw_dim());
    if boxes.nrows() == 0 {
        return pred_boxes;
    }

    let (widths, heights, ctr_x, ctr_y) = widths_and_centers(&boxes);

    for (i, (delta, mut pred)) in box_deltas
        .outer_iter()
        .zip(pred_boxes.outer_iter_mut())
        .enumerate()
    {
        let pred_ctr_x = delta[0] * widths[i] + ctr_x[i];
        let pred_ctr_y = delta[1] * heights[i] + ctr_y[i];
        let pred_w = delta[2].exp() * widths[i];
        let pred_h = delta[3].exp() * heights[i];

        pred[0] = pred_ctr_x - 0.5 * (pred_w - 1.0);
        pred[1] = pred_ctr_y - 0.5 * (pred_h - 1.0);
        pred[2] = pred_ctr_x + 0.5 * (pred_w - 1.0);
        pred[3] = pred_ctr_y + 0.5 * (pred_h - 1.0);
        for j in 4..delta.len() {
            pred[j] = delta[j];
        }
    }
    pred_boxes
}

/// landmark_pred decodes `(N, 5, 2)` landmark deltas against anchor boxes.
///
/// Each point is `delta * anchor_size + anchor_center`, no exponential.
pub fn landmark_pred(boxes: ArrayView2<f32>, landmark_deltas: ArrayView3<f32>) -> Array3<f32> {
    let mut pred = landmark_deltas.to_owned();
    if boxes.nrows() == 0 {
        return pred;
    }

    let (widths, heights, ctr_x, ctr_y) = widths_and_centers(&boxes);

    for (i, mut points) in pred.axis_iter_mut(Axis(0)).enumerate() {
        for mut point in points.outer_iter_mut() {
            point[0] = point[0] * widths[i] + ctr_x[i];
            point[1] = point[1] * heights[i] + ctr_y[i];
        }
    }
    pred
}

/// Inclusive pixel rectangle boxes are clipped to, in tensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl ClipWindow {
    /// from_shape covers a whole `(height, width)` image.
    pub fn from_shape(im_shape: (usize, usize)) -> Self {
        ClipWindow {
            x1: 0.0,
            y1: 0.0,
            x2: im_shape.1.saturating_sub(1) as f32,
            y2: im_shape.0.saturating_sub(1) as f32,
        }
    }
}

/// clip_boxes clamps every box into `[x1, x2] x [y1, y2]` of `window`.
pub fn clip_boxes(boxes: &mut Array2<f32>, window: ClipWindow) {
    for mut b in boxes.outer_iter_mut() {
        // max/min rather than clamp so NaN collapses onto the border
        b[0] = b[0].min(window.x2).max(window.x1);
        b[1] = b[1].min(window.y2).max(window.y1);
        b[2] = b[2].min(window.x2).max(window.x1);
        b[3] = b[3].min(window.y2).max(window.y1);
    }
}
