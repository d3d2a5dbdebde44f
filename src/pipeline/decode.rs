use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView3, Axis};
use tracing::debug;

use crate::error::{DetectionError, Result};
use crate::pipeline::net_outputs::{StrideOutputs, BOX_DELTAS_PER_ANCHOR};
use crate::processing::bbox_transform::{bbox_pred, clip_boxes, landmark_pred, ClipWindow};
use crate::rcnn::anchors::StrideAnchors;

pub const NUM_LANDMARKS: usize = 5;

/// Per-call decoding parameters.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub score_threshold: f32,
    pub bbox_stds: [f32; 4],
    pub landmark_std: f32,
    /// the resized image inside the padding, boxes are clipped to it
    pub clip_window: ClipWindow,
}

/// A single candidate detection in tensor space.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub bbox: [f32; 4],
    pub score: f32,
    pub landmarks: [[f32; 2]; NUM_LANDMARKS],
    pub stride: usize,
}

/// Candidate detections, row `i` of every field belongs together.
#[derive(Debug, Clone)]
pub struct Proposals {
    /// `(N, 4)` as `[x1, y1, x2, y2]`
    pub boxes: Array2<f32>,
    pub scores: Array1<f32>,
    /// `(N, 5, 2)`
    pub landmarks: Array3<f32>,
    pub strides: Vec<usize>,
}

impl Proposals {
    pub fn empty() -> Self {
        Proposals {
            boxes: Array2::zeros((0, 4)),
            scores: Array1::zeros(0),
            landmarks: Array3::zeros((0, NUM_LANDMARKS, 2)),
            strides: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// select keeps the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Proposals {
        Proposals {
            boxes: self.boxes.select(Axis(0), indices),
            scores: self.scores.select(Axis(0), indices),
            landmarks: self.landmarks.select(Axis(0), indices),
            strides: indices.iter().map(|&i| self.strides[i]).collect(),
        }
    }

    /// concatenate stacks proposal pools in the given order.
    pub fn concatenate(parts: &[Proposals]) -> Proposals {
        if parts.is_empty() {
            return Proposals::empty();
        }
        let boxes: Vec<_> = parts.iter().map(|p| p.boxes.view()).collect();
        let scores: Vec<_> = parts.iter().map(|p| p.scores.view()).collect();
        let landmarks: Vec<_> = parts.iter().map(|p| p.landmarks.view()).collect();
        // every part has the same trailing dimensions
        Proposals {
            boxes: concatenate(Axis(0), &boxes).unwrap_or_else(|_| Array2::zeros((0, 4))),
            scores: concatenate(Axis(0), &scores).unwrap_or_else(|_| Array1::zeros(0)),
            landmarks: concatenate(Axis(0), &landmarks)
                .unwrap_or_else(|_| Array3::zeros((0, NUM_LANDMARKS, 2))),
            strides: parts.iter().flat_map(|p| p.strides.iter().copied()).collect(),
        }
    }

    /// order_by_score returns row indices sorted by descending score; ties
    /// keep their current order.
    pub fn order_by_score(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.scores[b].total_cmp(&self.scores[a]));
        order
    }

    /// detections returns `[[x1, y1, x2, y2, score]]`, the layout NMS expects.
    pub fn detections(&self) -> Array2<f32> {
        let mut dets = Array2::<f32>::zeros((self.len(), 5));
        dets.slice_mut(s![.., ..4]).assign(&self.boxes);
        dets.slice_mut(s![.., 4]).assign(&self.scores);
        dets
    }

    pub fn get(&self, i: usize) -> Proposal {
        let b = self.boxes.row(i);
        let mut landmarks = [[0.0; 2]; NUM_LANDMARKS];
        for (k, point) in self.landmarks.index_axis(Axis(0), i).outer_iter().enumerate() {
            landmarks[k] = [point[0], point[1]];
        }
        Proposal {
            bbox: [b[0], b[1], b[2], b[3]],
            score: self.scores[i],
            landmarks,
            stride: self.strides[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Proposal> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

fn flatten(view: ArrayView3<f32>, cols: usize) -> Result<Array2<f32>> {
    let n = view.len() / cols;
    Array2::from_shape_vec((n, cols), view.iter().copied().collect())
        .map_err(|e| DetectionError::contract(format!("cannot reshape outputs to (N, {}): {}", cols, e)))
}

/// decode_stride turns one stride's raw outputs into thresholded proposals.
pub fn decode_stride(
    outputs: &StrideOutputs,
    anchors: &StrideAnchors,
    params: &DecodeParams,
) -> Result<Proposals> {
    let num_anchors = anchors.num_anchors();
    let (height, width) = outputs.feature_shape();
    let anchor_plane: Array2<f32> = anchors.plane(height, width);
    let n = anchor_plane.nrows();

    // the network emits background scores first, then foreground
    let fg = outputs.scores.slice(s![0, .., .., num_anchors..]);
    let mut scores = Array1::from_iter(fg.iter().copied());

    let mut bbox_deltas = flatten(outputs.bbox_deltas.index_axis(Axis(0), 0), BOX_DELTAS_PER_ANCHOR)?;
    for (j, std) in params.bbox_stds.iter().enumerate() {
        bbox_deltas.column_mut(j).mapv_inplace(|d| d * std);
    }
    let landmark_view = outputs.landmark_deltas.index_axis(Axis(0), 0);
    let landmark_deltas = Array3::from_shape_vec(
        (n, NUM_LANDMARKS, 2),
        landmark_view.iter().map(|d| d * params.landmark_std).collect(),
    )
    .map_err(|e| DetectionError::contract(format!("cannot reshape landmark deltas: {}", e)))?;

    if scores.len() != n || bbox_deltas.nrows() != n {
        return Err(DetectionError::contract(format!(
            "{}: {} anchors but {} scores and {} box deltas",
            anchors.stride,
            n,
            scores.len(),
            bbox_deltas.nrows()
        )));
    }

    let mut proposals = bbox_pred(anchor_plane.view(), bbox_deltas.view());
    clip_boxes(&mut proposals, params.clip_window);

    if anchors.score_decay < 1.0 {
        scores.mapv_inplace(|v| v * anchors.score_decay);
    }
    // NaN passes through clamp and fails the threshold below
    scores.mapv_inplace(|v| v.clamp(0.0, 1.0));

    let order: Vec<usize> = scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score >= params.score_threshold)
        .map(|(i, _)| i)
        .collect();

    let keep_anchors: Array2<f32> = anchor_plane.select(Axis(0), &order);
    let keep_deltas = landmark_deltas.select(Axis(0), &order);
    let landmarks = landmark_pred(keep_anchors.view(), keep_deltas.view());

    debug!(
        "{}: {}x{} feature map, {} of {} anchors above {}",
        anchors.stride,
        width,
        height,
        order.len(),
        n,
        params.score_threshold
    );

    Ok(Proposals {
        boxes: proposals.select(Axis(0), &order),
        scores: scores.select(Axis(0), &order),
        landmarks,
        strides: vec![anchors.stride.value(); order.len()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcnn::anchors::{AnchorConfig, AnchorSet};
    use crate::rcnn::stride::{FeatureStride, StrideMap};
    use ndarray::Array4;

    fn params(score_threshold: f32, tensor_shape: (usize, usize)) -> DecodeParams {
        DecodeParams {
            score_threshold,
            bbox_stds: [1.0; 4],
            landmark_std: 1.0,
            clip_window: ClipWindow::from_shape(tensor_shape),
        }
    }

    fn zero_outputs(h: usize, w: usize, a: usize) -> StrideOutputs {
        StrideOutputs {
            scores: Array4::zeros((1, h, w, 2 * a)),
            bbox_deltas: Array4::zeros((1, h, w, 4 * a)),
            landmark_deltas: Array4::zeros((1, h, w, 10 * a)),
        }
    }

    #[test]
    fn test_known_anchor_decodes_to_itself() {
        let set = AnchorSet::default();
        let anchors = set.get(FeatureStride::S8);
        let mut outputs = zero_outputs(4, 4, 2);
        // foreground score of base anchor 0 ([-8, -8, 23, 23]) at cells (0, 0) and (1, 1)
        outputs.scores[[0, 0, 0, 2]] = 0.95;
        outputs.scores[[0, 1, 1, 2]] = 0.95;

        let proposals = decode_stride(&outputs, anchors, &params(0.9, (32, 32))).unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals.scores.to_vec(), vec![0.95, 0.95]);
        assert_eq!(proposals.strides, vec![8, 8]);
        // cell (0, 0) is clipped at the top-left border
        assert_eq!(proposals.boxes.row(0).to_vec(), vec![0.0, 0.0, 23.0, 23.0]);
        // cell (1, 1) is the anchor moved by one stride
        assert_eq!(proposals.boxes.row(1).to_vec(), vec![0.0, 0.0, 31.0, 31.0]);
        // zero landmark deltas sit on the anchor center
        let p = proposals.get(1);
        assert_eq!(p.landmarks, [[15.5, 15.5]; 5]);
    }

    #[test]
    fn test_background_channels_are_ignored() {
        let set = AnchorSet::default();
        let mut outputs = zero_outputs(2, 2, 2);
        outputs.scores.slice_mut(s![0, .., .., ..2]).fill(1.0);
        let proposals = decode_stride(&outputs, set.get(FeatureStride::S16), &params(0.5, (32, 32))).unwrap();
        assert!(proposals.is_empty());
    }

    #[test]
    fn test_score_decay_and_clamp() {
        let mut cfg = StrideMap::<AnchorConfig>::default();
        cfg.stride8.score_decay = 0.5;
        let set = AnchorSet::new(&cfg).unwrap();
        let mut outputs = zero_outputs(2, 2, 2);
        outputs.scores[[0, 0, 0, 2]] = 0.96;
        outputs.scores[[0, 0, 1, 3]] = 3.0;
        let proposals = decode_stride(&outputs, set.get(FeatureStride::S8), &params(0.0, (16, 16))).unwrap();
        assert_eq!(proposals.len(), 8);
        assert!((proposals.scores[0] - 0.48).abs() < 1e-6);
        assert!(proposals.scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_bbox_stds_scale_deltas() {
        let set = AnchorSet::default();
        let anchors = set.get(FeatureStride::S8);
        let mut outputs = zero_outputs(4, 4, 2);
        outputs.scores[[0, 2, 2, 3]] = 1.0;
        // anchor 1 at (2, 2) is [16, 16, 31, 31]; dx = 0.25 with std 2 shifts by 8
        outputs.bbox_deltas[[0, 2, 2, 4]] = 0.25;
        let mut p = params(0.5, (64, 64));
        p.bbox_stds = [2.0, 1.0, 1.0, 1.0];
        let proposals = decode_stride(&outputs, anchors, &p).unwrap();
        assert_eq!(proposals.boxes.row(0).to_vec(), vec![24.0, 16.0, 39.0, 31.0]);
    }

    #[test]
    fn test_select_concatenate_and_order() {
        let set = AnchorSet::default();
        let mut a = zero_outputs(1, 1, 2);
        a.scores[[0, 0, 0, 2]] = 0.91;
        let mut b = zero_outputs(2, 2, 2);
        b.scores[[0, 1, 0, 3]] = 0.99;
        b.scores[[0, 0, 0, 2]] = 0.91;
        let pa = decode_stride(&a, set.get(FeatureStride::S32), &params(0.9, (32, 32))).unwrap();
        let pb = decode_stride(&b, set.get(FeatureStride::S16), &params(0.9, (32, 32))).unwrap();

        let pool = Proposals::concatenate(&[pa, pb]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.strides, vec![32, 16, 16]);
        assert_eq!(pool.order_by_score(), vec![2, 0, 1]);

        let sorted = pool.select(&pool.order_by_score());
        assert_eq!(sorted.strides, vec![16, 32, 16]);
        let dets = sorted.detections();
        assert_eq!(dets.shape(), &[3, 5]);
        assert!((dets[[0, 4]] - 0.99).abs() < 1e-6);
        assert_eq!(sorted.iter().count(), 3);
    }

    #[test]
    fn test_boxes_clip_to_content_window() {
        let set = AnchorSet::default();
        let mut outputs = zero_outputs(8, 8, 2);
        // base anchor 1 at (0, 3) is [24, 0, 39, 15], above content rows 16..=47
        outputs.scores[[0, 0, 3, 3]] = 0.99;
        // base anchor 0 at (5, 7) is [48, 32, 79, 63], past the bottom edge
        outputs.scores[[0, 5, 7, 2]] = 0.99;
        let mut p = params(0.5, (64, 64));
        p.clip_window = ClipWindow { x1: 0.0, y1: 16.0, x2: 63.0, y2: 47.0 };

        let proposals = decode_stride(&outputs, set.get(FeatureStride::S8), &p).unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals.boxes.row(0).to_vec(), vec![24.0, 16.0, 39.0, 16.0]);
        assert_eq!(proposals.boxes.row(1).to_vec(), vec![48.0, 32.0, 63.0, 47.0]);
    }
}
