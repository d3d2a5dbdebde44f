// The network's own output names are not stable across format conversions,
// so the nine raw tensors are bound to strides purely by position and
// validated here before anything reads them.

use ndarray::{Array4, ArrayD, Ix4};
use tracing::warn;

use crate::error::{DetectionError, Result};
use crate::rcnn::anchors::AnchorSet;
use crate::rcnn::stride::{FeatureStride, StrideMap};

/// Tensors emitted per stride, in output order.
pub const TENSORS_PER_STRIDE: usize = 3;
/// Total tensors expected from one inference call.
pub const NUM_OUTPUTS: usize = TENSORS_PER_STRIDE * FeatureStride::ALL.len();

pub const BOX_DELTAS_PER_ANCHOR: usize = 4;
pub const LANDMARK_DELTAS_PER_ANCHOR: usize = 10;

/// Raw outputs of one pyramid level, each `[1, H, W, C]`.
#[derive(Debug, Clone)]
pub struct StrideOutputs {
    /// background + foreground pairs, `C = 2A`
    pub scores: Array4<f32>,
    /// `C = 4A`
    pub bbox_deltas: Array4<f32>,
    /// `C = 10A`
    pub landmark_deltas: Array4<f32>,
}

impl StrideOutputs {
    /// feature map `(height, width)`
    pub fn feature_shape(&self) -> (usize, usize) {
        let shape = self.scores.shape();
        (shape[1], shape[2])
    }
}

/// The nine network outputs bound to their strides.
pub type NetOutputs = StrideMap<StrideOutputs>;

fn into_nhwc(tensor: ArrayD<f32>, stride: FeatureStride, name: &str) -> Result<Array4<f32>> {
    let ndim = tensor.ndim();
    let tensor = match tensor.into_dimensionality::<Ix4>() {
        Ok(tensor) => tensor,
        Err(_) => {
            return Err(DetectionError::contract(format!(
                "{} {}: expected a rank 4 tensor, got rank {}",
                stride, name, ndim
            )))
        }
    };
    if tensor.shape()[0] != 1 {
        return Err(DetectionError::contract(format!(
            "{} {}: expected batch size 1, got {}",
            stride,
            name,
            tensor.shape()[0]
        )));
    }
    Ok(tensor)
}

fn check_stride(
    outputs: &StrideOutputs,
    stride: FeatureStride,
    num_anchors: usize,
    tensor_shape: (usize, usize),
) -> Result<()> {
    let (height, width) = outputs.feature_shape();
    let expected = [
        ("scores", &outputs.scores, 2 * num_anchors),
        ("bbox_deltas", &outputs.bbox_deltas, BOX_DELTAS_PER_ANCHOR * num_anchors),
        ("landmark_deltas", &outputs.landmark_deltas, LANDMARK_DELTAS_PER_ANCHOR * num_anchors),
    ];
    for (name, tensor, channels) in expected {
        let shape = tensor.shape();
        if shape[1] != height || shape[2] != width {
            return Err(DetectionError::contract(format!(
                "{} {}: feature map {}x{} does not match scores {}x{}",
                stride, name, shape[2], shape[1], width, height
            )));
        }
        if shape[3] != channels {
            return Err(DetectionError::contract(format!(
                "{} {}: expected {} channels, got {}",
                stride, name, channels, shape[3]
            )));
        }
    }

    // floor or ceil of size / stride depending on how the network pads
    let s = stride.value();
    let fits = |feature: usize, size: usize| feature == size / s || feature == (size + s - 1) / s;
    if height == 0 || width == 0 || !fits(height, tensor_shape.0) || !fits(width, tensor_shape.1) {
        return Err(DetectionError::contract(format!(
            "{}: feature map {}x{} inconsistent with a {}x{} input",
            stride, width, height, tensor_shape.1, tensor_shape.0
        )));
    }
    Ok(())
}

/// bind_outputs validates the raw inference result and binds it to strides.
///
/// `tensor_shape` is the `(height, width)` of the tensor that was fed to the
/// network.
pub fn bind_outputs(
    tensors: Vec<ArrayD<f32>>,
    anchors: &AnchorSet,
    tensor_shape: (usize, usize),
) -> Result<NetOutputs> {
    if tensors.len() != NUM_OUTPUTS {
        warn!("inference returned {} tensors, expected {}", tensors.len(), NUM_OUTPUTS);
        return Err(DetectionError::contract(format!(
            "expected {} output tensors, got {}",
            NUM_OUTPUTS,
            tensors.len()
        )));
    }

    let mut tensors = tensors.into_iter();
    let result = StrideMap::try_from_fn(|stride| {
        let mut next = |name: &str| match tensors.next() {
            Some(t) => into_nhwc(t, stride, name),
            None => Err(DetectionError::contract("output tensors exhausted")),
        };
        let outputs = StrideOutputs {
            scores: next("scores")?,
            bbox_deltas: next("bbox_deltas")?,
            landmark_deltas: next("landmark_deltas")?,
        };
        check_stride(&outputs, stride, anchors.get(stride).num_anchors(), tensor_shape)?;
        Ok(outputs)
    });
    if let Err(e) = &result {
        warn!("rejecting inference outputs: {}", e);
    }
    result
}
