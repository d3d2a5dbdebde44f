// Anchors are tiled over the feature map in (row, col, anchor) order so that a
// flat index into the network outputs lines up with a flat index into the plane.

use ndarray::{s, Array1, Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{DetectionError, Result};
use crate::rcnn::stride::{FeatureStride, StrideMap};

/// Per-stride anchor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub base_size: usize,
    pub ratios: Vec<f32>,
    pub scales: Vec<f32>,
    /// Multiplier applied to this stride's scores; `1.0` disables it.
    pub score_decay: f32,
}

impl AnchorConfig {
    pub fn new(scales: Vec<f32>) -> Self {
        AnchorConfig {
            base_size: 16,
            ratios: vec![1.0],
            scales,
            score_decay: 1.0,
        }
    }

    pub fn num_anchors(&self) -> usize {
        self.ratios.len() * self.scales.len()
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        AnchorConfig::new(vec![1.0])
    }
}

impl Default for StrideMap<AnchorConfig> {
    fn default() -> Self {
        StrideMap::new(
            AnchorConfig::new(vec![32.0, 16.0]),
            AnchorConfig::new(vec![8.0, 4.0]),
            AnchorConfig::new(vec![2.0, 1.0]),
        )
    }
}

/// anchors tiles `base_anchors` over a `height x width` grid.
///
/// The anchor at `(row, col, k)` is `base_anchors[k] + stride * [col, row, col, row]`.
pub fn anchors(height: usize, width: usize, stride: usize, base_anchors: &Array2<f32>) -> Array4<f32> {
    let a = base_anchors.shape()[0];
    let mut all_anchors = Array4::<f32>::zeros((height, width, a, 4));

    for ih in 0..height {
        let sh = (ih * stride) as f32;
        for iw in 0..width {
            let sw = (iw * stride) as f32;
            for k in 0..a {
                all_anchors[[ih, iw, k, 0]] = base_anchors[[k, 0]] + sw;
                all_anchors[[ih, iw, k, 1]] = base_anchors[[k, 1]] + sh;
                all_anchors[[ih, iw, k, 2]] = base_anchors[[k, 2]] + sw;
                all_anchors[[ih, iw, k, 3]] = base_anchors[[k, 3]] + sh;
            }
        }
    }
    all_anchors
}

/// anchors_plane is `anchors` flattened to `(height * width * A, 4)`.
pub fn anchors_plane(height: usize, width: usize, stride: usize, base_anchors: &Array2<f32>) -> Array2<f32> {
    let a = base_anchors.shape()[0];
    let plane = anchors(height, width, stride, base_anchors);
    // zeros() is standard layout, so the reshape cannot fail
    plane
        .into_shape((height * width * a, 4))
        .unwrap_or_else(|_| Array2::zeros((0, 4)))
}

fn whctrs(anchor: &[f32; 4]) -> (f32, f32, f32, f32) {
    let w = anchor[2] - anchor[0] + 1.0;
    let h = anchor[3] - anchor[1] + 1.0;
    let x_ctr = anchor[0] + 0.5 * (w - 1.0);
    let y_ctr = anchor[1] + 0.5 * (h - 1.0);
    (w, h, x_ctr, y_ctr)
}

fn mkanchor(w: f32, h: f32, x_ctr: f32, y_ctr: f32) -> [f32; 4] {
    [
        x_ctr - 0.5 * (w - 1.0),
        y_ctr - 0.5 * (h - 1.0),
        x_ctr + 0.5 * (w - 1.0),
        y_ctr + 0.5 * (h - 1.0),
    ]
}

/// generate_anchors enumerates aspect ratios then scales around a
/// `[0, 0, base_size - 1, base_size - 1]` reference window.
pub fn generate_anchors(base_size: usize, ratios: &[f32], scales: &[f32]) -> Array2<f32> {
    let base_anchor = [0.0, 0.0, base_size as f32 - 1.0, base_size as f32 - 1.0];
    let (w, h, x_ctr, y_ctr) = whctrs(&base_anchor);
    let size = w * h;

    let mut out = Array2::<f32>::zeros((ratios.len() * scales.len(), 4));
    let mut row = 0;
    for &ratio in ratios {
        let ws = (size / ratio).sqrt().round();
        let hs = (ws * ratio).round();
        let ratio_anchor = mkanchor(ws, hs, x_ctr, y_ctr);
        let (rw, rh, rx, ry) = whctrs(&ratio_anchor);
        for &scale in scales {
            let anchor = mkanchor(rw * scale, rh * scale, rx, ry);
            out.slice_mut(s![row, ..]).assign(&Array1::from(anchor.to_vec()));
            row += 1;
        }
    }
    out
}

/// Base anchors for one stride.
#[derive(Debug, Clone)]
pub struct StrideAnchors {
    pub stride: FeatureStride,
    pub base_anchors: Array2<f32>,
    pub score_decay: f32,
}

impl StrideAnchors {
    /// from_config builds the base anchors of `stride` from an already
    /// validated config.
    fn from_config(stride: FeatureStride, cfg: &AnchorConfig) -> Self {
        StrideAnchors {
            stride,
            base_anchors: generate_anchors(cfg.base_size, &cfg.ratios, &cfg.scales),
            score_decay: cfg.score_decay,
        }
    }

    pub fn num_anchors(&self) -> usize {
        self.base_anchors.nrows()
    }

    /// plane returns every anchor of a `height x width` feature map, flattened.
    pub fn plane(&self, height: usize, width: usize) -> Array2<f32> {
        anchors_plane(height, width, self.stride.value(), &self.base_anchors)
    }
}

fn validate_config(stride: FeatureStride, cfg: &AnchorConfig) -> Result<()> {
    if cfg.base_size == 0 || cfg.num_anchors() == 0 {
        return Err(DetectionError::config(format!(
            "{}: anchor config needs a base size and at least one ratio and scale",
            stride
        )));
    }
    if cfg.ratios.iter().chain(cfg.scales.iter()).any(|v| !v.is_finite() || *v <= 0.0) {
        return Err(DetectionError::config(format!(
            "{}: anchor ratios and scales must be positive",
            stride
        )));
    }
    if !(0.0..=1.0).contains(&cfg.score_decay) {
        return Err(DetectionError::config(format!(
            "{}: score decay {} outside [0, 1]",
            stride, cfg.score_decay
        )));
    }
    Ok(())
}

/// The `{stride -> base anchors}` map, built once per engine.
#[derive(Debug, Clone)]
pub struct AnchorSet {
    strides: StrideMap<StrideAnchors>,
}

impl AnchorSet {
    pub fn new(config: &StrideMap<AnchorConfig>) -> Result<Self> {
        let strides = StrideMap::try_from_fn(|stride| {
            let cfg = config.get(stride);
            validate_config(stride, cfg)?;
            Ok::<StrideAnchors, DetectionError>(StrideAnchors::from_config(stride, cfg))
        })?;
        Ok(AnchorSet { strides })
    }

    pub fn get(&self, stride: FeatureStride) -> &StrideAnchors {
        self.strides.get(stride)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureStride, &StrideAnchors)> {
        self.strides.iter()
    }
}

impl Default for AnchorSet {
    fn default() -> Self {
        let config = StrideMap::<AnchorConfig>::default();
        AnchorSet {
            strides: StrideMap::from_fn(|stride| StrideAnchors::from_config(stride, config.get(stride))),
        }
    }
}
