use serde::{Deserialize, Serialize};

use crate::error::{DetectionError, Result};
use crate::processing::preprocess::PixelNormalization;
use crate::rcnn::anchors::AnchorConfig;
use crate::rcnn::stride::StrideMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceDetectionConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub allow_upscaling: bool,
    /// network input `(width, height)`
    pub image_size: (u32, u32),
    pub pixel_means: [f32; 3],
    pub pixel_stds: [f32; 3],
    pub pixel_scale: f32,
    pub bbox_stds: [f32; 4],
    pub landmark_std: f32,
    pub anchor_cfg: StrideMap<AnchorConfig>,
}

impl FaceDetectionConfig {
    pub fn new() -> Self {
        FaceDetectionConfig {
            score_threshold: 0.9,
            nms_threshold: 0.4,
            allow_upscaling: true,
            image_size: (1024, 1024),
            pixel_means: [0.0, 0.0, 0.0],
            pixel_stds: [1.0, 1.0, 1.0],
            pixel_scale: 1.0,
            bbox_stds: [1.0, 1.0, 1.0, 1.0],
            landmark_std: 1.0,
            anchor_cfg: StrideMap::default(),
        }
    }

    pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    pub fn with_nms_threshold(mut self, nms_threshold: f32) -> Self {
        self.nms_threshold = nms_threshold;
        self
    }

    pub fn with_allow_upscaling(mut self, allow_upscaling: bool) -> Self {
        self.allow_upscaling = allow_upscaling;
        self
    }

    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = (width, height);
        self
    }

    pub fn normalization(&self) -> PixelNormalization {
        PixelNormalization {
            means: self.pixel_means,
            stds: self.pixel_stds,
            scale: self.pixel_scale,
        }
    }

    /// validate checks every field the engine divides by or compares against.
    /// Anchor settings are checked when the anchor set is built.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(DetectionError::config(format!(
                "score_threshold {} outside [0, 1]",
                self.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(DetectionError::config(format!(
                "nms_threshold {} outside [0, 1]",
                self.nms_threshold
            )));
        }
        if self.image_size.0 == 0 || self.image_size.1 == 0 {
            return Err(DetectionError::config(format!(
                "image_size {:?} must be non-zero",
                self.image_size
            )));
        }
        let nonzero = |v: &f32| v.is_finite() && *v != 0.0;
        if !self.pixel_stds.iter().all(nonzero) || !nonzero(&self.pixel_scale) {
            return Err(DetectionError::config("pixel_stds and pixel_scale must be finite and non-zero"));
        }
        if !self.pixel_means.iter().all(|v| v.is_finite())
            || !self.bbox_stds.iter().all(|v| v.is_finite())
            || !self.landmark_std.is_finite()
        {
            return Err(DetectionError::config("normalization constants must be finite"));
        }
        Ok(())
    }
}

impl Default for FaceDetectionConfig {
    fn default() -> Self {
        FaceDetectionConfig::new()
    }
}
