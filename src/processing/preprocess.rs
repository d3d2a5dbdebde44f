use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{s, Array4, ArrayView3};
use tracing::debug;

use crate::error::{DetectionError, Result};
use crate::processing::bbox_transform::ClipWindow;

const RGB_CHANNELS: usize = 3;

/// Per-channel pixel normalization, `(v / scale - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelNormalization {
    pub means: [f32; 3],
    pub stds: [f32; 3],
    pub scale: f32,
}

impl PixelNormalization {
    #[inline]
    pub fn apply(&self, channel: usize, value: u8) -> f32 {
        (value as f32 / self.scale - self.means[channel]) / self.stds[channel]
    }
}

impl Default for PixelNormalization {
    fn default() -> Self {
        PixelNormalization {
            means: [0.0; 3],
            stds: [1.0; 3],
            scale: 1.0,
        }
    }
}

/// Padding added around the resized image, in tensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
}

/// Resize factors actually applied per axis, `resized / original`.
///
/// Rounding the resized size to whole pixels makes these differ slightly
/// from the nominal uniform scale; mapping back has to use them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    pub x: f32,
    pub y: f32,
}

impl AxisScale {
    pub fn uniform(scale: f32) -> Self {
        AxisScale { x: scale, y: scale }
    }
}

/// Network input plus everything needed to undo the resize and padding.
#[derive(Debug, Clone)]
pub struct PreprocessedTensor {
    /// `[1, H, W, 3]` normalized pixels.
    pub tensor: Array4<f32>,
    /// `(height, width)` of the tensor; detections are clipped to it.
    pub tensor_shape: (usize, usize),
    /// `(height, width)` of the resized image inside the padding.
    pub resized_shape: (usize, usize),
    /// `(height, width)` of the caller's image.
    pub original_shape: (usize, usize),
    /// nominal uniform scale chosen for the resize
    pub scale: f32,
    pub axis_scale: AxisScale,
    pub offset: Offset,
}

impl PreprocessedTensor {
    /// content_window is the resized image inside the padding, where
    /// decoded boxes are clipped to.
    pub fn content_window(&self) -> ClipWindow {
        let (rh, rw) = self.resized_shape;
        ClipWindow {
            x1: self.offset.x,
            y1: self.offset.y,
            x2: self.offset.x + rw.saturating_sub(1) as f32,
            y2: self.offset.y + rh.saturating_sub(1) as f32,
        }
    }
}

/// scale_for picks the uniform scale that fits a `height x width` image
/// inside the target, capped at 1.0 when upscaling is disallowed.
pub fn scale_for(height: usize, width: usize, target_size: (u32, u32), allow_upscaling: bool) -> f32 {
    let (target_w, target_h) = target_size;
    let scale = (target_h as f32 / height as f32).min(target_w as f32 / width as f32);
    if allow_upscaling {
        scale
    } else {
        scale.min(1.0)
    }
}

/// preprocess resizes `image` (H, W, 3) with bilinear filtering, pads it to
/// `target_size` (width, height) with the content centered and normalizes it
/// into an NHWC tensor.
pub fn preprocess(
    image: ArrayView3<u8>,
    target_size: (u32, u32),
    allow_upscaling: bool,
    normalization: &PixelNormalization,
) -> Result<PreprocessedTensor> {
    let (height, width, channels) = image.dim();
    if channels != RGB_CHANNELS {
        return Err(DetectionError::invalid_image(format!(
            "expected {} channels, got {}",
            RGB_CHANNELS, channels
        )));
    }
    if height == 0 || width == 0 {
        return Err(DetectionError::invalid_image(format!(
            "image must not be empty, got {}x{}",
            width, height
        )));
    }
    let (target_w, target_h) = target_size;
    if target_w == 0 || target_h == 0 {
        return Err(DetectionError::config("target size must be non-zero"));
    }

    let scale = scale_for(height, width, target_size, allow_upscaling);
    let resized_h = ((height as f32 * scale).round() as u32).clamp(1, target_h);
    let resized_w = ((width as f32 * scale).round() as u32).clamp(1, target_w);

    let raw = image.as_standard_layout().into_owned().into_raw_vec();
    let rgb = match RgbImage::from_raw(width as u32, height as u32, raw) {
        Some(rgb) => rgb,
        None => return Err(DetectionError::invalid_image("pixel buffer does not match image shape")),
    };
    let resized = if resized_w as usize == width && resized_h as usize == height {
        rgb
    } else {
        imageops::resize(&rgb, resized_w, resized_h, FilterType::Triangle)
    };

    let offset_x = ((target_w - resized_w) / 2) as usize;
    let offset_y = ((target_h - resized_h) / 2) as usize;

    let (th, tw) = (target_h as usize, target_w as usize);
    let mut tensor = Array4::<f32>::zeros((1, th, tw, RGB_CHANNELS));
    for c in 0..RGB_CHANNELS {
        let pad = normalization.apply(c, 0);
        if pad != 0.0 {
            tensor.slice_mut(s![0, .., .., c]).fill(pad);
        }
    }
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (ty, tx) = (y as usize + offset_y, x as usize + offset_x);
        for c in 0..RGB_CHANNELS {
            tensor[[0, ty, tx, c]] = normalization.apply(c, pixel[c]);
        }
    }

    let offset = Offset {
        x: offset_x as f32,
        y: offset_y as f32,
    };
    debug!(
        "preprocessed {}x{} -> {}x{} (scale {:.4}, offset {:?})",
        width, height, resized_w, resized_h, scale, offset
    );

    Ok(PreprocessedTensor {
        tensor,
        tensor_shape: (th, tw),
        resized_shape: (resized_h as usize, resized_w as usize),
        original_shape: (height, width),
        scale,
        axis_scale: AxisScale {
            x: resized_w as f32 / width as f32,
            y: resized_h as f32 / height as f32,
        },
        offset,
    })
}
