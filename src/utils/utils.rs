use image::{DynamicImage, RgbImage};
use ndarray::Array3;

use crate::error::Result;

pub fn byte_data_to_image(im_bytes: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory(im_bytes)?;

    // RGBA and grayscale inputs are converted, everything else is already RGB
    let rgb_img = match decoded {
        DynamicImage::ImageRgb8(rgb_img) => rgb_img,
        other => other.to_rgb8(),
    };

    Ok(rgb_img)
}

/// image_to_array lays an RGB image out as an `(H, W, 3)` array.
pub fn image_to_array(img: &RgbImage) -> Array3<u8> {
    let (width, height) = img.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), img.as_raw().clone())
        .unwrap_or_else(|_| Array3::zeros((0, 0, 3)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectionError;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbaImage};
    use std::io::Cursor;

    fn encode(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_rgb_png() {
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(1, 2, Rgb([10, 20, 30]));
        let decoded = byte_data_to_image(&encode(DynamicImage::ImageRgb8(img))).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));

        let array = image_to_array(&decoded);
        assert_eq!(array.dim(), (3, 4, 3));
        assert_eq!(array[[2, 1, 0]], 10);
        assert_eq!(array[[2, 1, 2]], 30);
    }

    #[test]
    fn test_gray_and_rgba_become_rgb() {
        let gray = GrayImage::from_pixel(2, 2, Luma([77]));
        let decoded = byte_data_to_image(&encode(DynamicImage::ImageLuma8(gray))).unwrap();
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([77, 77, 77]));

        let rgba = RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
        let decoded = byte_data_to_image(&encode(DynamicImage::ImageRgba8(rgba))).unwrap();
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_garbage_bytes() {
        let err = byte_data_to_image(b"not an image").unwrap_err();
        assert!(matches!(err, DetectionError::InvalidImage(_)));
    }
}
