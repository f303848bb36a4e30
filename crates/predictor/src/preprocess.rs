//! Image to tensor conversion shared by the predictors
//!
//! Working images are `Rgb32FImage` buffers whose channels hold **B, G, R** in
//! that order, the pixel order the exported models were trained with.

use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage, RgbImage};
use ndarray::{Array4, ArrayD};

use crate::config::Normalization;

/// Decoded RGB image to float BGR
pub(crate) fn to_bgr(image: &RgbImage) -> Rgb32FImage {
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Rgb([f32::from(b), f32::from(g), f32::from(r)])
    })
}

/// Bilinear resize
pub(crate) fn resize(image: &Rgb32FImage, width: u32, height: u32) -> Rgb32FImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Detection `NormalizeImage`: optional `/255`, then `(v - mean) / std`
pub(crate) fn normalize_image(image: &mut Rgb32FImage, mean: &[f32; 3], std: &[f32; 3], is_scale: bool) {
    for pixel in image.pixels_mut() {
        for c in 0..3 {
            let v = if is_scale { pixel[c] / 255.0 } else { pixel[c] };
            pixel[c] = (v - mean[c]) / std[c];
        }
    }
}

/// Segmentation `Normalize`: optional BGR to RGB swap, then `(v / 255 - mean) / std`
pub(crate) fn normalize(image: &mut Rgb32FImage, params: &Normalization) {
    for pixel in image.pixels_mut() {
        if params.to_rgb {
            pixel.0.swap(0, 2);
        }
        for c in 0..3 {
            pixel[c] = (pixel[c] / 255.0 - params.mean[c]) / params.std[c];
        }
    }
}

/// HWC image to a `(1, 3, H, W)` tensor
pub(crate) fn to_nchw(image: &Rgb32FImage) -> ArrayD<f32> {
    let (width, height) = image.dimensions();
    Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
        image.get_pixel(x as u32, y as u32)[c]
    })
    .into_dyn()
}

/// Full segmentation input path: BGR, every `Normalize` in order, NCHW
pub(crate) fn segmentation_tensor(image: &RgbImage, normalize_ops: &[Normalization]) -> ArrayD<f32> {
    let mut working = to_bgr(image);
    for params in normalize_ops {
        normalize(&mut working, params);
    }
    to_nchw(&working)
}
