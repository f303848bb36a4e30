//! Result image rendering

use ab_glyph::{FontArc, PxScale};
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use predictor::{Detection, LabelMap};
use std::path::Path;

use crate::metrics::LAND_COVER_CLASSES;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_SCALE: f32 = 16.0;

/// Load a TTF/OTF font for detection labels
pub fn load_font(path: &Path) -> Result<FontArc, std::io::Error> {
    let data = std::fs::read(path)?;
    FontArc::try_from_vec(data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Draw detection boxes (2 px, green) and, with a font, `"<class>: <score>"` labels
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection], font: Option<&FontArc>) {
    let (img_w, img_h) = (image.width() as f32, image.height() as f32);

    for detection in detections {
        if detection.bbox.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let [bx, by, bw, bh] = detection.bbox;
        let x = bx.max(0.0);
        let y = by.max(0.0);
        let width = (bx + bw).min(img_w) - x;
        let height = (by + bh).min(img_h) - y;
        if !(width >= 1.0 && height >= 1.0) {
            continue;
        }

        let (x, y) = (x as i32, y as i32);
        let (width, height) = (width as u32, height as u32);
        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width, height), BOX_COLOR);
        if width > 2 && height > 2 {
            let inner = Rect::at(x + 1, y + 1).of_size(width - 2, height - 2);
            draw_hollow_rect_mut(image, inner, BOX_COLOR);
        }

        if let Some(font) = font {
            let label = format!("{}: {:.2}", detection.class_name, detection.score);
            let text_y = (y - 20).max(0);
            draw_text_mut(image, BOX_COLOR, x, text_y, PxScale::from(LABEL_SCALE), font, &label);
        }
    }
}

/// Non-zero labels white, background black
pub fn binary_mask(labels: &LabelMap) -> GrayImage {
    GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
        if labels.get(x, y) > 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Land-cover classes in their overlay colours; background and unknown labels transparent
pub fn land_cover_overlay(labels: &LabelMap) -> RgbaImage {
    let mut palette = [Rgba([0u8, 0, 0, 0]); 256];
    for class in &LAND_COVER_CLASSES {
        let [r, g, b] = class.color;
        palette[class.id as usize] = Rgba([r, g, b, 255]);
    }

    RgbaImage::from_fn(labels.width(), labels.height(), |x, y| {
        palette[labels.get(x, y) as usize]
    })
}
