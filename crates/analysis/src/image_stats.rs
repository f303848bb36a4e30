//! Descriptive statistics of uploaded images
//!
//! Shown to the user before an analysis runs: basic file information,
//! brightness/contrast/sharpness, a perceptual hash and, for image pairs,
//! structural similarity.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::laplacian_filter;
use serde::Serialize;
use std::path::Path;

use crate::metrics::round_to;
use crate::AnalysisError;

const SSIM_WINDOW: u32 = 8;
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageStats {
    pub file_name: String,
    /// `"W x H"`
    pub dimensions: String,
    pub channels: u8,
    pub file_size_kb: f64,
    pub mean_brightness: f64,
    /// Grey-level standard deviation
    pub contrast: f64,
    /// Variance of the Laplacian
    pub sharpness: f64,
    /// 64-bit difference hash, hex
    pub image_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferenceMetrics {
    pub ssim: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairStats {
    #[serde(rename = "imageA")]
    pub image_a: ImageStats,
    #[serde(rename = "imageB")]
    pub image_b: ImageStats,
    #[serde(rename = "differenceMetrics")]
    pub difference_metrics: DifferenceMetrics,
}

/// Statistics of one image file
pub fn image_stats(path: &Path) -> Result<ImageStats, AnalysisError> {
    let (stats, _) = load_with_stats(path)?;
    Ok(stats)
}

/// Statistics of both images plus their similarity.
///
/// The second image is resized to the first before comparison.
pub fn pair_stats(path_a: &Path, path_b: &Path) -> Result<PairStats, AnalysisError> {
    let (image_a, gray_a) = load_with_stats(path_a)?;
    let (image_b, gray_b) = load_with_stats(path_b)?;

    let gray_b = if gray_b.dimensions() != gray_a.dimensions() {
        imageops::resize(&gray_b, gray_a.width(), gray_a.height(), FilterType::Triangle)
    } else {
        gray_b
    };

    Ok(PairStats {
        image_a,
        image_b,
        difference_metrics: DifferenceMetrics {
            ssim: round_to(ssim(&gray_a, &gray_b), 4),
        },
    })
}

fn load_with_stats(path: &Path) -> Result<(ImageStats, GrayImage), AnalysisError> {
    if !path.is_file() {
        return Err(AnalysisError::ImageNotFound(path.display().to_string()));
    }
    let file_size = std::fs::metadata(path)?.len();
    let image = image::open(path)?;
    let gray = to_gray(&image);

    let values: Vec<f64> = gray.pixels().map(|p| f64::from(p[0])).collect();
    let (mean, std_dev) = mean_and_std(&values);
    let stats = ImageStats {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        dimensions: format!("{} x {}", image.width(), image.height()),
        channels: image.color().channel_count(),
        file_size_kb: round_to(file_size as f64 / 1024.0, 2),
        mean_brightness: round_to(mean, 2),
        contrast: round_to(std_dev, 2),
        sharpness: round_to(laplacian_variance(&gray), 2),
        image_hash: format!("{:016x}", difference_hash(&gray)),
    };
    Ok((stats, gray))
}

/// Luma with 0.299 / 0.587 / 0.114 weights
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let v = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let laplacian = laplacian_filter(gray);
    let values: Vec<f64> = laplacian.pixels().map(|p| f64::from(p[0])).collect();
    let (_, std_dev) = mean_and_std(&values);
    std_dev * std_dev
}

/// Bit set where a pixel of the 9x8 thumbnail is brighter than its left neighbour
pub fn difference_hash(gray: &GrayImage) -> u64 {
    let thumb = imageops::resize(gray, 9, 8, FilterType::Triangle);
    let mut hash = 0u64;
    for y in 0..8 {
        for x in 0..8 {
            hash <<= 1;
            if thumb.get_pixel(x + 1, y)[0] > thumb.get_pixel(x, y)[0] {
                hash |= 1;
            }
        }
    }
    hash
}

/// Mean SSIM over non-overlapping 8x8 windows of two same-size images
pub fn ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 || b.dimensions() != (width, height) {
        return 0.0;
    }
    let win_w = SSIM_WINDOW.min(width);
    let win_h = SSIM_WINDOW.min(height);

    let mut total = 0.0;
    let mut windows = 0u32;
    let mut y0 = 0;
    while y0 + win_h <= height {
        let mut x0 = 0;
        while x0 + win_w <= width {
            total += window_ssim(a, b, x0, y0, win_w, win_h);
            windows += 1;
            x0 += win_w;
        }
        y0 += win_h;
    }
    total / f64::from(windows)
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> f64 {
    let n = f64::from(w * h);
    let (mut sum_a, mut sum_b) = (0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            sum_a += f64::from(a.get_pixel(x, y)[0]);
            sum_b += f64::from(b.get_pixel(x, y)[0]);
        }
    }
    let (mu_a, mu_b) = (sum_a / n, sum_b / n);

    let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let da = f64::from(a.get_pixel(x, y)[0]) - mu_a;
            let db = f64::from(b.get_pixel(x, y)[0]) - mu_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
    }
    let (var_a, var_b, cov) = (var_a / n, var_b / n, cov / n);

    ((2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * cov + SSIM_C2))
        / ((mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2))
}
